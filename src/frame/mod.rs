// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

#[cfg(feature = "rtu")]
pub mod rtu;

#[cfg(feature = "tcp")]
pub mod tcp;

#[cfg(feature = "ascii")]
pub mod ascii;

/// A Modbus function code is represented by an unsigned 8 bit integer.
pub type FunctionCode = u8;

/// A Modbus protocol address, 0-based as it appears on the wire.
///
/// The *protocol address* uses 0-based indexing, while the *coil address*
/// or *register address* is often specified with 1-based indexing.
/// Consult a device's documentation before converting one to the other.
pub type Address = u16;

/// A Coil represents a single bit.
///
/// - `true` is equivalent to `ON`, `1` and `0xFF00`.
/// - `false` is equivalent to `OFF`, `0` and `0x0000`.
pub type Coil = bool;

/// Modbus uses 16 bit for its data items (big-endian representation).
pub type Word = u16;

/// Number of items to process (`0` - `65535`).
pub type Quantity = u16;

/// A request represents a message from the client (master) to the server
/// (slave). All twelve Modbus Application Protocol function codes this
/// crate supports are represented here; `Custom` is an escape hatch for
/// anything else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    ReadCoils(Address, Quantity),
    ReadDiscreteInputs(Address, Quantity),
    WriteSingleCoil(Address, Coil),
    WriteMultipleCoils(Address, Vec<Coil>),
    ReadInputRegisters(Address, Quantity),
    ReadHoldingRegisters(Address, Quantity),
    WriteSingleRegister(Address, Word),
    WriteMultipleRegisters(Address, Vec<Word>),
    MaskWriteRegister(Address, Word, Word),
    ReadWriteMultipleRegisters(Address, Quantity, Address, Vec<Word>),
    Custom(FunctionCode, Vec<u8>),
    /// A poison pill for stopping the client service and releasing the
    /// underlying transport, e.g. for disconnecting from an exclusively
    /// used serial port.
    Disconnect,
}

impl Request {
    /// The function code this request is encoded with on the wire.
    pub fn function_code(&self) -> FunctionCode {
        use Request::*;
        match self {
            ReadCoils(..) => 0x01,
            ReadDiscreteInputs(..) => 0x02,
            WriteSingleCoil(..) => 0x05,
            WriteMultipleCoils(..) => 0x0F,
            ReadInputRegisters(..) => 0x04,
            ReadHoldingRegisters(..) => 0x03,
            WriteSingleRegister(..) => 0x06,
            WriteMultipleRegisters(..) => 0x10,
            MaskWriteRegister(..) => 0x16,
            ReadWriteMultipleRegisters(..) => 0x17,
            Custom(code, _) => *code,
            Disconnect => 0x00,
        }
    }
}

/// The data of a successful response.
///
/// ReadCoils/ReadDiscreteInputs: the length of the result `Vec` is always a
/// multiple of 8. Only the values of the bits/coils that were actually
/// requested are defined; the value of the remaining bits depends on the
/// server implementation and should be ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    ReadCoils(Vec<Coil>),
    ReadDiscreteInputs(Vec<Coil>),
    WriteSingleCoil(Address),
    WriteMultipleCoils(Address, Quantity),
    ReadInputRegisters(Vec<Word>),
    ReadHoldingRegisters(Vec<Word>),
    WriteSingleRegister(Address, Word),
    WriteMultipleRegisters(Address, Quantity),
    MaskWriteRegister(Address, Word, Word),
    ReadWriteMultipleRegisters(Vec<Word>),
    Custom(FunctionCode, Vec<u8>),
}

impl Response {
    pub fn function_code(&self) -> FunctionCode {
        use Response::*;
        match self {
            ReadCoils(_) => 0x01,
            ReadDiscreteInputs(_) => 0x02,
            WriteSingleCoil(..) => 0x05,
            WriteMultipleCoils(..) => 0x0F,
            ReadInputRegisters(_) => 0x04,
            ReadHoldingRegisters(_) => 0x03,
            WriteSingleRegister(..) => 0x06,
            WriteMultipleRegisters(..) => 0x10,
            MaskWriteRegister(..) => 0x16,
            ReadWriteMultipleRegisters(_) => 0x17,
            Custom(code, _) => *code,
        }
    }
}

/// A server (slave) exception code, returned alongside `function | 0x80`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Exception {
    #[error("Illegal function")]
    IllegalFunction = 0x01,
    #[error("Illegal data address")]
    IllegalDataAddress = 0x02,
    #[error("Illegal data value")]
    IllegalDataValue = 0x03,
    #[error("Server device failure")]
    ServerDeviceFailure = 0x04,
    #[error("Acknowledge")]
    Acknowledge = 0x05,
    #[error("Server device busy")]
    ServerDeviceBusy = 0x06,
    #[error("Memory parity error")]
    MemoryParityError = 0x08,
    #[error("Gateway path unavailable")]
    GatewayPathUnavailable = 0x0A,
    #[error("Gateway target device failed to respond")]
    GatewayTargetDevice = 0x0B,
}

impl Exception {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        use Exception::*;
        Some(match code {
            0x01 => IllegalFunction,
            0x02 => IllegalDataAddress,
            0x03 => IllegalDataValue,
            0x04 => ServerDeviceFailure,
            0x05 => Acknowledge,
            0x06 => ServerDeviceBusy,
            0x08 => MemoryParityError,
            0x0A => GatewayPathUnavailable,
            0x0B => GatewayTargetDevice,
            _ => return None,
        })
    }
}

/// A server (slave) exception response: `function | 0x80` plus the
/// exception code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Modbus function {function}: {exception}")]
pub struct ExceptionResponse {
    pub function: FunctionCode,
    pub exception: Exception,
}

/// Represents a message from the client (master) to the server (slave),
/// carried inside one transport-specific ADU.
///
/// The `Err` side is populated by the codec itself when the incoming wire
/// bytes are syntactically framed correctly but carry contents a server
/// must reject with a Modbus exception (unknown function code, bad
/// quantity, bad byte count) before any request ever reaches the register
/// map — mirroring `ResponsePdu`'s existing success/exception split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestPdu(pub Result<Request, ExceptionResponse>);

impl From<Request> for RequestPdu {
    fn from(from: Request) -> Self {
        RequestPdu(Ok(from))
    }
}

impl From<ExceptionResponse> for RequestPdu {
    fn from(from: ExceptionResponse) -> Self {
        RequestPdu(Err(from))
    }
}

impl From<RequestPdu> for Result<Request, ExceptionResponse> {
    fn from(from: RequestPdu) -> Self {
        from.0
    }
}

/// Represents a message from the server (slave) to the client (master).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponsePdu(pub Result<Response, ExceptionResponse>);

impl From<Response> for ResponsePdu {
    fn from(from: Response) -> Self {
        ResponsePdu(Ok(from))
    }
}

impl From<ExceptionResponse> for ResponsePdu {
    fn from(from: ExceptionResponse) -> Self {
        ResponsePdu(Err(from))
    }
}

impl From<Result<Response, ExceptionResponse>> for ResponsePdu {
    fn from(from: Result<Response, ExceptionResponse>) -> Self {
        ResponsePdu(from)
    }
}

impl From<ResponsePdu> for Result<Response, ExceptionResponse> {
    fn from(from: ResponsePdu) -> Self {
        from.0
    }
}

/// A request as seen on the server side, carrying the unit-id it was
/// addressed to (a server may answer for more than one logical slave,
/// e.g. an RTU-over-TCP gateway).
#[cfg(feature = "server")]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlaveRequest {
    pub slave: crate::slave::SlaveId,
    pub request: Result<Request, ExceptionResponse>,
}
