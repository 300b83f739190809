// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The client façade (spec.md §4.5): `Client` is the transport-independent
//! request/response primitive, `Reader`/`Writer` are blanket convenience
//! traits built on top of it, and [`Context`] is the type-erased handle most
//! callers hold. Generalizes the teacher's `async-trait`-based `Client`/
//! `Reader`/`Writer` traits to the full twelve-function-code operation set
//! plus the typed point-binding conveniences (`fetch_point_values`/
//! `update_point_values`).

#[cfg(feature = "rtu")]
pub mod rtu;

#[cfg(feature = "ascii")]
pub mod ascii;

#[cfg(feature = "tcp")]
pub mod tcp;

pub mod util;

use std::io::ErrorKind;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::frame::*;
use crate::register::{PointBinding, PointValue, RegisterMap, Table};
use crate::slave::*;

/// A transport-independent asynchronous client: a single `call` primitive
/// that pairs one request with one response through whichever transaction
/// engine backs it (spec.md §4.3).
#[async_trait]
pub trait Client: SlaveContext + Send {
    async fn call(&self, request: Request) -> Result<Response>;

    /// The transaction engine's request/retry/error counters, where the
    /// underlying transport exposes them (spec.md §7 "Observability").
    fn counters(&self) -> Option<&crate::observability::Counters> {
        None
    }
}

fn unexpected_response() -> Error {
    Error::protocol("unexpected response variant")
}

/// An asynchronous Modbus reader (spec.md §4.5 "Read operations").
#[async_trait]
pub trait Reader: Client {
    async fn read_coils(&self, addr: Address, cnt: Quantity) -> Result<Vec<Coil>>;
    async fn read_discrete_inputs(&self, addr: Address, cnt: Quantity) -> Result<Vec<Coil>>;
    async fn read_input_registers(&self, addr: Address, cnt: Quantity) -> Result<Vec<Word>>;
    async fn read_holding_registers(&self, addr: Address, cnt: Quantity) -> Result<Vec<Word>>;
    async fn read_write_multiple_registers(
        &self,
        read_addr: Address,
        read_cnt: Quantity,
        write_addr: Address,
        write_data: &[Word],
    ) -> Result<Vec<Word>>;
}

/// An asynchronous Modbus writer (spec.md §4.5 "Write operations").
#[async_trait]
pub trait Writer: Client {
    async fn write_single_coil(&self, addr: Address, coil: Coil) -> Result<()>;
    async fn write_multiple_coils(&self, addr: Address, coils: &[Coil]) -> Result<()>;
    async fn write_single_register(&self, addr: Address, data: Word) -> Result<()>;
    async fn write_multiple_registers(&self, addr: Address, data: &[Word]) -> Result<()>;
    async fn mask_write_register(&self, addr: Address, and_mask: Word, or_mask: Word) -> Result<()>;
}

#[async_trait]
impl<C> Reader for C
where
    C: Client,
{
    async fn read_coils(&self, addr: Address, cnt: Quantity) -> Result<Vec<Coil>> {
        match self.call(Request::ReadCoils(addr, cnt)).await? {
            Response::ReadCoils(mut coils) => {
                coils.truncate(cnt as usize);
                Ok(coils)
            }
            _ => Err(unexpected_response()),
        }
    }

    async fn read_discrete_inputs(&self, addr: Address, cnt: Quantity) -> Result<Vec<Coil>> {
        match self.call(Request::ReadDiscreteInputs(addr, cnt)).await? {
            Response::ReadDiscreteInputs(mut coils) => {
                coils.truncate(cnt as usize);
                Ok(coils)
            }
            _ => Err(unexpected_response()),
        }
    }

    async fn read_input_registers(&self, addr: Address, cnt: Quantity) -> Result<Vec<Word>> {
        match self.call(Request::ReadInputRegisters(addr, cnt)).await? {
            Response::ReadInputRegisters(words) if words.len() == cnt as usize => Ok(words),
            Response::ReadInputRegisters(_) => Err(Error::protocol("unexpected response length")),
            _ => Err(unexpected_response()),
        }
    }

    async fn read_holding_registers(&self, addr: Address, cnt: Quantity) -> Result<Vec<Word>> {
        match self.call(Request::ReadHoldingRegisters(addr, cnt)).await? {
            Response::ReadHoldingRegisters(words) if words.len() == cnt as usize => Ok(words),
            Response::ReadHoldingRegisters(_) => Err(Error::protocol("unexpected response length")),
            _ => Err(unexpected_response()),
        }
    }

    async fn read_write_multiple_registers(
        &self,
        read_addr: Address,
        read_cnt: Quantity,
        write_addr: Address,
        write_data: &[Word],
    ) -> Result<Vec<Word>> {
        let request =
            Request::ReadWriteMultipleRegisters(read_addr, read_cnt, write_addr, write_data.to_vec());
        match self.call(request).await? {
            Response::ReadWriteMultipleRegisters(words) if words.len() == read_cnt as usize => Ok(words),
            Response::ReadWriteMultipleRegisters(_) => {
                Err(Error::protocol("unexpected response length"))
            }
            _ => Err(unexpected_response()),
        }
    }
}

#[async_trait]
impl<C> Writer for C
where
    C: Client,
{
    async fn write_single_coil(&self, addr: Address, coil: Coil) -> Result<()> {
        match self.call(Request::WriteSingleCoil(addr, coil)).await? {
            Response::WriteSingleCoil(rsp_addr) if rsp_addr == addr => Ok(()),
            Response::WriteSingleCoil(_) => Err(Error::protocol("echoed address mismatch")),
            _ => Err(unexpected_response()),
        }
    }

    async fn write_multiple_coils(&self, addr: Address, coils: &[Coil]) -> Result<()> {
        let cnt = coils.len() as Quantity;
        match self
            .call(Request::WriteMultipleCoils(addr, coils.to_vec()))
            .await?
        {
            Response::WriteMultipleCoils(rsp_addr, rsp_cnt) if rsp_addr == addr && rsp_cnt == cnt => {
                Ok(())
            }
            Response::WriteMultipleCoils(..) => Err(Error::protocol("echoed quantity mismatch")),
            _ => Err(unexpected_response()),
        }
    }

    async fn write_single_register(&self, addr: Address, data: Word) -> Result<()> {
        match self.call(Request::WriteSingleRegister(addr, data)).await? {
            Response::WriteSingleRegister(rsp_addr, rsp_word) if rsp_addr == addr && rsp_word == data => {
                Ok(())
            }
            Response::WriteSingleRegister(..) => Err(Error::protocol("echoed value mismatch")),
            _ => Err(unexpected_response()),
        }
    }

    async fn write_multiple_registers(&self, addr: Address, data: &[Word]) -> Result<()> {
        let cnt = data.len() as Quantity;
        match self
            .call(Request::WriteMultipleRegisters(addr, data.to_vec()))
            .await?
        {
            Response::WriteMultipleRegisters(rsp_addr, rsp_cnt) if rsp_addr == addr && rsp_cnt == cnt => {
                Ok(())
            }
            Response::WriteMultipleRegisters(..) => Err(Error::protocol("echoed quantity mismatch")),
            _ => Err(unexpected_response()),
        }
    }

    async fn mask_write_register(&self, addr: Address, and_mask: Word, or_mask: Word) -> Result<()> {
        match self
            .call(Request::MaskWriteRegister(addr, and_mask, or_mask))
            .await?
        {
            Response::MaskWriteRegister(rsp_addr, rsp_and, rsp_or)
                if rsp_addr == addr && rsp_and == and_mask && rsp_or == or_mask =>
            {
                Ok(())
            }
            Response::MaskWriteRegister(..) => Err(Error::protocol("echoed mask mismatch")),
            _ => Err(unexpected_response()),
        }
    }
}

/// A type-erased, transport-independent client handle (spec.md §4.5).
#[derive(Debug)]
pub struct Context {
    client: Box<dyn Client>,
}

impl Context {
    pub(crate) fn new(client: Box<dyn Client>) -> Self {
        Self { client }
    }

    /// Releases the underlying transport. Expected to fail with a
    /// connection-closed style I/O error, which is treated as success.
    pub async fn disconnect(&self) -> Result<()> {
        match self.client.call(Request::Disconnect).await {
            Ok(_) => unreachable!("Disconnect never yields a response"),
            Err(Error::Io(err))
                if matches!(err.kind(), ErrorKind::NotConnected | ErrorKind::BrokenPipe) =>
            {
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}

#[async_trait]
impl Client for Context {
    async fn call(&self, request: Request) -> Result<Response> {
        self.client.call(request).await
    }

    fn counters(&self) -> Option<&crate::observability::Counters> {
        self.client.counters()
    }
}

impl SlaveContext for Context {
    fn set_slave(&mut self, slave: Slave) {
        self.client.set_slave(slave);
    }
}

/// Reads every bound point's current value through `client`, honoring each
/// register's width/endianness (spec.md §4.5 "Typed point access", new
/// convenience grounded on the register-binding model in §3/§4.4).
pub async fn fetch_point_values<R: Reader + ?Sized>(
    client: &R,
    registers: &RegisterMap,
    bindings: &[PointBinding],
) -> Result<Vec<(crate::register::PointId, PointValue)>> {
    let mut out = Vec::with_capacity(bindings.len());
    for binding in bindings {
        let width = binding.register.width();
        let words = match binding.register.table {
            Table::HoldingRegisters => {
                client
                    .read_holding_registers(binding.register.address, width)
                    .await?
            }
            Table::InputRegisters => {
                client
                    .read_input_registers(binding.register.address, width)
                    .await?
            }
            Table::Coils | Table::DiscreteInputs => {
                let bits = if binding.register.table == Table::Coils {
                    client.read_coils(binding.register.address, width).await?
                } else {
                    client
                        .read_discrete_inputs(binding.register.address, width)
                        .await?
                };
                out.push((
                    binding.point.id,
                    PointValue::Discrete(bits.first().copied().unwrap_or(false)),
                ));
                continue;
            }
        };
        let value = decode_point(&binding.register.kind, &words, registers.endianness())?;
        out.push((binding.point.id, value));
    }
    Ok(out)
}

fn decode_point(
    kind: &crate::register::RegisterKind,
    words: &[Word],
    endian: crate::register::Endianness,
) -> Result<PointValue> {
    use crate::register::{value, RegisterKind};
    Ok(match kind {
        RegisterKind::Word { signed: true } => PointValue::SignedWord(words[0] as i16),
        RegisterKind::Word { signed: false } => PointValue::Word(words[0]),
        RegisterKind::Integer { signed, middle_endian } => {
            let e = crate::register::Endianness {
                middle_endian: *middle_endian,
                little_endian: endian.little_endian,
            };
            PointValue::Integer(value::decode_integer([words[0], words[1]], *signed, e))
        }
        RegisterKind::Long { middle_endian } => {
            let e = crate::register::Endianness {
                middle_endian: *middle_endian,
                little_endian: endian.little_endian,
            };
            PointValue::Long(value::decode_long(
                [words[0], words[1], words[2], words[3]],
                e,
            ))
        }
        RegisterKind::Float { middle_endian } => {
            let e = crate::register::Endianness {
                middle_endian: *middle_endian,
                little_endian: endian.little_endian,
            };
            PointValue::Float(value::decode_float([words[0], words[1]], e))
        }
        RegisterKind::Double { middle_endian } => {
            let e = crate::register::Endianness {
                middle_endian: *middle_endian,
                little_endian: endian.little_endian,
            };
            PointValue::Double(value::decode_double(
                [words[0], words[1], words[2], words[3]],
                e,
            ))
        }
        RegisterKind::Bits { .. } => PointValue::Bits(words[0]),
        RegisterKind::Masked { .. } => PointValue::Masked(words[0]),
        RegisterKind::WordArray { .. } => PointValue::WordArray(words.to_vec()),
        RegisterKind::Sequence => PointValue::Sequence(words[0]),
        RegisterKind::Stamp => PointValue::Stamp(value::Stamp::decode([words[0], words[1]]).as_duration()),
        RegisterKind::Time => {
            PointValue::Time(value::Time::decode([words[0], words[1], words[2], words[3]]))
        }
        RegisterKind::Discrete | RegisterKind::DiscreteArray { .. } => {
            return Err(Error::address("bit-table kind decoded through word path"))
        }
    })
}

/// Writes `value` to `client` through its bound register, per spec.md §4.5
/// "Typed point access". Mirrors [`decode_point`]'s dispatch over every
/// `RegisterKind`, so any value read back through `fetch_point_values` can
/// be written back unchanged. `and_mask` is only consulted for `Masked`
/// registers configured with a compile-time mask, where it is ignored in
/// favor of the register's own mask (the request still needs `and_mask`
/// as the wire parameter, derived as `!mask`).
pub async fn update_point_values<W: Writer + ?Sized>(
    client: &W,
    registers: &RegisterMap,
    binding: &PointBinding,
    value: &PointValue,
) -> Result<()> {
    use crate::register::{value, RegisterKind};
    let addr = binding.register.address;
    let endian = registers.endianness();
    match (&binding.register.kind, value) {
        (RegisterKind::Discrete, PointValue::Discrete(on)) => {
            client.write_single_coil(addr, *on).await
        }
        (RegisterKind::DiscreteArray { .. }, PointValue::DiscreteArray(bits)) => {
            client.write_multiple_coils(addr, bits).await
        }
        (RegisterKind::Word { signed: false }, PointValue::Word(word)) => {
            client.write_single_register(addr, *word).await
        }
        (RegisterKind::Word { signed: true }, PointValue::SignedWord(word)) => {
            client.write_single_register(addr, *word as u16).await
        }
        (RegisterKind::Integer { middle_endian, .. }, PointValue::Integer(v)) => {
            let e = value::Endianness { middle_endian: *middle_endian, little_endian: endian.little_endian };
            client.write_multiple_registers(addr, &value::encode_integer(*v, e)).await
        }
        (RegisterKind::Long { middle_endian }, PointValue::Long(v)) => {
            let e = value::Endianness { middle_endian: *middle_endian, little_endian: endian.little_endian };
            client.write_multiple_registers(addr, &value::encode_long(*v, e)).await
        }
        (RegisterKind::Float { middle_endian }, PointValue::Float(v)) => {
            let e = value::Endianness { middle_endian: *middle_endian, little_endian: endian.little_endian };
            client.write_multiple_registers(addr, &value::encode_float(*v, e)).await
        }
        (RegisterKind::Double { middle_endian }, PointValue::Double(v)) => {
            let e = value::Endianness { middle_endian: *middle_endian, little_endian: endian.little_endian };
            client.write_multiple_registers(addr, &value::encode_double(*v, e)).await
        }
        (RegisterKind::Bits { .. }, PointValue::Bits(word)) => {
            client.write_single_register(addr, *word).await
        }
        (RegisterKind::Masked { mask }, PointValue::Masked(word)) => {
            client.mask_write_register(addr, !mask, *word & mask).await
        }
        (RegisterKind::WordArray { .. }, PointValue::WordArray(words)) => {
            client.write_multiple_registers(addr, words).await
        }
        (RegisterKind::Sequence, PointValue::Sequence(word)) => {
            client.write_single_register(addr, *word).await
        }
        (RegisterKind::Stamp, PointValue::Stamp(duration)) => {
            let words = value::Stamp::from_duration(*duration).encode();
            client.write_multiple_registers(addr, &words).await
        }
        (RegisterKind::Time, PointValue::Time(time)) => {
            client.write_multiple_registers(addr, &time.encode()).await
        }
        _ => Err(Error::value("point value does not match its register kind")),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default, Debug)]
    pub struct ClientMock {
        slave: Option<Slave>,
        last_request: Mutex<Option<Request>>,
        next_response: Mutex<Option<Result<Response>>>,
    }

    impl ClientMock {
        pub fn set_next_response(&self, next_response: Result<Response>) {
            *self.next_response.lock().unwrap() = Some(next_response);
        }

        pub fn last_request(&self) -> Option<Request> {
            self.last_request.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Client for ClientMock {
        async fn call(&self, request: Request) -> Result<Response> {
            *self.last_request.lock().unwrap() = Some(request);
            self.next_response.lock().unwrap().take().unwrap()
        }
    }

    impl SlaveContext for ClientMock {
        fn set_slave(&mut self, slave: Slave) {
            self.slave = Some(slave);
        }
    }

    #[tokio::test]
    async fn read_some_coils_truncates_to_requested_count() {
        let response_coils = vec![true, false, false, true, false, true, false, true];
        for num_coils in 1u16..8 {
            let client = ClientMock::default();
            client.set_next_response(Ok(Response::ReadCoils(response_coils.clone())));
            let coils = client.read_coils(1, num_coils).await.unwrap();
            assert_eq!(&response_coils[0..num_coils as usize], &coils[..]);
        }
    }

    #[tokio::test]
    async fn write_single_coil_rejects_echoed_address_mismatch() {
        let client = ClientMock::default();
        client.set_next_response(Ok(Response::WriteSingleCoil(99)));
        let err = client.write_single_coil(1, true).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn mask_write_register_round_trips_masks() {
        let client = ClientMock::default();
        client.set_next_response(Ok(Response::MaskWriteRegister(4, 0xFF0F, 0x00A0)));
        client.mask_write_register(4, 0xFF0F, 0x00A0).await.unwrap();
        assert_eq!(
            client.last_request(),
            Some(Request::MaskWriteRegister(4, 0xFF0F, 0x00A0))
        );
    }
}
