// SPDX-License-Identifier: MIT OR Apache-2.0

//! Function-code ↔ byte-payload encoding and decoding, shared by every
//! transport-specific framing (`codec::tcp`, `codec::rtu`, `codec::ascii`).
//!
//! Bit packing follows the Modbus convention: bit 0 of the first byte is
//! the first coil/input; unused bits in the last byte are zero. Word
//! packing is always big-endian within a single 16-bit word, per the
//! Modbus Application Protocol.

use byteorder::{BigEndian, ByteOrder};

use crate::error::Error;
use crate::frame::{Exception, ExceptionResponse, Request, Response};

/// Number of bytes needed to hold `quantity` packed bits.
pub(crate) fn packed_coils_len(quantity: usize) -> usize {
    quantity.div_ceil(8)
}

pub(crate) fn pack_coils(coils: &[bool]) -> Vec<u8> {
    let mut bytes = vec![0u8; packed_coils_len(coils.len())];
    for (i, &coil) in coils.iter().enumerate() {
        if coil {
            bytes[i / 8] |= 1 << (i % 8);
        }
    }
    bytes
}

pub(crate) fn unpack_coils(bytes: &[u8], quantity: usize) -> Vec<bool> {
    (0..quantity)
        .map(|i| bytes[i / 8] & (1 << (i % 8)) != 0)
        .collect()
}

fn pack_words(words: &[u16]) -> Vec<u8> {
    let mut bytes = vec![0u8; words.len() * 2];
    BigEndian::write_u16_into(words, &mut bytes);
    bytes
}

fn unpack_words(bytes: &[u8], quantity: usize) -> Result<Vec<u16>, Error> {
    if bytes.len() != quantity * 2 {
        return Err(Error::frame("word payload length does not match quantity"));
    }
    let mut words = vec![0u16; quantity];
    BigEndian::read_u16_into(bytes, &mut words);
    Ok(words)
}

fn check_coil_quantity(quantity: usize, max: usize) -> Result<(), Error> {
    if quantity == 0 || quantity > max {
        return Err(Error::value(format!(
            "quantity {quantity} out of range 1..={max}"
        )));
    }
    Ok(())
}

fn coil_word(coil: bool) -> u16 {
    if coil {
        0xFF00
    } else {
        0x0000
    }
}

fn word_to_coil(word: u16) -> Result<bool, Error> {
    match word {
        0xFF00 => Ok(true),
        0x0000 => Ok(false),
        other => Err(Error::value(format!(
            "coil value 0x{other:04X} is neither 0x0000 nor 0xFF00"
        ))),
    }
}

/// Encode a request's function code and payload into PDU bytes (no
/// framing envelope).
pub(crate) fn encode_request(req: &Request) -> Result<Vec<u8>, Error> {
    use Request::*;
    let fc = req.function_code();
    let mut buf = vec![fc];
    match req {
        ReadCoils(addr, qty) | ReadDiscreteInputs(addr, qty) => {
            check_coil_quantity(*qty as usize, 2000)?;
            buf.extend_from_slice(&addr.to_be_bytes());
            buf.extend_from_slice(&qty.to_be_bytes());
        }
        ReadInputRegisters(addr, qty) | ReadHoldingRegisters(addr, qty) => {
            check_coil_quantity(*qty as usize, 125)?;
            buf.extend_from_slice(&addr.to_be_bytes());
            buf.extend_from_slice(&qty.to_be_bytes());
        }
        WriteSingleCoil(addr, coil) => {
            buf.extend_from_slice(&addr.to_be_bytes());
            buf.extend_from_slice(&coil_word(*coil).to_be_bytes());
        }
        WriteSingleRegister(addr, word) => {
            buf.extend_from_slice(&addr.to_be_bytes());
            buf.extend_from_slice(&word.to_be_bytes());
        }
        WriteMultipleCoils(addr, coils) => {
            check_coil_quantity(coils.len(), 1968)?;
            buf.extend_from_slice(&addr.to_be_bytes());
            buf.extend_from_slice(&(coils.len() as u16).to_be_bytes());
            let packed = pack_coils(coils);
            buf.push(packed.len() as u8);
            buf.extend_from_slice(&packed);
        }
        WriteMultipleRegisters(addr, words) => {
            check_coil_quantity(words.len(), 123)?;
            buf.extend_from_slice(&addr.to_be_bytes());
            buf.extend_from_slice(&(words.len() as u16).to_be_bytes());
            let packed = pack_words(words);
            buf.push(packed.len() as u8);
            buf.extend_from_slice(&packed);
        }
        MaskWriteRegister(addr, and_mask, or_mask) => {
            buf.extend_from_slice(&addr.to_be_bytes());
            buf.extend_from_slice(&and_mask.to_be_bytes());
            buf.extend_from_slice(&or_mask.to_be_bytes());
        }
        ReadWriteMultipleRegisters(read_addr, read_qty, write_addr, write_words) => {
            check_coil_quantity(*read_qty as usize, 125)?;
            check_coil_quantity(write_words.len(), 121)?;
            buf.extend_from_slice(&read_addr.to_be_bytes());
            buf.extend_from_slice(&read_qty.to_be_bytes());
            buf.extend_from_slice(&write_addr.to_be_bytes());
            buf.extend_from_slice(&(write_words.len() as u16).to_be_bytes());
            let packed = pack_words(write_words);
            buf.push(packed.len() as u8);
            buf.extend_from_slice(&packed);
        }
        Custom(_, data) => buf.extend_from_slice(data),
        Disconnect => {}
    }
    Ok(buf)
}

/// Decode PDU bytes received on the wire into a `Request`, validating
/// quantity ranges and byte-count consistency along the way. Validation
/// failures map onto the Modbus exception the server should reply with.
pub(crate) fn decode_request(bytes: &[u8]) -> Result<Request, ExceptionResponse> {
    let fc = *bytes.first().ok_or(ExceptionResponse {
        function: 0,
        exception: Exception::IllegalFunction,
    })?;
    let illegal_value = || ExceptionResponse {
        function: fc,
        exception: Exception::IllegalDataValue,
    };
    let malformed = || ExceptionResponse {
        function: fc,
        exception: Exception::IllegalDataValue,
    };
    let body = &bytes[1..];
    let req = match fc {
        0x01 | 0x02 => {
            if body.len() != 4 {
                return Err(malformed());
            }
            let addr = BigEndian::read_u16(&body[0..2]);
            let qty = BigEndian::read_u16(&body[2..4]);
            if qty == 0 || qty > 2000 {
                return Err(illegal_value());
            }
            if fc == 0x01 {
                Request::ReadCoils(addr, qty)
            } else {
                Request::ReadDiscreteInputs(addr, qty)
            }
        }
        0x03 | 0x04 => {
            if body.len() != 4 {
                return Err(malformed());
            }
            let addr = BigEndian::read_u16(&body[0..2]);
            let qty = BigEndian::read_u16(&body[2..4]);
            if qty == 0 || qty > 125 {
                return Err(illegal_value());
            }
            if fc == 0x03 {
                Request::ReadHoldingRegisters(addr, qty)
            } else {
                Request::ReadInputRegisters(addr, qty)
            }
        }
        0x05 => {
            if body.len() != 4 {
                return Err(malformed());
            }
            let addr = BigEndian::read_u16(&body[0..2]);
            let word = BigEndian::read_u16(&body[2..4]);
            let coil = word_to_coil(word).map_err(|_| illegal_value())?;
            Request::WriteSingleCoil(addr, coil)
        }
        0x06 => {
            if body.len() != 4 {
                return Err(malformed());
            }
            let addr = BigEndian::read_u16(&body[0..2]);
            let word = BigEndian::read_u16(&body[2..4]);
            Request::WriteSingleRegister(addr, word)
        }
        0x0F => {
            if body.len() < 5 {
                return Err(malformed());
            }
            let addr = BigEndian::read_u16(&body[0..2]);
            let qty = BigEndian::read_u16(&body[2..4]);
            let byte_count = body[4] as usize;
            if qty == 0 || qty > 1968 || byte_count != packed_coils_len(qty as usize) {
                return Err(illegal_value());
            }
            let packed = &body[5..];
            if packed.len() != byte_count {
                return Err(malformed());
            }
            Request::WriteMultipleCoils(addr, unpack_coils(packed, qty as usize))
        }
        0x10 => {
            if body.len() < 5 {
                return Err(malformed());
            }
            let addr = BigEndian::read_u16(&body[0..2]);
            let qty = BigEndian::read_u16(&body[2..4]);
            let byte_count = body[4] as usize;
            if qty == 0 || qty > 123 || byte_count != qty as usize * 2 {
                return Err(illegal_value());
            }
            let packed = &body[5..];
            let words = unpack_words(packed, qty as usize).map_err(|_| malformed())?;
            Request::WriteMultipleRegisters(addr, words)
        }
        0x16 => {
            if body.len() != 6 {
                return Err(malformed());
            }
            let addr = BigEndian::read_u16(&body[0..2]);
            let and_mask = BigEndian::read_u16(&body[2..4]);
            let or_mask = BigEndian::read_u16(&body[4..6]);
            Request::MaskWriteRegister(addr, and_mask, or_mask)
        }
        0x17 => {
            if body.len() < 9 {
                return Err(malformed());
            }
            let read_addr = BigEndian::read_u16(&body[0..2]);
            let read_qty = BigEndian::read_u16(&body[2..4]);
            let write_addr = BigEndian::read_u16(&body[4..6]);
            let write_qty = BigEndian::read_u16(&body[6..8]);
            let byte_count = body[8] as usize;
            if read_qty == 0
                || read_qty > 125
                || write_qty == 0
                || write_qty > 121
                || byte_count != write_qty as usize * 2
            {
                return Err(illegal_value());
            }
            let packed = &body[9..];
            let words = unpack_words(packed, write_qty as usize).map_err(|_| malformed())?;
            Request::ReadWriteMultipleRegisters(read_addr, read_qty, write_addr, words)
        }
        other => {
            return Err(ExceptionResponse {
                function: other,
                exception: Exception::IllegalFunction,
            })
        }
    };
    Ok(req)
}

/// Encode a successful response's function code and payload into PDU
/// bytes (no framing envelope).
pub(crate) fn encode_response(resp: &Response) -> Vec<u8> {
    use Response::*;
    let fc = resp.function_code();
    let mut buf = vec![fc];
    match resp {
        ReadCoils(coils) | ReadDiscreteInputs(coils) => {
            let packed = pack_coils(coils);
            buf.push(packed.len() as u8);
            buf.extend_from_slice(&packed);
        }
        ReadInputRegisters(words) | ReadHoldingRegisters(words) => {
            let packed = pack_words(words);
            buf.push(packed.len() as u8);
            buf.extend_from_slice(&packed);
        }
        WriteSingleCoil(addr) => {
            buf.extend_from_slice(&addr.to_be_bytes());
        }
        WriteSingleRegister(addr, word) => {
            buf.extend_from_slice(&addr.to_be_bytes());
            buf.extend_from_slice(&word.to_be_bytes());
        }
        WriteMultipleCoils(addr, qty) | WriteMultipleRegisters(addr, qty) => {
            buf.extend_from_slice(&addr.to_be_bytes());
            buf.extend_from_slice(&qty.to_be_bytes());
        }
        MaskWriteRegister(addr, and_mask, or_mask) => {
            buf.extend_from_slice(&addr.to_be_bytes());
            buf.extend_from_slice(&and_mask.to_be_bytes());
            buf.extend_from_slice(&or_mask.to_be_bytes());
        }
        ReadWriteMultipleRegisters(words) => {
            let packed = pack_words(words);
            buf.push(packed.len() as u8);
            buf.extend_from_slice(&packed);
        }
        Custom(_, data) => buf.extend_from_slice(data),
    }
    buf
}

pub(crate) fn encode_exception(exc: &ExceptionResponse) -> Vec<u8> {
    vec![exc.function | 0x80, exc.exception.code()]
}

/// Decode PDU bytes carrying a response (success or exception). The
/// function code in the first byte disambiguates the shape, including
/// whether this is an exception (`function | 0x80`).
pub(crate) fn decode_response(bytes: &[u8]) -> Result<Result<Response, ExceptionResponse>, Error> {
    let fc = *bytes
        .first()
        .ok_or_else(|| Error::frame("empty response PDU"))?;
    let body = &bytes[1..];

    if fc & 0x80 != 0 {
        if body.len() != 1 {
            return Err(Error::frame("malformed exception response"));
        }
        let exception = Exception::from_code(body[0])
            .ok_or_else(|| Error::protocol(format!("unknown exception code {:#04x}", body[0])))?;
        return Ok(Err(ExceptionResponse {
            function: fc & 0x7F,
            exception,
        }));
    }

    let resp = match fc {
        0x01 | 0x02 => {
            let byte_count = *body
                .first()
                .ok_or_else(|| Error::frame("truncated response"))? as usize;
            let packed = body.get(1..1 + byte_count).ok_or_else(|| {
                Error::frame("response byte count does not match payload length")
            })?;
            let coils = unpack_coils(packed, byte_count * 8);
            if fc == 0x01 {
                Response::ReadCoils(coils)
            } else {
                Response::ReadDiscreteInputs(coils)
            }
        }
        0x03 | 0x04 | 0x17 => {
            let byte_count = *body
                .first()
                .ok_or_else(|| Error::frame("truncated response"))? as usize;
            let packed = body.get(1..1 + byte_count).ok_or_else(|| {
                Error::frame("response byte count does not match payload length")
            })?;
            let words = unpack_words(packed, byte_count / 2)?;
            match fc {
                0x03 => Response::ReadHoldingRegisters(words),
                0x04 => Response::ReadInputRegisters(words),
                _ => Response::ReadWriteMultipleRegisters(words),
            }
        }
        0x05 => {
            if body.len() != 4 {
                return Err(Error::frame("malformed write-single-coil response"));
            }
            Response::WriteSingleCoil(BigEndian::read_u16(&body[0..2]))
        }
        0x06 => {
            if body.len() != 4 {
                return Err(Error::frame("malformed write-single-register response"));
            }
            Response::WriteSingleRegister(
                BigEndian::read_u16(&body[0..2]),
                BigEndian::read_u16(&body[2..4]),
            )
        }
        0x0F => {
            if body.len() != 4 {
                return Err(Error::frame("malformed write-multiple-coils response"));
            }
            Response::WriteMultipleCoils(
                BigEndian::read_u16(&body[0..2]),
                BigEndian::read_u16(&body[2..4]),
            )
        }
        0x10 => {
            if body.len() != 4 {
                return Err(Error::frame("malformed write-multiple-registers response"));
            }
            Response::WriteMultipleRegisters(
                BigEndian::read_u16(&body[0..2]),
                BigEndian::read_u16(&body[2..4]),
            )
        }
        0x16 => {
            if body.len() != 6 {
                return Err(Error::frame("malformed mask-write-register response"));
            }
            Response::MaskWriteRegister(
                BigEndian::read_u16(&body[0..2]),
                BigEndian::read_u16(&body[2..4]),
                BigEndian::read_u16(&body[4..6]),
            )
        }
        other => Response::Custom(other, body.to_vec()),
    };
    Ok(Ok(resp))
}

/// `result = (current AND and_mask) OR (or_mask AND NOT and_mask)`.
pub fn mask_write(current: u16, and_mask: u16, or_mask: u16) -> u16 {
    (current & and_mask) | (or_mask & !and_mask)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_unpack_coils_roundtrip() {
        let coils = vec![true, false, true, true, false, false, false, true, true];
        let packed = pack_coils(&coils);
        assert_eq!(packed.len(), packed_coils_len(coils.len()));
        let unpacked = unpack_coils(&packed, coils.len());
        assert_eq!(unpacked, coils);
    }

    #[test]
    fn mask_write_matches_spec_example() {
        assert_eq!(mask_write(0x1234, 0xFF0F, 0x00A0), 0x12A4);
    }

    #[test]
    fn encode_decode_read_holding_registers_request() {
        let req = Request::ReadHoldingRegisters(0, 4);
        let bytes = encode_request(&req).unwrap();
        assert_eq!(bytes, vec![0x03, 0x00, 0x00, 0x00, 0x04]);
        let decoded = decode_request(&bytes).unwrap();
        assert_eq!(decoded, req);
    }

    #[test]
    fn decode_basic_read_response() {
        let bytes = [0x03, 0x08, 0x12, 0x34, 0x56, 0x78, 0xDE, 0xAD, 0xBE, 0xEF];
        let resp = decode_response(&bytes).unwrap().unwrap();
        assert_eq!(
            resp,
            Response::ReadHoldingRegisters(vec![0x1234, 0x5678, 0xDEAD, 0xBEEF])
        );
    }

    #[test]
    fn decode_exception_response() {
        let bytes = [0x83, 0x02];
        let resp = decode_response(&bytes).unwrap();
        assert_eq!(
            resp,
            Err(ExceptionResponse {
                function: 0x03,
                exception: Exception::IllegalDataAddress,
            })
        );
    }

    #[test]
    fn read_coils_quantity_zero_is_rejected() {
        let err = encode_request(&Request::ReadCoils(0, 0)).unwrap_err();
        assert!(matches!(err, Error::Value(_)));
    }

    #[test]
    fn read_coils_quantity_over_2000_is_rejected_on_decode() {
        let mut bytes = vec![0x01, 0x00, 0x00];
        bytes.extend_from_slice(&2001u16.to_be_bytes());
        let err = decode_request(&bytes).unwrap_err();
        assert_eq!(err.exception, Exception::IllegalDataValue);
    }

    #[test]
    fn write_multiple_coils_byte_count_mismatch_is_rejected() {
        let bytes = vec![0x0F, 0x00, 0x00, 0x00, 0x08, 0x02, 0xFF];
        let err = decode_request(&bytes).unwrap_err();
        assert_eq!(err.exception, Exception::IllegalDataValue);
    }
}
