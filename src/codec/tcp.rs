// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::io::{Error, ErrorKind, Result};

use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::pdu;
use crate::frame::tcp::*;
use crate::frame::{ExceptionResponse, RequestPdu, ResponsePdu};

const HEADER_LEN: usize = 7;

const PROTOCOL_ID: u16 = 0x0000;

#[derive(Debug, Default, PartialEq)]
pub(crate) struct AduDecoder;

impl Decoder for AduDecoder {
    type Item = (Header, Bytes);
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<(Header, Bytes)>> {
        if buf.len() < HEADER_LEN {
            return Ok(None);
        }

        let len = usize::from(BigEndian::read_u16(&buf[4..6]));
        let pdu_len = if len > 0 {
            // len counts the unit-id byte plus the PDU
            len - 1
        } else {
            return Err(Error::new(
                ErrorKind::InvalidData,
                format!("invalid MBAP length field: {len}"),
            ));
        };
        if buf.len() < HEADER_LEN + pdu_len {
            return Ok(None);
        }

        let header_data = buf.split_to(HEADER_LEN);

        let protocol_id = BigEndian::read_u16(&header_data[2..4]);
        if protocol_id != PROTOCOL_ID {
            return Err(Error::new(
                ErrorKind::InvalidData,
                format!(
                    "invalid protocol identifier: expected = {PROTOCOL_ID}, actual = {protocol_id}"
                ),
            ));
        }

        let transaction_id = BigEndian::read_u16(&header_data[0..2]);
        let unit_id = header_data[6];

        let header = Header {
            transaction_id,
            unit_id,
        };

        let pdu_data = buf.split_to(pdu_len).freeze();

        Ok(Some((header, pdu_data)))
    }
}

#[derive(Debug, Default, PartialEq)]
pub(crate) struct ClientCodec {
    decoder: AduDecoder,
}

#[derive(Debug, Default, PartialEq)]
pub(crate) struct ServerCodec {
    decoder: AduDecoder,
}

impl Decoder for ClientCodec {
    type Item = ResponseAdu;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<ResponseAdu>> {
        let Some((hdr, pdu_data)) = self.decoder.decode(buf)? else {
            return Ok(None);
        };
        let result = pdu::decode_response(&pdu_data)
            .map_err(|err| Error::new(ErrorKind::InvalidData, err.to_string()))?;
        Ok(Some(ResponseAdu {
            hdr,
            pdu: ResponsePdu(result),
        }))
    }
}

impl Decoder for ServerCodec {
    type Item = RequestAdu;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<RequestAdu>> {
        let Some((hdr, pdu_data)) = self.decoder.decode(buf)? else {
            return Ok(None);
        };
        let pdu = match pdu::decode_request(&pdu_data) {
            Ok(req) => RequestPdu(Ok(req)),
            Err(exc) => RequestPdu(Err(exc)),
        };
        Ok(Some(RequestAdu {
            hdr,
            pdu,
            disconnect: false,
        }))
    }
}

impl Encoder<RequestAdu> for ClientCodec {
    type Error = Error;

    fn encode(&mut self, adu: RequestAdu, buf: &mut BytesMut) -> Result<()> {
        if adu.disconnect {
            // The disconnect happens implicitly after letting this request
            // fail by returning an error, which drops the attached
            // transport.
            return Err(Error::new(
                ErrorKind::NotConnected,
                "disconnecting - not an error",
            ));
        }
        let RequestAdu { hdr, pdu, .. } = adu;
        let req = pdu.0.map_err(|exc: ExceptionResponse| {
            Error::new(ErrorKind::InvalidInput, exc.to_string())
        })?;
        let pdu_data = pdu::encode_request(&req)
            .map_err(|err| Error::new(ErrorKind::InvalidInput, err.to_string()))?;
        buf.reserve(pdu_data.len() + HEADER_LEN);
        buf.put_u16(hdr.transaction_id);
        buf.put_u16(PROTOCOL_ID);
        buf.put_u16(u16::try_from(pdu_data.len() + 1).unwrap_or(u16::MAX));
        buf.put_u8(hdr.unit_id);
        buf.put_slice(&pdu_data);
        Ok(())
    }
}

impl Encoder<ResponseAdu> for ServerCodec {
    type Error = Error;

    fn encode(&mut self, adu: ResponseAdu, buf: &mut BytesMut) -> Result<()> {
        let ResponseAdu { hdr, pdu } = adu;
        let pdu_data = match pdu.0 {
            Ok(resp) => pdu::encode_response(&resp),
            Err(exc) => pdu::encode_exception(&exc),
        };
        buf.reserve(pdu_data.len() + HEADER_LEN);
        buf.put_u16(hdr.transaction_id);
        buf.put_u16(PROTOCOL_ID);
        buf.put_u16(u16::try_from(pdu_data.len() + 1).unwrap_or(u16::MAX));
        buf.put_u8(hdr.unit_id);
        buf.put_slice(&pdu_data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Exception, Request, Response};

    const TRANSACTION_ID: TransactionId = 0x1001;
    const UNIT_ID: UnitId = 0xFE;

    #[test]
    fn decode_header_fragment() {
        let mut codec = ClientCodec::default();
        let mut buf = BytesMut::from(&[0x00, 0x11, 0x00, 0x00, 0x00, 0x00][..]);
        let res = codec.decode(&mut buf).unwrap();
        assert!(res.is_none());
        assert_eq!(buf.len(), 6);
    }

    #[test]
    fn decode_partly_received_message() {
        let mut codec = ClientCodec::default();
        let mut buf = BytesMut::from(
            &[
                0x10, 0x01, // transaction id
                0x00, 0x00, // protocol id
                0x00, 0x03, // length
                UNIT_ID, 0x02,
            ][..],
        );
        let res = codec.decode(&mut buf).unwrap();
        assert!(res.is_none());
        assert_eq!(buf.len(), 8);
    }

    #[test]
    fn decode_exception_message() {
        let mut codec = ClientCodec::default();
        let mut buf = BytesMut::from(
            &[
                0x10, 0x01, 0x00, 0x00, 0x00, 0x03, UNIT_ID, 0x82, // exception = 0x80+0x02
                0x03,
            ][..],
        );
        let ResponseAdu { hdr, pdu } = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(hdr.transaction_id, TRANSACTION_ID);
        assert_eq!(hdr.unit_id, UNIT_ID);
        assert_eq!(
            pdu.0,
            Err(ExceptionResponse {
                function: 0x02,
                exception: Exception::IllegalDataValue,
            })
        );
    }

    #[test]
    fn decode_with_invalid_protocol_id() {
        let mut codec = ClientCodec::default();
        let mut buf = BytesMut::from(
            &[0x10, 0x01, 0x33, 0x12, 0x00, 0x03, UNIT_ID, 0x82, 0x03][..],
        );
        let err = codec.decode(&mut buf).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
        assert!(format!("{err}").contains("invalid protocol identifier"));
    }

    #[test]
    fn encode_read_request() {
        let mut codec = ClientCodec::default();
        let mut buf = BytesMut::new();
        let req = Request::ReadInputRegisters(0x23, 5);
        let hdr = Header {
            transaction_id: TRANSACTION_ID,
            unit_id: UNIT_ID,
        };
        let adu = RequestAdu {
            hdr,
            pdu: req.into(),
            disconnect: false,
        };
        codec.encode(adu, &mut buf).unwrap();
        assert_eq!(&buf[0..2], &0x1001u16.to_be_bytes());
        assert_eq!(&buf[2..4], &0u16.to_be_bytes());
        assert_eq!(&buf[4..6], &6u16.to_be_bytes());
        assert_eq!(buf[6], UNIT_ID);
        assert_eq!(&buf[7..], &[0x04, 0x00, 0x23, 0x00, 0x05]);
    }

    #[test]
    fn basic_read_scenario_bytes() {
        let mut codec = ServerCodec::default();
        let mut buf = BytesMut::from(
            &[0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x04][..],
        );
        let RequestAdu { hdr, pdu, .. } = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(hdr.transaction_id, 1);
        assert_eq!(hdr.unit_id, 1);
        assert_eq!(pdu.0, Ok(Request::ReadHoldingRegisters(0, 4)));

        let mut out = BytesMut::new();
        let mut server_codec = ServerCodec::default();
        let response = Response::ReadHoldingRegisters(vec![0x1234, 0x5678, 0xDEAD, 0xBEEF]);
        let adu = ResponseAdu {
            hdr,
            pdu: response.into(),
        };
        server_codec.encode(adu, &mut out).unwrap();
        assert_eq!(
            &out[..],
            &[
                0x00, 0x01, 0x00, 0x00, 0x00, 0x0B, 0x01, 0x03, 0x08, 0x12, 0x34, 0x56, 0x78,
                0xDE, 0xAD, 0xBE, 0xEF
            ]
        );
    }
}
