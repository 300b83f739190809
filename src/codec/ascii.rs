// SPDX-License-Identifier: MIT OR Apache-2.0

//! Modbus ASCII framing: `:`, then hex-encoded `slave-id | PDU | LRC`, then
//! a trailing `CRLF`. Grounded on [`super::rtu`]'s drop-and-resync decoder,
//! adapted from a binary byte stream to a text-delimited one.

use std::io::{Error, ErrorKind, Result};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::pdu;
use crate::frame::ascii::*;
use crate::frame::{RequestPdu, ResponsePdu};
use crate::slave::SlaveId;

const START: u8 = b':';
const CR: u8 = b'\r';
const LF: u8 = b'\n';

fn hex_decode(hex: &[u8]) -> Result<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return Err(Error::new(
            ErrorKind::InvalidData,
            "odd number of hex digits in ASCII frame",
        ));
    }
    let mut out = Vec::with_capacity(hex.len() / 2);
    for pair in hex.chunks_exact(2) {
        let s = std::str::from_utf8(pair)
            .map_err(|_| Error::new(ErrorKind::InvalidData, "non-ASCII byte in frame"))?;
        let byte = u8::from_str_radix(s, 16)
            .map_err(|_| Error::new(ErrorKind::InvalidData, "invalid hex digit in frame"))?;
        out.push(byte);
    }
    Ok(out)
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        write!(s, "{b:02X}").unwrap();
    }
    s
}

fn calc_lrc(data: &[u8]) -> u8 {
    let sum: u8 = data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    (!sum).wrapping_add(1)
}

fn check_lrc(data: &[u8], expected: u8) -> Result<()> {
    let actual = calc_lrc(data);
    if actual != expected {
        return Err(Error::new(
            ErrorKind::InvalidData,
            format!("Invalid LRC: expected = 0x{expected:02X}, actual = 0x{actual:02X}"),
        ));
    }
    Ok(())
}

/// Scans `buf` for a complete `:...CRLF` frame, decoding the hex payload and
/// verifying its LRC. Drops bytes up to and including a malformed frame so a
/// following valid frame can still be recovered, mirroring the RTU codec's
/// resync behaviour.
fn decode_frame(buf: &mut BytesMut) -> Result<Option<(SlaveId, Bytes)>> {
    loop {
        let Some(start) = buf.iter().position(|&b| b == START) else {
            // No frame start in the buffer yet; keep everything in case a
            // `:` arrives split across reads, but drop pure noise.
            if !buf.is_empty() {
                buf.clear();
            }
            return Ok(None);
        };
        if start > 0 {
            log::debug!("Dropping {start} byte(s) preceding ASCII frame start");
            buf.advance(start);
        }

        let Some(lf_rel) = buf.iter().position(|&b| b == LF) else {
            // End of frame not seen yet.
            return Ok(None);
        };
        if lf_rel == 0 || buf[lf_rel - 1] != CR {
            return Err(Error::new(
                ErrorKind::InvalidData,
                "ASCII frame missing CRLF terminator",
            ));
        }

        let frame = buf.split_to(lf_rel + 1);
        let hex = &frame[1..lf_rel - 1];

        let decoded = match hex_decode(hex) {
            Ok(bytes) => bytes,
            Err(err) => {
                log::warn!("Failed to decode ASCII frame: {err}");
                continue;
            }
        };
        if decoded.len() < 2 {
            log::warn!("ASCII frame too short: {} byte(s)", decoded.len());
            continue;
        }
        let (body, lrc_byte) = decoded.split_at(decoded.len() - 1);
        if let Err(err) = check_lrc(body, lrc_byte[0]) {
            log::warn!("Failed to decode ASCII frame: {err}");
            continue;
        }
        let slave_id = body[0];
        let pdu_data = Bytes::copy_from_slice(&body[1..]);
        return Ok(Some((slave_id, pdu_data)));
    }
}

#[derive(Debug, Default, Eq, PartialEq)]
pub(crate) struct ClientCodec;

#[derive(Debug, Default, Eq, PartialEq)]
pub(crate) struct ServerCodec;

impl Decoder for ClientCodec {
    type Item = ResponseAdu;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<ResponseAdu>> {
        let Some((slave_id, pdu_data)) = decode_frame(buf)? else {
            return Ok(None);
        };
        let hdr = Header { slave_id };
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
        let Some((slave_id, pdu_data)) = decode_frame(buf)? else {
            return Ok(None);
        };
        let hdr = Header { slave_id };
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

fn encode_frame(slave_id: SlaveId, pdu_data: &[u8], buf: &mut BytesMut) {
    let mut body = Vec::with_capacity(1 + pdu_data.len());
    body.push(slave_id);
    body.extend_from_slice(pdu_data);
    let lrc = calc_lrc(&body);
    body.push(lrc);

    let hex = hex_encode(&body);
    buf.reserve(1 + hex.len() + 2);
    buf.put_u8(START);
    buf.put_slice(hex.as_bytes());
    buf.put_u8(CR);
    buf.put_u8(LF);
}

impl Encoder<RequestAdu> for ClientCodec {
    type Error = Error;

    fn encode(&mut self, adu: RequestAdu, buf: &mut BytesMut) -> Result<()> {
        if adu.disconnect {
            return Err(Error::new(
                ErrorKind::NotConnected,
                "Disconnecting - not an error",
            ));
        }
        let RequestAdu { hdr, pdu, .. } = adu;
        let req = pdu
            .0
            .map_err(|exc| Error::new(ErrorKind::InvalidInput, exc.to_string()))?;
        let pdu_data = pdu::encode_request(&req)
            .map_err(|err| Error::new(ErrorKind::InvalidInput, err.to_string()))?;
        encode_frame(hdr.slave_id, &pdu_data, buf);
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
        encode_frame(hdr.slave_id, &pdu_data, buf);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Request, Response};

    #[test]
    fn lrc_matches_known_vector() {
        // :0103006B00037E\r\n is a well known Modbus ASCII read-holding-registers request
        let body = [0x01, 0x03, 0x00, 0x6B, 0x00, 0x03];
        assert_eq!(calc_lrc(&body), 0x7E);
    }

    #[test]
    fn encode_then_decode_request_roundtrip() {
        let mut client = ClientCodec::default();
        let mut server = ServerCodec::default();
        let mut buf = BytesMut::new();

        let req = Request::ReadHoldingRegisters(0x6B, 3);
        let hdr = Header { slave_id: 0x01 };
        let adu = RequestAdu {
            hdr,
            pdu: req.clone().into(),
            disconnect: false,
        };
        client.encode(adu, &mut buf).unwrap();
        assert_eq!(&buf[..], b":0103006B00037E\r\n");

        let decoded = server.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.hdr.slave_id, 0x01);
        assert_eq!(decoded.pdu.0, Ok(req));
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_rejects_bad_lrc() {
        let mut codec = ClientCodec::default();
        let mut buf = BytesMut::from(&b":0103006B00037F\r\n"[..]);
        let res = codec.decode(&mut buf).unwrap();
        assert!(res.is_none());
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_skips_noise_before_start() {
        let mut codec = ClientCodec::default();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(b"garbage");
        buf.extend_from_slice(b":0103006B00037E\r\n");
        let decoded = codec.decode(&mut buf).unwrap();
        assert!(decoded.is_some());
        assert!(buf.is_empty());
    }

    #[test]
    fn encode_response() {
        let mut codec = ServerCodec::default();
        let mut buf = BytesMut::new();
        let hdr = Header { slave_id: 0x01 };
        let response = Response::ReadHoldingRegisters(vec![0x1234]);
        let adu = ResponseAdu {
            hdr,
            pdu: response.into(),
        };
        codec.encode(adu, &mut buf).unwrap();
        assert!(buf.starts_with(b":"));
        assert!(buf.ends_with(b"\r\n"));
    }
}
