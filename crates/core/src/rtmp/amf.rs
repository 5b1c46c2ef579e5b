//! Minimal AMF0 encoder/decoder (ISO/IEC, Adobe AMF0 spec), just enough to
//! build `connect`/`createStream`/`publish` command messages and read back
//! their `_result`/`_error` replies.
//!
//! Grounded in RTMP's own command-message convention (not a teacher file —
//! the teacher has no RTMP client; see `DESIGN.md` for why this is a
//! hand-rolled boundary rather than a pulled-in crate).

use crate::error::Error;

const MARKER_NUMBER: u8 = 0x00;
const MARKER_BOOLEAN: u8 = 0x01;
const MARKER_STRING: u8 = 0x02;
const MARKER_OBJECT: u8 = 0x03;
const MARKER_NULL: u8 = 0x05;
const MARKER_OBJECT_END: [u8; 3] = [0x00, 0x00, 0x09];

/// An AMF0 value, restricted to what `connect`/`createStream`/`publish`
/// and their replies actually use.
#[derive(Debug, Clone, PartialEq)]
pub enum AmfValue {
    Number(f64),
    Boolean(bool),
    String(String),
    Null,
    Object(Vec<(String, AmfValue)>),
}

impl AmfValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AmfValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AmfValue::String(s) => Some(s),
            _ => None,
        }
    }
}

pub fn encode(value: &AmfValue, out: &mut Vec<u8>) {
    match value {
        AmfValue::Number(n) => {
            out.push(MARKER_NUMBER);
            out.extend_from_slice(&n.to_be_bytes());
        }
        AmfValue::Boolean(b) => {
            out.push(MARKER_BOOLEAN);
            out.push(*b as u8);
        }
        AmfValue::String(s) => {
            out.push(MARKER_STRING);
            encode_utf8(s, out);
        }
        AmfValue::Null => out.push(MARKER_NULL),
        AmfValue::Object(fields) => {
            out.push(MARKER_OBJECT);
            for (k, v) in fields {
                encode_utf8(k, out);
                encode(v, out);
            }
            out.extend_from_slice(&MARKER_OBJECT_END);
        }
    }
}

fn encode_utf8(s: &str, out: &mut Vec<u8>) {
    out.extend_from_slice(&(s.len() as u16).to_be_bytes());
    out.extend_from_slice(s.as_bytes());
}

/// Build a full RTMP command message body: command name, transaction id,
/// command object (or `Null`), then each extra argument in order.
pub fn encode_command(name: &str, transaction_id: f64, command_object: AmfValue, args: &[AmfValue]) -> Vec<u8> {
    let mut out = Vec::new();
    encode(&AmfValue::String(name.to_string()), &mut out);
    encode(&AmfValue::Number(transaction_id), &mut out);
    encode(&command_object, &mut out);
    for arg in args {
        encode(arg, &mut out);
    }
    out
}

/// Decode one AMF0 value, returning it plus the number of bytes consumed.
pub fn decode(buf: &[u8]) -> Result<(AmfValue, usize), Error> {
    let marker = *buf.first().ok_or_else(parse_err)?;
    match marker {
        MARKER_NUMBER => {
            let bytes: [u8; 8] = buf.get(1..9).ok_or_else(parse_err)?.try_into().unwrap();
            Ok((AmfValue::Number(f64::from_be_bytes(bytes)), 9))
        }
        MARKER_BOOLEAN => {
            let b = *buf.get(1).ok_or_else(parse_err)?;
            Ok((AmfValue::Boolean(b != 0), 2))
        }
        MARKER_STRING => {
            let (s, consumed) = decode_utf8(&buf[1..])?;
            Ok((AmfValue::String(s), 1 + consumed))
        }
        MARKER_NULL => Ok((AmfValue::Null, 1)),
        MARKER_OBJECT => {
            let mut pos = 1;
            let mut fields = Vec::new();
            loop {
                if buf[pos..].starts_with(&MARKER_OBJECT_END) {
                    pos += 3;
                    break;
                }
                let (key, key_len) = decode_utf8(&buf[pos..])?;
                pos += key_len;
                let (val, val_len) = decode(&buf[pos..])?;
                pos += val_len;
                fields.push((key, val));
            }
            Ok((AmfValue::Object(fields), pos))
        }
        _ => Err(parse_err()),
    }
}

fn decode_utf8(buf: &[u8]) -> Result<(String, usize), Error> {
    let len = u16::from_be_bytes(buf.get(0..2).ok_or_else(parse_err)?.try_into().unwrap()) as usize;
    let bytes = buf.get(2..2 + len).ok_or_else(parse_err)?;
    let s = String::from_utf8(bytes.to_vec()).map_err(|_| parse_err())?;
    Ok((s, 2 + len))
}

/// Decode a full command message: name, transaction id, and every
/// remaining value in the body.
pub fn decode_command(mut buf: &[u8]) -> Result<(String, f64, Vec<AmfValue>), Error> {
    let (name, n) = decode(buf)?;
    buf = &buf[n..];
    let (txn, n) = decode(buf)?;
    buf = &buf[n..];

    let name = name.as_str().ok_or_else(parse_err)?.to_string();
    let txn = txn.as_f64().ok_or_else(parse_err)?;

    let mut rest = Vec::new();
    while !buf.is_empty() {
        let (v, n) = decode(buf)?;
        rest.push(v);
        buf = &buf[n..];
    }
    Ok((name, txn, rest))
}

fn parse_err() -> Error {
    Error::RtmpAmf("malformed AMF0 value".into())
}
