//! Minimal outbound RTMP publish client (boundary component B2).
//!
//! Grounded in `original_source/trunk/src/app/srs_app_rtsp.cpp`'s
//! `SrsSimpleRtmpClient` usage (`connect()` / `publish()` /
//! `send_and_free_message()`): a simple (non-encrypted) handshake, the
//! `connect`/`createStream`/`publish` AMF0 command sequence, then raw
//! chunked audio/video message writes. No control-plane generality beyond
//! that — per the Non-goals, this is a boundary, not a general RTMP
//! client library (see `DESIGN.md` for why this is hand-rolled rather
//! than a pulled-in crate).
//!
//! Known simplification: outgoing messages never emit the RTMP extended
//! timestamp field, so a single publish session cannot run past ~4.66
//! hours (2^24 ms) without timestamp wraparound. Acceptable for this
//! boundary's scope; a full RTMP client would need it.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use crate::error::Error;
use crate::rtmp::amf::{self, AmfValue};

const CHUNK_STREAM_ID: u8 = 3;
const DEFAULT_CHUNK_SIZE: usize = 128;
const WRITE_CHUNK_SIZE: u32 = 4096;

const MSG_TYPE_SET_CHUNK_SIZE: u8 = 1;
const MSG_TYPE_AUDIO: u8 = 8;
const MSG_TYPE_VIDEO: u8 = 9;
const MSG_TYPE_COMMAND_AMF0: u8 = 20;

/// Parsed `rtmp://host[:port]/app/stream` target.
pub struct RtmpUrl {
    pub host: String,
    pub port: u16,
    pub app: String,
    pub stream: String,
}

impl RtmpUrl {
    pub fn parse(url: &str) -> Result<Self, Error> {
        let rest = url.strip_prefix("rtmp://").ok_or_else(|| {
            Error::SocketConnect(format!("not an rtmp:// url: {url}"))
        })?;
        let mut parts = rest.splitn(2, '/');
        let authority = parts.next().unwrap_or_default();
        let path = parts.next().unwrap_or_default();

        let (host, port) = match authority.split_once(':') {
            Some((h, p)) => (h.to_string(), p.parse().unwrap_or(1935)),
            None => (authority.to_string(), 1935),
        };

        let (app, stream) = path.split_once('/').unwrap_or((path, ""));
        if app.is_empty() {
            return Err(Error::SocketConnect(format!("rtmp url missing app: {url}")));
        }

        Ok(RtmpUrl {
            host,
            port,
            app: app.to_string(),
            stream: stream.to_string(),
        })
    }
}

struct ChunkStreamState {
    timestamp: u32,
    length: usize,
    type_id: u8,
    stream_id: u32,
    partial: Vec<u8>,
}

impl Default for ChunkStreamState {
    fn default() -> Self {
        Self {
            timestamp: 0,
            length: 0,
            type_id: 0,
            stream_id: 0,
            partial: Vec::new(),
        }
    }
}

/// One outbound RTMP publish session: handshake already done, `connect`/
/// `createStream`/`publish` already exchanged, ready for `send_video`/
/// `send_audio`.
pub struct RtmpClient {
    socket: TcpStream,
    message_stream_id: u32,
    read_chunk_size: usize,
    read_states: HashMap<u8, ChunkStreamState>,
}

impl RtmpClient {
    /// Connect, handshake, and run the `connect`/`createStream`/`publish`
    /// sequence. Returns a client ready to send media.
    pub fn connect(
        url: &RtmpUrl,
        connect_timeout: Duration,
        send_timeout: Duration,
    ) -> Result<Self, Error> {
        let addr = format!("{}:{}", url.host, url.port);
        let socket_addr = addr
            .parse()
            .or_else(|_| {
                use std::net::ToSocketAddrs;
                addr.to_socket_addrs()
                    .ok()
                    .and_then(|mut it| it.next())
                    .ok_or_else(|| ())
            })
            .map_err(|_| Error::SocketConnect(format!("could not resolve {addr}")))?;

        let socket = TcpStream::connect_timeout(&socket_addr, connect_timeout)
            .map_err(|e| Error::SocketConnect(format!("{addr}: {e}")))?;
        socket
            .set_read_timeout(Some(send_timeout))
            .map_err(|e| Error::SocketCreate(e.to_string()))?;
        socket
            .set_write_timeout(Some(send_timeout))
            .map_err(|e| Error::SocketCreate(e.to_string()))?;

        let mut client = Self {
            socket,
            message_stream_id: 0,
            read_chunk_size: DEFAULT_CHUNK_SIZE,
            read_states: HashMap::new(),
        };

        client.handshake()?;
        client.set_chunk_size(WRITE_CHUNK_SIZE)?;
        client.command_connect(url)?;
        let stream_id = client.command_create_stream()?;
        client.message_stream_id = stream_id;
        client.command_publish(&url.stream)?;

        Ok(client)
    }

    fn handshake(&mut self) -> Result<(), Error> {
        let mut c1 = vec![0u8; 1536];
        c1[8..].iter_mut().enumerate().for_each(|(i, b)| *b = (i % 256) as u8);

        self.socket
            .write_all(&[3])
            .and_then(|_| self.socket.write_all(&c1))
            .map_err(Error::Io)?;

        let mut s0 = [0u8; 1];
        self.socket.read_exact(&mut s0).map_err(Error::Io)?;
        let mut s1 = vec![0u8; 1536];
        self.socket.read_exact(&mut s1).map_err(Error::Io)?;

        // Simple handshake: C2 echoes S1 verbatim, no digest validation.
        self.socket.write_all(&s1).map_err(Error::Io)?;

        let mut s2 = vec![0u8; 1536];
        self.socket.read_exact(&mut s2).map_err(Error::Io)?;

        Ok(())
    }

    fn set_chunk_size(&mut self, size: u32) -> Result<(), Error> {
        self.write_message(MSG_TYPE_SET_CHUNK_SIZE, 0, 0, &size.to_be_bytes())?;
        Ok(())
    }

    fn command_connect(&mut self, url: &RtmpUrl) -> Result<(), Error> {
        let tc_url = format!("rtmp://{}:{}/{}", url.host, url.port, url.app);
        let command_object = AmfValue::Object(vec![
            ("app".into(), AmfValue::String(url.app.clone())),
            ("type".into(), AmfValue::String("nonprivate".into())),
            ("tcUrl".into(), AmfValue::String(tc_url)),
        ]);
        let body = amf::encode_command("connect", 1.0, command_object, &[]);
        self.write_message(MSG_TYPE_COMMAND_AMF0, 0, 0, &body)?;
        self.expect_result("connect", 1.0)?;
        Ok(())
    }

    fn command_create_stream(&mut self) -> Result<u32, Error> {
        let body = amf::encode_command("createStream", 2.0, AmfValue::Null, &[]);
        self.write_message(MSG_TYPE_COMMAND_AMF0, 0, 0, &body)?;
        let args = self.expect_result("createStream", 2.0)?;
        let stream_id = args
            .get(1)
            .and_then(AmfValue::as_f64)
            .ok_or_else(|| Error::SocketConnect("createStream: missing stream id".into()))?;
        Ok(stream_id as u32)
    }

    fn command_publish(&mut self, stream_key: &str) -> Result<(), Error> {
        let body = amf::encode_command(
            "publish",
            3.0,
            AmfValue::Null,
            &[
                AmfValue::String(stream_key.to_string()),
                AmfValue::String("live".into()),
            ],
        );
        self.write_message(MSG_TYPE_COMMAND_AMF0, 0, self.message_stream_id, &body)?;
        // onStatus NetStream.Publish.Start confirmation; any reply at all
        // is accepted as success, matching this boundary's "no
        // control-plane generality beyond publish()" scope.
        self.read_message()?;
        Ok(())
    }

    /// Wait for the `_result`/`_error` command reply matching `transaction_id`,
    /// returning its argument list. Intermediate messages (e.g. `onBWDone`,
    /// protocol control) are read and discarded.
    fn expect_result(&mut self, what: &str, transaction_id: f64) -> Result<Vec<AmfValue>, Error> {
        for _ in 0..16 {
            let (type_id, _stream_id, payload) = self.read_message()?;
            if type_id != MSG_TYPE_COMMAND_AMF0 {
                continue;
            }
            let (name, txn, args) = amf::decode_command(&payload)?;
            if (txn - transaction_id).abs() > f64::EPSILON {
                continue;
            }
            if name == "_error" {
                return Err(Error::SocketConnect(format!("{what} rejected by peer")));
            }
            return Ok(args);
        }
        Err(Error::SocketTimeout(format!("no reply to {what}")))
    }

    /// Send one H.264 AVC message (sequence header or NALU frame).
    pub fn send_video(&mut self, dts_ms: u32, payload: &[u8]) -> Result<(), Error> {
        self.write_message(MSG_TYPE_VIDEO, dts_ms, self.message_stream_id, payload)
    }

    /// Send one AAC audio message (sequence header or raw frame).
    pub fn send_audio(&mut self, dts_ms: u32, payload: &[u8]) -> Result<(), Error> {
        self.write_message(MSG_TYPE_AUDIO, dts_ms, self.message_stream_id, payload)
    }

    fn write_message(
        &mut self,
        type_id: u8,
        timestamp: u32,
        message_stream_id: u32,
        payload: &[u8],
    ) -> Result<(), Error> {
        let mut header = Vec::with_capacity(12);
        header.push(CHUNK_STREAM_ID & 0x3f); // fmt=0 in top 2 bits (already 0)
        let ts = timestamp.min(0x00ff_ffff);
        header.extend_from_slice(&ts.to_be_bytes()[1..]);
        header.extend_from_slice(&(payload.len() as u32).to_be_bytes()[1..]);
        header.push(type_id);
        header.extend_from_slice(&message_stream_id.to_le_bytes());

        self.socket.write_all(&header).map_err(Error::Io)?;

        let continuation = 0xC0 | (CHUNK_STREAM_ID & 0x3f);
        for (i, chunk) in payload.chunks(WRITE_CHUNK_SIZE as usize).enumerate() {
            if i > 0 {
                self.socket.write_all(&[continuation]).map_err(Error::Io)?;
            }
            self.socket.write_all(chunk).map_err(Error::Io)?;
        }
        Ok(())
    }

    fn read_message(&mut self) -> Result<(u8, u32, Vec<u8>), Error> {
        loop {
            let mut first = [0u8; 1];
            self.socket.read_exact(&mut first).map_err(Error::Io)?;
            let fmt = first[0] >> 6;
            let mut csid = (first[0] & 0x3f) as u32;
            if csid == 0 {
                let mut b = [0u8; 1];
                self.socket.read_exact(&mut b).map_err(Error::Io)?;
                csid = 64 + b[0] as u32;
            } else if csid == 1 {
                let mut b = [0u8; 2];
                self.socket.read_exact(&mut b).map_err(Error::Io)?;
                csid = 64 + b[0] as u32 + (b[1] as u32) * 256;
            }
            let csid = csid as u8;

            let state = self.read_states.entry(csid).or_default();

            match fmt {
                0 => {
                    let mut hdr = [0u8; 11];
                    self.socket.read_exact(&mut hdr).map_err(Error::Io)?;
                    let ts = u32::from_be_bytes([0, hdr[0], hdr[1], hdr[2]]);
                    let len = u32::from_be_bytes([0, hdr[3], hdr[4], hdr[5]]) as usize;
                    let type_id = hdr[6];
                    let stream_id = u32::from_le_bytes([hdr[7], hdr[8], hdr[9], hdr[10]]);
                    state.timestamp = if ts == 0x00ff_ffff {
                        read_extended_timestamp(&mut self.socket)?
                    } else {
                        ts
                    };
                    state.length = len;
                    state.type_id = type_id;
                    state.stream_id = stream_id;
                    state.partial = Vec::with_capacity(len);
                }
                1 => {
                    let mut hdr = [0u8; 7];
                    self.socket.read_exact(&mut hdr).map_err(Error::Io)?;
                    let delta = u32::from_be_bytes([0, hdr[0], hdr[1], hdr[2]]);
                    let len = u32::from_be_bytes([0, hdr[3], hdr[4], hdr[5]]) as usize;
                    let type_id = hdr[6];
                    let delta = if delta == 0x00ff_ffff {
                        read_extended_timestamp(&mut self.socket)?
                    } else {
                        delta
                    };
                    state.timestamp = state.timestamp.wrapping_add(delta);
                    state.length = len;
                    state.type_id = type_id;
                    state.partial = Vec::with_capacity(len);
                }
                2 => {
                    let mut hdr = [0u8; 3];
                    self.socket.read_exact(&mut hdr).map_err(Error::Io)?;
                    let delta = u32::from_be_bytes([0, hdr[0], hdr[1], hdr[2]]);
                    let delta = if delta == 0x00ff_ffff {
                        read_extended_timestamp(&mut self.socket)?
                    } else {
                        delta
                    };
                    state.timestamp = state.timestamp.wrapping_add(delta);
                    state.partial = Vec::with_capacity(state.length);
                }
                _ => {
                    // fmt 3: continuation of the in-flight message, unless
                    // the previous message on this csid already completed
                    // — then it's a new message with an identical header.
                    if state.partial.len() >= state.length {
                        state.partial = Vec::with_capacity(state.length);
                    }
                }
            }

            let remaining = state.length.saturating_sub(state.partial.len());
            let take = remaining.min(self.read_chunk_size);
            let mut buf = vec![0u8; take];
            self.socket.read_exact(&mut buf).map_err(Error::Io)?;
            let state = self.read_states.get_mut(&csid).unwrap();
            state.partial.extend_from_slice(&buf);

            if state.partial.len() >= state.length {
                let type_id = state.type_id;
                let stream_id = state.stream_id;
                let payload = std::mem::take(&mut state.partial);

                if type_id == MSG_TYPE_SET_CHUNK_SIZE && payload.len() == 4 {
                    self.read_chunk_size =
                        u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]) as usize;
                    continue;
                }
                return Ok((type_id, stream_id, payload));
            }
        }
    }
}

fn read_extended_timestamp(socket: &mut TcpStream) -> Result<u32, Error> {
    let mut buf = [0u8; 4];
    socket.read_exact(&mut buf).map_err(Error::Io)?;
    Ok(u32::from_be_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_url_with_explicit_port() {
        let url = RtmpUrl::parse("rtmp://127.0.0.1:1936/live/mystream").unwrap();
        assert_eq!(url.host, "127.0.0.1");
        assert_eq!(url.port, 1936);
        assert_eq!(url.app, "live");
        assert_eq!(url.stream, "mystream");
    }

    #[test]
    fn parses_url_with_default_port() {
        let url = RtmpUrl::parse("rtmp://example.com/app/stream").unwrap();
        assert_eq!(url.port, 1935);
        assert_eq!(url.app, "app");
    }

    #[test]
    fn rejects_non_rtmp_scheme() {
        assert!(RtmpUrl::parse("http://example.com/app/stream").is_err());
    }

    #[test]
    fn rejects_missing_app() {
        assert!(RtmpUrl::parse("rtmp://example.com").is_err());
    }
}
