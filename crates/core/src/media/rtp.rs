//! Inbound RTP decode and the UDP receiver (§4.5).
//!
//! Grounded in `original_source/trunk/src/app/srs_app_rtsp.cpp`'s
//! `SrsRtpConn::on_udp_packet`: chunked packets (marker bit unset)
//! accumulate into a reassembly cache; a marked packet either completes the
//! cache or, if none was pending, is delivered standalone.

use std::net::UdpSocket;
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::coroutine::CancelToken;
use crate::error::{Error, ParseErrorKind};

/// A decoded RTP fixed header (RFC 3550 §5.1) plus its payload.
///
/// `chunked` and `completed` are derived from the marker bit: this
/// transport only uses the marker bit to signal "more fragments follow"
/// (unset) vs. "access unit complete" (set) — the only boundary signal RTP
/// gives us in this basic payload mode.
#[derive(Debug, Clone)]
pub struct RtpPacket {
    pub version: u8,
    pub payload_type: u8,
    pub marker: bool,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub payload: Vec<u8>,
}

impl RtpPacket {
    pub fn chunked(&self) -> bool {
        !self.marker
    }

    pub fn completed(&self) -> bool {
        self.marker
    }

    fn decode(buf: &[u8]) -> Result<Self, Error> {
        if buf.len() < 12 {
            return Err(Error::RtspParse {
                kind: ParseErrorKind::InvalidSdp("RTP packet shorter than fixed header".into()),
            });
        }
        Ok(RtpPacket {
            version: buf[0] >> 6,
            marker: (buf[1] & 0x80) != 0,
            payload_type: buf[1] & 0x7f,
            sequence_number: u16::from_be_bytes([buf[2], buf[3]]),
            timestamp: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            ssrc: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
            payload: buf[12..].to_vec(),
        })
    }
}

/// Callback the receiver delivers completed, reassembled packets to.
pub trait RtpSink: Send + Sync {
    fn on_rtp_packet(&self, stream_id: i32, packet: RtpPacket);
}

/// Binds one UDP socket and runs a dedicated receive thread (§4.5).
///
/// Holds a non-owning [`Weak`] reference to its sink per the Design Notes'
/// back-reference rule: the owning session outlives its receivers because
/// it drops them during its own teardown, so a weak upgrade failing just
/// means "session already gone, drop this packet".
pub struct UdpRtpReceiver {
    port: u16,
    handle: Option<JoinHandle<()>>,
}

impl UdpRtpReceiver {
    /// Bind `port` and start receiving. `stream_id` is attached to every
    /// delivered packet so the session knows which track it belongs to.
    pub fn bind(
        port: u16,
        stream_id: i32,
        sink: Weak<dyn RtpSink>,
        cancel: CancelToken,
    ) -> Result<Self, Error> {
        let socket = UdpSocket::bind(("0.0.0.0", port))
            .map_err(|e| Error::SocketCreate(format!("udp bind {port}: {e}")))?;
        socket
            .set_read_timeout(Some(Duration::from_millis(200)))
            .map_err(|e| Error::SocketCreate(e.to_string()))?;

        let handle = std::thread::Builder::new()
            .name(format!("rtp-recv-{port}"))
            .spawn(move || Self::recv_loop(socket, stream_id, sink, cancel))
            .map_err(|e| Error::TaskCreateFailed(e.to_string()))?;

        Ok(Self {
            port,
            handle: Some(handle),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    fn recv_loop(socket: UdpSocket, stream_id: i32, sink: Weak<dyn RtpSink>, cancel: CancelToken) {
        let mut cache: Option<RtpPacket> = None;
        let mut buf = [0u8; 65536];

        while !cancel.cancelled() {
            let n = match socket.recv(&mut buf) {
                Ok(n) => n,
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    continue;
                }
                Err(e) => {
                    tracing::debug!(port = socket.local_addr().ok().map(|a| a.port()), error = %e, "rtp recv failed");
                    break;
                }
            };

            let packet = match RtpPacket::decode(&buf[..n]) {
                Ok(v) => v,
                Err(e) => {
                    tracing::debug!(error = %e, "dropping malformed rtp packet");
                    continue;
                }
            };

            if packet.chunked() {
                match &mut cache {
                    Some(pending) => pending.payload.extend_from_slice(&packet.payload),
                    None => cache = Some(packet),
                }
                continue;
            }

            let delivered = match cache.take() {
                Some(mut pending) => {
                    pending.payload.extend_from_slice(&packet.payload);
                    pending.sequence_number = packet.sequence_number;
                    pending.timestamp = packet.timestamp;
                    pending.ssrc = packet.ssrc;
                    pending
                }
                None => packet,
            };

            let Some(sink) = sink.upgrade() else {
                break; // owning session is gone.
            };
            sink.on_rtp_packet(stream_id, delivered);
        }
    }
}

impl Drop for UdpRtpReceiver {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
