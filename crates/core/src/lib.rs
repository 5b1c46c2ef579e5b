//! # castbridge — RTSP-to-RTMP live publish bridge
//!
//! Accepts an incoming RTSP ANNOUNCE/RECORD publish session (as an encoder
//! or camera would push), reassembles its H.264 and AAC RTP streams, and
//! re-muxes them into FLV tags sent onward over a freshly opened outbound
//! RTMP publish connection.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────┐
//! │  cli            — process entry point       │
//! ├────────────────────────────────────────────┤
//! │  rtsp::Caster   — accept loop, orchestrator │
//! │  rtsp::session  — state machine, transmux   │
//! │  rtsp::portpool — RTP/RTCP port allocation  │
//! ├────────────────────────────────────────────┤
//! │  media::rtp     — UDP receive, reassembly   │
//! │  media::jitter  — timestamp correction      │
//! │  media::avcache — A/V alignment             │
//! │  rtmp::client    — outbound publish, AMF0    │
//! ├────────────────────────────────────────────┤
//! │  conn, coroutine, context, async_call       │
//! │  — cooperative task runtime underneath it   │
//! └────────────────────────────────────────────┘
//! ```
//!
//! ## Crate layout
//!
//! - [`config`] — [`Config`](config::Config), parsed from TOML.
//! - [`context`] — per-thread context id, used to correlate log lines.
//! - [`coroutine`] — [`CancelToken`](coroutine::CancelToken) and the
//!   cooperative [`Coroutine`](coroutine::Coroutine) trait backing every
//!   long-running loop in this crate.
//! - [`conn`] — [`ConnectionHandler`](conn::ConnectionHandler) and
//!   [`ConnectionManager`](conn::ConnectionManager), the connection
//!   lifecycle base shared by every inbound session.
//! - [`async_call`] — dedicated worker thread draining queued outbound work.
//! - [`media`] — RTP reassembly, jitter correction, A/V alignment, and the
//!   AAC/H.264/FLV codec helpers the transmuxer builds on.
//! - [`rtmp`] — outbound RTMP publish client and AMF0 codec.
//! - [`rtsp`] — inbound RTSP request/response/SDP parsing, the session state
//!   machine, the transmuxer, and the accept-loop orchestrator.
//! - [`error`] — [`Error`](error::Error) and [`Result`](error::Result).

pub mod async_call;
pub mod config;
pub mod conn;
pub mod context;
pub mod coroutine;
pub mod error;
pub mod media;
pub mod rtmp;
pub mod rtsp;

pub use config::Config;
pub use error::{Error, Result};
pub use rtsp::{Caster, CasterShared};
