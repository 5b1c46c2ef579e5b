//! Error types shared across the ingest/bridge engine.

use std::fmt;

/// Errors that can occur anywhere in the bridge engine.
///
/// Variants map to the failure taxonomy of the system:
///
/// - **Socket**: [`SocketCreate`](Self::SocketCreate), [`SocketConnect`](Self::SocketConnect),
///   [`Io`](Self::Io) (read/write), [`SocketTimeout`](Self::SocketTimeout).
/// - **Task** (coroutine, §4.2): [`TaskDummy`](Self::TaskDummy), [`TaskStarted`](Self::TaskStarted),
///   [`TaskDisposed`](Self::TaskDisposed), [`TaskInterrupted`](Self::TaskInterrupted),
///   [`TaskTerminated`](Self::TaskTerminated), [`TaskCreateFailed`](Self::TaskCreateFailed).
/// - **Remux** (§4.9): [`RemuxOffsetOverflow`](Self::RemuxOffsetOverflow),
///   [`RemuxMissingSequence`](Self::RemuxMissingSequence).
/// - **RTSP**: [`RtspParse`](Self::RtspParse), [`RtspTransportMissing`](Self::RtspTransportMissing).
/// - **Port pool** (§4.10): [`PortExhausted`](Self::PortExhausted).
/// - **RTMP** (B2): [`RtmpAmf`](Self::RtmpAmf).
/// - **Config**: [`Config`](Self::Config).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Underlying I/O, read, or write failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A socket could not be created (bind/allocate failed).
    #[error("socket create failed: {0}")]
    SocketCreate(String),

    /// An outbound TCP connect failed (e.g. to the RTMP peer).
    #[error("socket connect failed: {0}")]
    SocketConnect(String),

    /// A socket-level send/receive deadline elapsed.
    #[error("socket timeout: {0}")]
    SocketTimeout(String),

    /// Calling any method on [`DummyCoroutine`](crate::coroutine::DummyCoroutine).
    #[error("dummy coroutine is unusable")]
    TaskDummy,

    /// [`Coroutine::start`](crate::coroutine::Coroutine::start) called twice.
    #[error("coroutine already started")]
    TaskStarted,

    /// [`Coroutine::start`](crate::coroutine::Coroutine::start) called after `stop()`.
    #[error("coroutine disposed")]
    TaskDisposed,

    /// Sticky error set by [`Coroutine::interrupt`](crate::coroutine::Coroutine::interrupt).
    #[error("coroutine interrupted")]
    TaskInterrupted,

    /// Synthesized by `stop()` when the cycle never ran and no other error is sticky.
    #[error("coroutine terminated")]
    TaskTerminated,

    /// The underlying OS thread failed to spawn.
    #[error("failed to create task thread: {0}")]
    TaskCreateFailed(String),

    /// A computed RTP→millisecond timestamp offset overflowed.
    #[error("remux timestamp offset overflow")]
    RemuxOffsetOverflow,

    /// A NALU/raw-AAC frame arrived before SPS/PPS/AAC config were captured.
    #[error("remux missing sequence header: {0}")]
    RemuxMissingSequence(String),

    /// Malformed RTSP request (RFC 2326 §6) or SDP body.
    #[error("RTSP parse error: {kind}")]
    RtspParse { kind: ParseErrorKind },

    /// SETUP request with no (or an unsupported) `Transport` header.
    #[error("RTSP transport header missing or unsupported: {0}")]
    RtspTransportMissing(String),

    /// The RTP/RTCP port range `[min, max)` has no free even/odd pair left.
    #[error("RTP port range exhausted")]
    PortExhausted,

    /// An outbound RTMP command message was not valid AMF0.
    #[error("RTMP AMF0 error: {0}")]
    RtmpAmf(String),

    /// The TOML configuration file could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Specific kind of RTSP/SDP parse failure.
#[derive(Debug)]
pub enum ParseErrorKind {
    /// Input was empty (no request line).
    EmptyRequest,
    /// Request line did not have the expected `Method URI Version` format.
    InvalidRequestLine,
    /// A header line did not contain a colon separator.
    InvalidHeader,
    /// ANNOUNCE body was not valid SDP, or was missing a required field.
    InvalidSdp(String),
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyRequest => write!(f, "empty request"),
            Self::InvalidRequestLine => write!(f, "invalid request line"),
            Self::InvalidHeader => write!(f, "invalid header"),
            Self::InvalidSdp(reason) => write!(f, "invalid SDP: {reason}"),
        }
    }
}

/// Convenience alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;
