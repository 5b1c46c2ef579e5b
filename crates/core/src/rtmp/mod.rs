//! Outbound RTMP publish boundary (B2): handshake, `connect`/`createStream`/
//! `publish`, and chunked media writes. See `client::RtmpClient`.

pub mod amf;
pub mod client;
