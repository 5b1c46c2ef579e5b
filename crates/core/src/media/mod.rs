//! Media ingest pipeline: RTP reassembly, jitter correction, A/V alignment,
//! and FLV/AVC/AAC muxing.
//!
//! Data flows `rtp::UdpRtpReceiver` → `jitter::JitterCorrector` →
//! `avcache::AvAlignmentCache` (audio only) → `h264`/`aac` muxing →
//! `flv` tag framing, matching §4.5–§4.9's data-flow diagram.

pub mod aac;
pub mod avcache;
pub mod flv;
pub mod h264;
pub mod jitter;
pub mod rtp;
