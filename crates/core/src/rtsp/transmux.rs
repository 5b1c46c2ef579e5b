//! RTSP→RTMP transmuxer (C9, §4.9).
//!
//! Grounded line-for-line in `original_source/trunk/src/app/srs_app_rtsp.cpp`'s
//! `SrsRtspConn::connect` / `write_sequence_header` / `write_h264_ipb_frame` /
//! `write_audio_raw_frame`. Owns the lazily-opened outbound RTMP publish;
//! the session (C8) owns jitter correction and A/V alignment and calls in
//! here with already-corrected timestamps.
//!
//! Fixes, rather than reproduces, the original's bug where the `output` URL
//! built from the template is never assigned to the `url` passed to the
//! RTMP client constructor — here `connect()` always builds `url` from
//! `output_url_template` with `[app]`/`[stream]` substituted.

use std::time::Duration;

use crate::error::Error;
use crate::media::aac::AacCodec;
use crate::media::flv::{self, AvcPacketType, VideoFrameType};
use crate::media::h264;
use crate::rtmp::client::{RtmpClient, RtmpUrl};

pub struct Transmuxer {
    output_url_template: String,
    app: String,
    stream: String,
    connect_timeout: Duration,
    send_timeout: Duration,
    client: Option<RtmpClient>,
    /// True once a sequence header has been sent — per §3's session
    /// invariant, `connected` implies SPS/PPS/AAC-config were observed and
    /// a sequence header was written before any NALU/raw-AAC frame.
    connected: bool,
}

impl Transmuxer {
    pub fn new(
        output_url_template: impl Into<String>,
        app: impl Into<String>,
        stream: impl Into<String>,
        connect_timeout: Duration,
        send_timeout: Duration,
    ) -> Self {
        Self {
            output_url_template: output_url_template.into(),
            app: app.into(),
            stream: stream.into(),
            connect_timeout,
            send_timeout,
            client: None,
            connected: false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    fn ensure_connected(&mut self) -> Result<(), Error> {
        if self.client.is_some() {
            return Ok(());
        }
        let resolved = self
            .output_url_template
            .replace("[app]", &self.app)
            .replace("[stream]", &self.stream);
        let url = RtmpUrl::parse(&resolved)?;
        tracing::info!(url = %resolved, "opening outbound RTMP publish");
        let client = RtmpClient::connect(&url, self.connect_timeout, self.send_timeout)?;
        self.client = Some(client);
        Ok(())
    }

    /// On the first RTP delivery: open the publish if needed, then emit the
    /// AVC sequence header (built from SPS/PPS) followed by the AAC
    /// sequence header (the raw specific config), both at `pts_ms`.
    pub fn write_sequence_header(
        &mut self,
        sps: &[u8],
        pps: &[u8],
        aac_codec: &AacCodec,
        aac_config: &[u8],
        pts_ms: u32,
    ) -> Result<(), Error> {
        self.ensure_connected()?;

        let avc_config = h264::mux_sequence_header(sps, pps)?;
        let video_tag = flv::mux_video_tag(VideoFrameType::Key, AvcPacketType::SequenceHeader, 0, &avc_config);
        self.send_video(pts_ms, video_tag)?;

        let audio_tag = crate::media::aac::mux_aac_to_flv(aac_codec, 0, aac_config);
        self.send_audio(pts_ms, audio_tag)?;

        self.connected = true;
        Ok(())
    }

    /// Mux and send one H.264 access unit. `pts_ms` is used as both dts and
    /// pts (the `dts == pts` approximation `spec.md` §9 explicitly leaves
    /// unresolved — B-frame reordering is out of scope here).
    pub fn write_h264_ipb_frame(&mut self, nalu: &[u8], pts_ms: u32) -> Result<(), Error> {
        if !self.connected {
            return Err(Error::RemuxMissingSequence(
                "video frame arrived before sequence header".into(),
            ));
        }
        let is_keyframe = h264::classify_frame(nalu)?;
        let frame_type = if is_keyframe { VideoFrameType::Key } else { VideoFrameType::Inter };
        let avc_frame = h264::mux_ipb_frame(nalu);
        let tag = flv::mux_video_tag(frame_type, AvcPacketType::Nalu, 0, &avc_frame);
        self.send_video(pts_ms, tag)
    }

    /// Mux and send one raw AAC frame already aligned by the A/V cache, at
    /// its interpolated millisecond timestamp.
    pub fn write_audio_raw_frame(&mut self, aac_codec: &AacCodec, frame: &[u8], ts_ms: u32) -> Result<(), Error> {
        if !self.connected {
            return Err(Error::RemuxMissingSequence(
                "audio frame arrived before sequence header".into(),
            ));
        }
        let tag = crate::media::aac::mux_aac_to_flv(aac_codec, 1, frame);
        self.send_audio(ts_ms, tag)
    }

    fn send_video(&mut self, ts_ms: u32, payload: Vec<u8>) -> Result<(), Error> {
        let Some(client) = self.client.as_mut() else {
            return Err(Error::RemuxMissingSequence("no open RTMP publish".into()));
        };
        client.send_video(ts_ms, &payload).inspect_err(|_| self.client = None)
    }

    fn send_audio(&mut self, ts_ms: u32, payload: Vec<u8>) -> Result<(), Error> {
        let Some(client) = self.client.as_mut() else {
            return Err(Error::RemuxMissingSequence("no open RTMP publish".into()));
        };
        client.send_audio(ts_ms, &payload).inspect_err(|_| self.client = None)
    }
}
