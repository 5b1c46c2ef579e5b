//! A/V alignment cache (§4.7).
//!
//! Grounded in `original_source/trunk/src/app/srs_app_rtsp.cpp`'s
//! `SrsRtspConn::kickoff_audio_cache`/`on_rtp_audio`: holds at most one
//! pending audio frame-group (an access unit's worth of AAC raw frames)
//! until the next video tick arrives with a greater dts, then emits each
//! sample with an interpolated timestamp.

/// One flushed audio sample: raw frame bytes plus its interpolated
/// millisecond timestamp.
pub struct FlushedSample {
    pub frame: Vec<u8>,
    pub timestamp_ms: u32,
}

struct Pending {
    dts: i64,
    samples: Vec<Vec<u8>>,
}

/// Holds at most one pending audio frame-group (§3's A/V cache).
#[derive(Default)]
pub struct AvAlignmentCache {
    pending: Option<Pending>,
}

impl AvAlignmentCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new video tick arrived at `dts`. Flush any pending audio group
    /// with a smaller dts, interpolating per-sample timestamps across the
    /// `[D_a, D_v)` gap, then clear the slot.
    pub fn on_video(&mut self, dts: i64) -> Vec<FlushedSample> {
        let Some(pending) = self.pending.take() else {
            return Vec::new();
        };
        if !(dts - pending.dts > 0 && !pending.samples.is_empty()) {
            return Vec::new();
        }

        let n = pending.samples.len() as i64;
        let delta = (dts - pending.dts) / n;

        pending
            .samples
            .into_iter()
            .enumerate()
            .map(|(i, frame)| {
                let ts = (pending.dts + delta * i as i64) / 90;
                FlushedSample {
                    frame,
                    timestamp_ms: ts as u32,
                }
            })
            .collect()
    }

    /// A new audio frame-group arrived at `dts` with `samples`. Replaces
    /// any existing pending group (the previous one should already have
    /// been flushed by a video tick).
    pub fn on_audio(&mut self, dts: i64, samples: Vec<Vec<u8>>) {
        self.pending = Some(Pending { dts, samples });
    }
}
