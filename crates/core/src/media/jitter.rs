//! Timestamp jitter corrector (§4.6).
//!
//! Grounded in `original_source/trunk/src/app/srs_app_rtsp.cpp`'s
//! `SrsRtspJitter::correct`. One instance per media type (video/audio),
//! owned by the session.

/// Monotonic PTS corrector with a 1-second anomaly clamp.
#[derive(Debug, Default)]
pub struct JitterCorrector {
    previous: Option<i64>,
    pts: i64,
}

impl JitterCorrector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Correct `ts` into a non-decreasing output PTS.
    ///
    /// `delta = max(0, ts - previous)`; jumps over 90000 (1s at the 90kHz
    /// RTP clock) are clamped to 0 rather than let through, so a single
    /// wild timestamp can't poison every PTS after it.
    pub fn correct(&mut self, ts: i64) -> i64 {
        let previous = *self.previous.get_or_insert(ts);

        let mut delta = ts - previous;
        if delta < 0 {
            delta = 0;
        }
        if delta > 90000 {
            delta = 0;
        }

        self.previous = Some(ts);
        self.pts += delta;
        self.pts
    }

    /// The last corrected PTS, without applying a new sample.
    pub fn timestamp(&self) -> i64 {
        self.pts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_is_monotonic_non_decreasing() {
        let mut j = JitterCorrector::new();
        let mut last = i64::MIN;
        for ts in [1000, 2000, 4000, 4000, 5000] {
            let pts = j.correct(ts);
            assert!(pts >= last);
            last = pts;
        }
    }

    #[test]
    fn anomaly_clamp_scenario_from_boundary_5() {
        let mut j = JitterCorrector::new();
        let inputs = [1000, 2000, 2000 + 100_000, 2000 + 100_000 + 500];
        let outputs: Vec<i64> = inputs.iter().map(|&ts| j.correct(ts)).collect();

        let pts0 = outputs[0];
        assert_eq!(outputs, vec![pts0, pts0 + 1000, pts0 + 1000, pts0 + 1500]);
    }

    #[test]
    fn first_sample_yields_zero_delta() {
        let mut j = JitterCorrector::new();
        assert_eq!(j.correct(123456), 0);
    }

    #[test]
    fn backwards_jump_clamps_to_zero_delta() {
        let mut j = JitterCorrector::new();
        j.correct(5000);
        let pts = j.correct(1000);
        assert_eq!(pts, 0); // delta clamped, not negative
    }
}
