//! Quantizer - per-hit timing feedback against the beat grid
//!
//! Each onset is aligned to the nearest main beat the scheduler reports
//! around it and classified ON_TIME / EARLY / LATE with a 50 ms tolerance.
//! Unlike the tempo monitor this gives an immediate verdict per hit and
//! applies no noise gate or hysteresis.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::audio::scheduler::BeatGridSource;

/// Timing classification for a single hit relative to the nearest beat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimingClassification {
    /// Within ±50 ms of the nearest beat
    OnTime,
    /// More than 50 ms before the nearest beat
    Early,
    /// More than 50 ms after the nearest beat
    Late,
}

/// Timing feedback with classification and signed millisecond error
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimingFeedback {
    pub classification: TimingClassification,
    /// Positive is late (after the beat), negative is early
    pub error_ms: f32,
    /// Grid time the hit was aligned to
    pub beat_time: f64,
}

impl TimingFeedback {
    pub fn from_error_ms(error_ms: f32, beat_time: f64) -> Self {
        let classification = if error_ms.abs() <= Quantizer::TOLERANCE_MS {
            TimingClassification::OnTime
        } else if error_ms < 0.0 {
            TimingClassification::Early
        } else {
            TimingClassification::Late
        };
        Self {
            classification,
            error_ms,
            beat_time,
        }
    }
}

/// Signed offset from `time` to the closest entry of `beats` (`time - beat`)
///
/// Returns `None` for an empty grid.
pub fn nearest_offset(time: f64, beats: &[f64]) -> Option<(f64, f64)> {
    beats
        .iter()
        .map(|&beat| (time - beat, beat))
        .min_by(|a, b| a.0.abs().total_cmp(&b.0.abs()))
}

/// Aligns onsets to the scheduler's grid
///
/// # Example
/// ```ignore
/// let quantizer = Quantizer::new(scheduler.clone());
/// if let Some(feedback) = quantizer.quantize(onset.time) {
///     println!("{:?} by {} ms", feedback.classification, feedback.error_ms);
/// }
/// ```
pub struct Quantizer {
    grid: Arc<dyn BeatGridSource>,
}

impl Quantizer {
    /// Tolerance for ON_TIME classification in milliseconds
    pub const TOLERANCE_MS: f32 = 50.0;

    /// Half-width of the grid window queried per hit, in beats
    const WINDOW_BEATS: f64 = 1.0;

    pub fn new(grid: Arc<dyn BeatGridSource>) -> Self {
        Self { grid }
    }

    /// Timing feedback for a hit at `time`, or `None` when no beat is near
    /// (transport stopped, or no beat within one beat duration).
    pub fn quantize(&self, time: f64) -> Option<TimingFeedback> {
        let snapshot = self.grid.grid_snapshot(time, Self::WINDOW_BEATS);
        quantize_against(time, &snapshot.beats)
    }
}

/// Timing feedback for `time` against an explicit list of beat times
pub fn quantize_against(time: f64, beats: &[f64]) -> Option<TimingFeedback> {
    let (offset, beat) = nearest_offset(time, beats)?;
    Some(TimingFeedback::from_error_ms((offset * 1000.0) as f32, beat))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::scheduler::{BeatEvent, BeatGridSnapshot};

    /// Fixed 120 BPM grid starting at 0
    struct FixedGrid;

    impl BeatGridSource for FixedGrid {
        fn grid_snapshot(&self, time: f64, window_beats: f64) -> BeatGridSnapshot {
            let beat = 0.5;
            let beats = (0..40)
                .map(|i| i as f64 * beat)
                .filter(|t| (t - time).abs() <= window_beats * beat)
                .collect();
            BeatGridSnapshot {
                target_bpm: 120,
                beat_unit: 4,
                beat_duration: beat,
                beats,
            }
        }

        fn recent_beats(&self) -> Vec<BeatEvent> {
            Vec::new()
        }
    }

    fn quantizer() -> Quantizer {
        Quantizer::new(Arc::new(FixedGrid))
    }

    #[test]
    fn test_onset_exactly_on_beat() {
        let q = quantizer();
        for t in [0.0, 0.5, 1.0, 5.0] {
            let feedback = q.quantize(t).unwrap();
            assert_eq!(feedback.classification, TimingClassification::OnTime);
            assert_eq!(feedback.error_ms, 0.0);
            assert_eq!(feedback.beat_time, t);
        }
    }

    #[test]
    fn test_onset_within_tolerance() {
        let q = quantizer();

        let feedback = q.quantize(0.53).unwrap();
        assert_eq!(feedback.classification, TimingClassification::OnTime);
        assert!((feedback.error_ms - 30.0).abs() < 0.1);

        let feedback = q.quantize(0.47).unwrap();
        assert_eq!(feedback.classification, TimingClassification::OnTime);
        assert!((feedback.error_ms + 30.0).abs() < 0.1);
    }

    #[test]
    fn test_onset_late_and_early() {
        let q = quantizer();

        let feedback = q.quantize(1.1).unwrap();
        assert_eq!(feedback.classification, TimingClassification::Late);
        assert!((feedback.error_ms - 100.0).abs() < 0.1);
        assert_eq!(feedback.beat_time, 1.0);

        // 420 ms after beat 1.0 is 80 ms before 1.5
        let feedback = q.quantize(1.42).unwrap();
        assert_eq!(feedback.classification, TimingClassification::Early);
        assert!((feedback.error_ms + 80.0).abs() < 0.1);
        assert_eq!(feedback.beat_time, 1.5);
    }

    #[test]
    fn test_empty_grid_yields_none() {
        assert!(quantize_against(1.0, &[]).is_none());
        assert!(quantizer().quantize(100.0).is_none(), "beyond the fixed grid");
    }

    #[test]
    fn test_nearest_offset_picks_closest() {
        let (offset, beat) = nearest_offset(1.2, &[0.0, 1.0, 2.0]).unwrap();
        assert_eq!(beat, 1.0);
        assert!((offset - 0.2).abs() < 1e-9);

        let (offset, beat) = nearest_offset(1.7, &[0.0, 1.0, 2.0]).unwrap();
        assert_eq!(beat, 2.0);
        assert!((offset + 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_tolerance_boundary() {
        let feedback = TimingFeedback::from_error_ms(50.0, 0.0);
        assert_eq!(feedback.classification, TimingClassification::OnTime);
        let feedback = TimingFeedback::from_error_ms(-50.5, 0.0);
        assert_eq!(feedback.classification, TimingClassification::Early);
        let feedback = TimingFeedback::from_error_ms(51.0, 0.0);
        assert_eq!(feedback.classification, TimingClassification::Late);
    }
}
