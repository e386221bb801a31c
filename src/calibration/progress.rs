// Progress tracking for latency calibration

use serde::{Deserialize, Serialize};

/// Outcome of a completed calibration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatencyResult {
    /// Mean tap offset against the nearest beat, rounded
    pub measured_ms: i64,
    /// User trim added on top of the measurement
    pub manual_ms: i64,
    /// Offset handed to the scheduler
    pub applied_ms: i64,
}

/// Progress through the tap collection, published after each tap
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationProgress {
    pub taps_collected: usize,
    pub taps_needed: usize,
    /// Offset of the most recent tap (positive = tap after the beat)
    pub last_offset_ms: Option<f64>,
    /// Set once the final tap was collected
    pub result: Option<LatencyResult>,
}

impl CalibrationProgress {
    pub fn is_complete(&self) -> bool {
        self.result.is_some()
    }

    /// Fraction of taps collected, 0.0..=1.0
    pub fn fraction(&self) -> f32 {
        if self.taps_needed == 0 {
            return 1.0;
        }
        (self.taps_collected as f32 / self.taps_needed as f32).min(1.0)
    }

    /// Status line, e.g. "Captured 3/20 taps"
    pub fn message(&self) -> String {
        match self.result {
            Some(result) => format!("Calibration saved ({} ms applied)", result.applied_ms),
            None => format!(
                "Captured {}/{} taps",
                self.taps_collected, self.taps_needed
            ),
        }
    }
}
