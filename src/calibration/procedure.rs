// LatencyCalibration - tap-along output latency measurement
//
// While active, every tap is compared with the nearest beat the scheduler
// emitted recently. The player taps when they *hear* a click, so the mean
// offset approximates output latency. After the required number of taps the
// rounded mean becomes the measured latency; the applied offset is measured
// plus a manual trim, clamped to the transport's ±200 ms range.

use crate::audio::scheduler::BeatEvent;
use crate::audio::transport::MAX_LATENCY_SECS;
use crate::calibration::progress::{CalibrationProgress, LatencyResult};
use crate::error::CalibrationError;

/// Taps collected before calibration completes
pub const DEFAULT_TAPS_NEEDED: usize = 20;

#[derive(Debug, Clone)]
pub struct LatencyCalibration {
    taps_needed: usize,
    offsets_ms: Vec<f64>,
    active: bool,
    manual_ms: i64,
    measured_ms: Option<i64>,
}

impl Default for LatencyCalibration {
    fn default() -> Self {
        Self::new(DEFAULT_TAPS_NEEDED)
    }
}

impl LatencyCalibration {
    pub fn new(taps_needed: usize) -> Self {
        let taps_needed = taps_needed.max(1);
        Self {
            taps_needed,
            offsets_ms: Vec::with_capacity(taps_needed),
            active: false,
            manual_ms: 0,
            measured_ms: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn measured_ms(&self) -> Option<i64> {
        self.measured_ms
    }

    pub fn manual_ms(&self) -> i64 {
        self.manual_ms
    }

    /// Measured plus manual trim, clamped to the scheduler's latency range
    pub fn applied_ms(&self) -> i64 {
        let limit = (MAX_LATENCY_SECS * 1000.0) as i64;
        (self.measured_ms.unwrap_or(0) + self.manual_ms).clamp(-limit, limit)
    }

    pub fn set_manual_ms(&mut self, ms: i64) {
        self.manual_ms = ms;
    }

    pub fn start(&mut self) -> Result<(), CalibrationError> {
        if self.active {
            return Err(CalibrationError::AlreadyInProgress);
        }
        self.offsets_ms.clear();
        self.active = true;
        log::info!(
            "[Calibration] Started, waiting for {} taps",
            self.taps_needed
        );
        Ok(())
    }

    /// Abandon the run; a previous measurement is kept
    pub fn cancel(&mut self) {
        if self.active {
            log::info!(
                "[Calibration] Cancelled after {} taps",
                self.offsets_ms.len()
            );
        }
        self.active = false;
        self.offsets_ms.clear();
    }

    pub fn progress(&self) -> CalibrationProgress {
        CalibrationProgress {
            taps_collected: self.offsets_ms.len(),
            taps_needed: self.taps_needed,
            last_offset_ms: self.offsets_ms.last().copied(),
            result: None,
        }
    }

    /// Register a tap at `time` against the scheduler's recent beats.
    ///
    /// Completes the calibration on the final tap; the returned progress then
    /// carries the result.
    pub fn tap(
        &mut self,
        time: f64,
        recent_beats: &[BeatEvent],
    ) -> Result<CalibrationProgress, CalibrationError> {
        if !self.active {
            return Err(CalibrationError::NotActive);
        }
        let nearest = recent_beats
            .iter()
            .min_by(|a, b| (time - a.time).abs().total_cmp(&(time - b.time).abs()))
            .ok_or(CalibrationError::NoReferenceBeat)?;

        let offset_ms = (time - nearest.time) * 1000.0;
        self.offsets_ms.push(offset_ms);
        log::debug!(
            "[Calibration] Tap {}/{}: {:+.1} ms",
            self.offsets_ms.len(),
            self.taps_needed,
            offset_ms
        );

        if self.offsets_ms.len() < self.taps_needed {
            return Ok(self.progress());
        }

        let mut progress = self.progress();
        progress.result = Some(self.finish()?);
        Ok(progress)
    }

    fn finish(&mut self) -> Result<LatencyResult, CalibrationError> {
        if self.offsets_ms.len() < self.taps_needed {
            return Err(CalibrationError::InsufficientTaps {
                required: self.taps_needed,
                collected: self.offsets_ms.len(),
            });
        }

        let mean = self.offsets_ms.iter().sum::<f64>() / self.offsets_ms.len() as f64;
        let measured = mean.round() as i64;
        self.measured_ms = Some(measured);
        self.active = false;
        self.offsets_ms.clear();

        let result = LatencyResult {
            measured_ms: measured,
            manual_ms: self.manual_ms,
            applied_ms: self.applied_ms(),
        };
        log::info!(
            "[Calibration] Measured {} ms, applying {} ms",
            result.measured_ms,
            result.applied_ms
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn beats(times: &[f64]) -> Vec<BeatEvent> {
        times
            .iter()
            .map(|&time| BeatEvent {
                time,
                ..BeatEvent::default()
            })
            .collect()
    }

    #[test]
    fn test_tap_requires_active_calibration() {
        let mut calibration = LatencyCalibration::default();
        assert_eq!(
            calibration.tap(1.0, &beats(&[1.0])),
            Err(CalibrationError::NotActive)
        );
    }

    #[test]
    fn test_start_twice_is_rejected() {
        let mut calibration = LatencyCalibration::default();
        calibration.start().unwrap();
        assert_eq!(calibration.start(), Err(CalibrationError::AlreadyInProgress));
    }

    #[test]
    fn test_tap_without_beats() {
        let mut calibration = LatencyCalibration::default();
        calibration.start().unwrap();
        assert_eq!(
            calibration.tap(1.0, &[]),
            Err(CalibrationError::NoReferenceBeat)
        );
        assert_eq!(calibration.progress().taps_collected, 0);
    }

    #[test]
    fn test_taps_against_nearest_beat() {
        let mut calibration = LatencyCalibration::new(3);
        calibration.start().unwrap();
        let grid = beats(&[1.0, 1.75, 2.5]);

        let progress = calibration.tap(1.03, &grid).unwrap();
        assert_eq!(progress.taps_collected, 1);
        assert!((progress.last_offset_ms.unwrap() - 30.0).abs() < 1e-6);

        // Closer to 2.5 than 1.75
        let progress = calibration.tap(2.48, &grid).unwrap();
        assert!((progress.last_offset_ms.unwrap() + 20.0).abs() < 1e-6);
        assert!(!progress.is_complete());

        let progress = calibration.tap(1.79, &grid).unwrap();
        let result = progress.result.unwrap();
        assert_eq!(result.measured_ms, 17); // (30 - 20 + 40) / 3 = 16.67
        assert_eq!(result.applied_ms, 17);
        assert!(!calibration.is_active());
        assert_eq!(calibration.measured_ms(), Some(17));
    }

    #[test]
    fn test_manual_trim_and_clamp() {
        let mut calibration = LatencyCalibration::new(1);
        calibration.set_manual_ms(-10);
        calibration.start().unwrap();
        let result = calibration.tap(1.05, &beats(&[1.0])).unwrap().result.unwrap();
        assert_eq!(result.measured_ms, 50);
        assert_eq!(result.applied_ms, 40);

        calibration.set_manual_ms(500);
        assert_eq!(calibration.applied_ms(), 200);
    }

    #[test]
    fn test_cancel_keeps_previous_measurement() {
        let mut calibration = LatencyCalibration::new(1);
        calibration.start().unwrap();
        calibration.tap(1.02, &beats(&[1.0])).unwrap();
        assert_eq!(calibration.measured_ms(), Some(20));

        calibration.start().unwrap();
        calibration.cancel();
        assert!(!calibration.is_active());
        assert_eq!(calibration.measured_ms(), Some(20));
    }
}
