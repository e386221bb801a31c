// Level-crossing onset strategy
//
// Rectified mean amplitude per block compared against a decaying running
// level plus a fixed additive threshold. On a trigger the running level
// jumps to the triggering level so ring-out cannot re-trigger. Less robust
// to input gain than the energy strategy in `onset.rs`; kept as a fallback.

#[derive(Debug)]
pub struct LevelCrossingDetector {
    level: f32,
    decay: f32,
    threshold: f32,
    debounce_secs: f64,
    last_capture: Option<f64>,
}

impl LevelCrossingDetector {
    pub fn new(threshold: f32, decay: f32, debounce_ms: f64) -> Self {
        Self {
            level: 0.0,
            decay: decay.clamp(0.0, 1.0),
            threshold: threshold.max(0.0),
            debounce_secs: debounce_ms.max(0.0) / 1000.0,
            last_capture: None,
        }
    }

    /// Reset internal state (e.g. when capture restarts)
    pub fn reset(&mut self) {
        self.level = 0.0;
        self.last_capture = None;
    }

    pub fn level(&self) -> f32 {
        self.level
    }

    /// Feed the mean rectified amplitude of one block observed at `time`.
    ///
    /// Returns `true` when the block is an onset.
    pub fn process_level(&mut self, level: f32, time: f64) -> bool {
        self.level = self.level * self.decay + level * (1.0 - self.decay);

        if level <= self.level + self.threshold {
            return false;
        }
        if let Some(last) = self.last_capture {
            if time - last <= self.debounce_secs {
                return false;
            }
        }

        self.level = level;
        self.last_capture = Some(time);
        true
    }
}

/// Mean absolute sample value
pub fn mean_abs(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().map(|s| s.abs()).sum::<f32>() / samples.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crossing_triggers_once() {
        let mut detector = LevelCrossingDetector::new(0.25, 0.92, 100.0);

        assert!(!detector.process_level(0.01, 0.00));
        assert!(!detector.process_level(0.01, 0.01));
        assert!(detector.process_level(0.6, 0.02));
        assert_eq!(detector.level(), 0.6, "level resets to the trigger");

        // Still loud: no second trigger since level was raised
        assert!(!detector.process_level(0.6, 0.03));
    }

    #[test]
    fn test_debounce_blocks_fast_repeats() {
        let mut detector = LevelCrossingDetector::new(0.1, 0.5, 100.0);

        assert!(detector.process_level(0.5, 1.00));
        assert!(!detector.process_level(0.0, 1.02));
        assert!(!detector.process_level(0.5, 1.05), "inside debounce window");
        assert!(!detector.process_level(0.0, 1.10));
        assert!(detector.process_level(0.5, 1.20));
    }

    #[test]
    fn test_reset_clears_level() {
        let mut detector = LevelCrossingDetector::new(0.25, 0.92, 100.0);
        detector.process_level(0.9, 0.0);
        detector.reset();
        assert_eq!(detector.level(), 0.0);
        assert!(detector.process_level(0.9, 0.01), "debounce cleared too");
    }

    #[test]
    fn test_mean_abs() {
        assert_eq!(mean_abs(&[]), 0.0);
        assert!((mean_abs(&[0.5, -0.5, 1.0, -1.0]) - 0.75).abs() < 1e-6);
    }
}
