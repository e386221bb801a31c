use std::collections::VecDeque;

use crate::audio::transport::{MAX_TEMPO, MIN_TEMPO};

/// Gap that starts a new run of taps
const RESET_GAP_SECS: f64 = 2.0;
const MAX_TAPS: usize = 8;
const MIN_TAPS: usize = 3;

/// Tap-based tempo estimator.
///
/// Taps closer than two seconds apart form a run; the last eight taps of the
/// run are kept. From the third tap on every tap yields a BPM from the mean
/// interval, clamped to the transport's tempo range.
///
/// ```ignore
/// let mut tapper = TapTempo::new();
/// if let Some(bpm) = tapper.tap(clock.now()) {
///     scheduler.set_tempo(bpm);
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct TapTempo {
    taps: VecDeque<f64>,
}

impl TapTempo {
    pub fn new() -> Self {
        Self {
            taps: VecDeque::with_capacity(MAX_TAPS),
        }
    }

    /// Register a tap at `time` (seconds). Returns the tempo once enough
    /// taps have been collected.
    pub fn tap(&mut self, time: f64) -> Option<u32> {
        if let Some(&last) = self.taps.back() {
            if time - last > RESET_GAP_SECS || time < last {
                self.taps.clear();
            }
        }

        self.taps.push_back(time);
        if self.taps.len() > MAX_TAPS {
            self.taps.pop_front();
        }

        self.bpm()
    }

    /// Tempo from the current run, if it has enough taps
    pub fn bpm(&self) -> Option<u32> {
        if self.taps.len() < MIN_TAPS {
            return None;
        }
        let (first, last) = (self.taps.front()?, self.taps.back()?);
        let mean_interval = (last - first) / (self.taps.len() - 1) as f64;
        if mean_interval <= 0.0 {
            return None;
        }
        let bpm = (60.0 / mean_interval).round();
        Some((bpm as u32).clamp(MIN_TEMPO, MAX_TEMPO))
    }

    pub fn tap_count(&self) -> usize {
        self.taps.len()
    }

    pub fn reset(&mut self) {
        self.taps.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_three_taps_give_tempo() {
        let mut tapper = TapTempo::new();
        assert_eq!(tapper.tap(0.0), None);
        assert_eq!(tapper.tap(0.5), None);
        assert_eq!(tapper.tap(1.0), Some(120));
        assert_eq!(tapper.tap(1.5), Some(120), "every further tap updates");
    }

    #[test]
    fn test_gap_starts_new_run() {
        let mut tapper = TapTempo::new();
        tapper.tap(0.0);
        tapper.tap(0.3);
        assert_eq!(tapper.tap(2.5), None, "gap over two seconds resets");
        assert_eq!(tapper.tap_count(), 1);
        assert_eq!(tapper.tap(3.1), None);
        assert_eq!(tapper.tap(3.7), Some(100));
    }

    #[test]
    fn test_keeps_last_eight_taps() {
        let mut tapper = TapTempo::new();
        // Slow first, then settle at 1 s intervals
        for t in [0.0, 1.5, 3.0] {
            tapper.tap(t);
        }
        let mut t = 3.0;
        let mut bpm = None;
        for _ in 0..8 {
            t += 1.0;
            bpm = tapper.tap(t);
        }
        assert_eq!(tapper.tap_count(), 8);
        assert_eq!(bpm, Some(60));
    }

    #[test]
    fn test_tempo_is_clamped() {
        let mut tapper = TapTempo::new();
        for i in 0..4 {
            tapper.tap(i as f64 * 0.05);
        }
        assert_eq!(tapper.bpm(), Some(MAX_TEMPO));
    }

    #[test]
    fn test_reset_clears_run() {
        let mut tapper = TapTempo::new();
        for t in [0.0, 0.5, 1.0] {
            tapper.tap(t);
        }
        tapper.reset();
        assert_eq!(tapper.bpm(), None);
        assert_eq!(tapper.tap_count(), 0);
    }
}
