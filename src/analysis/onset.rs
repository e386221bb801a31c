// OnsetDetector - adaptive energy onset detection
//
// Converts a stream of captured samples into discrete onset events.
//
// Algorithm (energy strategy):
// 1. High-pass the input (~120 Hz biquad) to remove rumble and handling noise
// 2. Split into fixed blocks and compute mean-square energy per block
// 3. Track a slow baseline: baseline = baseline * 0.995 + energy * 0.005
// 4. Trigger when energy > baseline * 3 + 1e-7 and the last onset is older
//    than the 100 ms refractory period
// 5. On trigger raise the baseline to the trigger energy so sustain and
//    ring-out cannot immediately re-trigger
//
// The level-crossing strategy (see `level_crossing.rs`) is selectable via
// `OnsetDetectionConfig::strategy` and shares the filter, blocking and
// listener plumbing.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::level_crossing::{mean_abs, LevelCrossingDetector};
use crate::config::{OnsetDetectionConfig, OnsetStrategy};

/// A detected onset on the audio clock
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Onset {
    pub time: f64,
    /// Mean-square energy (energy strategy) or mean level (level crossing)
    pub energy: f32,
}

/// Consumer of detected onsets. A panicking listener is logged and skipped.
pub trait OnsetListener: Send + Sync {
    fn on_onset(&self, onset: &Onset);
}

impl OnsetListener for broadcast::Sender<Onset> {
    fn on_onset(&self, onset: &Onset) {
        let _ = self.send(*onset);
    }
}

/// RBJ biquad high-pass, Q = 1/sqrt(2)
#[derive(Debug, Clone)]
struct HighPass {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
}

impl HighPass {
    fn new(cutoff_hz: f32, sample_rate: u32) -> Self {
        let nyquist = sample_rate as f32 / 2.0;
        if !(cutoff_hz > 0.0 && cutoff_hz < nyquist) {
            // Pass-through
            return Self::from_coefficients(1.0, 0.0, 0.0, 0.0, 0.0);
        }

        let w0 = 2.0 * std::f32::consts::PI * cutoff_hz / sample_rate as f32;
        let alpha = w0.sin() / (2.0 * std::f32::consts::FRAC_1_SQRT_2);
        let cos_w0 = w0.cos();
        let a0 = 1.0 + alpha;

        Self::from_coefficients(
            (1.0 + cos_w0) / 2.0 / a0,
            -(1.0 + cos_w0) / a0,
            (1.0 + cos_w0) / 2.0 / a0,
            -2.0 * cos_w0 / a0,
            (1.0 - alpha) / a0,
        )
    }

    fn from_coefficients(b0: f32, b1: f32, b2: f32, a1: f32, a2: f32) -> Self {
        Self {
            b0,
            b1,
            b2,
            a1,
            a2,
            x1: 0.0,
            x2: 0.0,
            y1: 0.0,
            y2: 0.0,
        }
    }

    #[inline]
    fn process(&mut self, x: f32) -> f32 {
        let y = self.b0 * x + self.b1 * self.x1 + self.b2 * self.x2
            - self.a1 * self.y1
            - self.a2 * self.y2;
        self.x2 = self.x1;
        self.x1 = x;
        self.y2 = self.y1;
        self.y1 = y;
        y
    }

    fn reset(&mut self) {
        self.x1 = 0.0;
        self.x2 = 0.0;
        self.y1 = 0.0;
        self.y2 = 0.0;
    }
}

#[derive(Debug)]
enum Strategy {
    Energy {
        baseline: Option<f32>,
        last_onset: Option<f64>,
    },
    LevelCrossing(LevelCrossingDetector),
}

impl Strategy {
    fn from_config(config: &OnsetDetectionConfig) -> Self {
        match config.strategy {
            OnsetStrategy::Energy => Strategy::Energy {
                baseline: None,
                last_onset: None,
            },
            OnsetStrategy::LevelCrossing => Strategy::LevelCrossing(LevelCrossingDetector::new(
                config.legacy_threshold,
                config.legacy_decay,
                config.min_interval_ms,
            )),
        }
    }
}

/// Block-based onset detector
pub struct OnsetDetector {
    config: OnsetDetectionConfig,
    sample_rate: u32,
    block_size: usize,
    filter: HighPass,
    strategy: Strategy,
    /// Filtered samples of the block being assembled
    pending: Vec<f32>,
    pending_start: f64,
    listeners: Vec<Arc<dyn OnsetListener>>,
}

impl OnsetDetector {
    pub fn new(sample_rate: u32) -> Self {
        Self::with_config(sample_rate, OnsetDetectionConfig::default())
    }

    pub fn with_config(sample_rate: u32, config: OnsetDetectionConfig) -> Self {
        let block_size = config.block_size.max(1);
        Self {
            filter: HighPass::new(config.highpass_hz, sample_rate),
            strategy: Strategy::from_config(&config),
            pending: Vec::with_capacity(block_size),
            pending_start: 0.0,
            listeners: Vec::new(),
            sample_rate,
            block_size,
            config,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn strategy(&self) -> OnsetStrategy {
        self.config.strategy
    }

    /// Switch to a new input rate; resets all detection state
    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        if sample_rate == self.sample_rate {
            return;
        }
        self.sample_rate = sample_rate;
        self.filter = HighPass::new(self.config.highpass_hz, sample_rate);
        self.reset();
    }

    pub fn add_listener(&mut self, listener: Arc<dyn OnsetListener>) {
        self.listeners.push(listener);
    }

    /// Forget baseline, refractory state and any partial block
    pub fn reset(&mut self) {
        self.filter.reset();
        self.pending.clear();
        self.pending_start = 0.0;
        match &mut self.strategy {
            Strategy::Energy {
                baseline,
                last_onset,
            } => {
                *baseline = None;
                *last_onset = None;
            }
            Strategy::LevelCrossing(detector) => detector.reset(),
        }
    }

    /// Feed consecutive samples whose first sample is at `start_time`.
    ///
    /// Samples are assembled into `block_size` blocks across calls; each
    /// complete block is evaluated once and stamped with its first sample's time.
    pub fn process(&mut self, samples: &[f32], start_time: f64) -> Vec<Onset> {
        let mut onsets = Vec::new();
        let rate = self.sample_rate.max(1) as f64;

        for (i, &sample) in samples.iter().enumerate() {
            if self.pending.is_empty() {
                self.pending_start = start_time + i as f64 / rate;
            }
            let filtered = self.filter.process(sample);
            self.pending.push(filtered);

            if self.pending.len() >= self.block_size {
                if let Some(onset) = self.evaluate(self.pending_start) {
                    onsets.push(onset);
                }
                self.pending.clear();
            }
        }
        onsets
    }

    fn evaluate(&mut self, time: f64) -> Option<Onset> {
        if self.pending.is_empty() {
            return None;
        }

        let onset = match &mut self.strategy {
            Strategy::Energy {
                baseline,
                last_onset,
            } => {
                let energy = mean_square(&self.pending);
                let smoothing = self.config.smoothing;
                let current = match *baseline {
                    None => energy,
                    Some(b) => b * smoothing + energy * (1.0 - smoothing),
                };
                let threshold = current * self.config.threshold_factor + self.config.epsilon;
                let refractory = self.config.min_interval_ms / 1000.0;
                let rested = last_onset.map_or(true, |last| time - last > refractory);

                if energy > threshold && rested {
                    *last_onset = Some(time);
                    *baseline = Some(current.max(energy));
                    Some(Onset { time, energy })
                } else {
                    *baseline = Some(current);
                    None
                }
            }
            Strategy::LevelCrossing(detector) => {
                let level = mean_abs(&self.pending);
                detector
                    .process_level(level, time)
                    .then_some(Onset {
                        time,
                        energy: level,
                    })
            }
        }?;

        log::debug!(
            "[OnsetDetector] Onset at {:.4}s (energy {:.6})",
            onset.time,
            onset.energy
        );
        self.notify(&onset);
        Some(onset)
    }

    fn notify(&self, onset: &Onset) {
        for listener in &self.listeners {
            if catch_unwind(AssertUnwindSafe(|| listener.on_onset(onset))).is_err() {
                log::warn!("[OnsetDetector] Onset listener panicked; continuing detection");
            }
        }
    }
}

/// Mean of squared samples
pub fn mean_square(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    const SR: u32 = 48000;
    const BLOCK: usize = 512;

    /// Phase-continuous 1 kHz sine, one amplitude per block
    fn sine_blocks(amplitudes: &[f32]) -> Vec<f32> {
        let mut out = Vec::with_capacity(amplitudes.len() * BLOCK);
        let mut n = 0usize;
        for &amp in amplitudes {
            for _ in 0..BLOCK {
                let t = n as f32 / SR as f32;
                out.push(amp * (2.0 * std::f32::consts::PI * 1000.0 * t).sin());
                n += 1;
            }
        }
        out
    }

    fn config() -> OnsetDetectionConfig {
        OnsetDetectionConfig {
            block_size: BLOCK,
            ..OnsetDetectionConfig::default()
        }
    }

    fn block_time(index: usize) -> f64 {
        (index * BLOCK) as f64 / SR as f64
    }

    #[test]
    fn test_spike_after_quiescence_fires_once() {
        let mut detector = OnsetDetector::with_config(SR, config());
        let quiet = 0.01f32;
        let mut amplitudes = vec![quiet; 140];
        amplitudes[100] = quiet * 5.0f32.sqrt(); // 5x energy
        amplitudes[108] = quiet * 10.0; // 100x energy, ~85 ms later
        amplitudes[119] = quiet * 10.0; // ~203 ms later

        let onsets = detector.process(&sine_blocks(&amplitudes), 0.0);
        let times: Vec<f64> = onsets.iter().map(|o| o.time).collect();

        assert_eq!(onsets.len(), 2, "onsets at {:?}", times);
        assert!((times[0] - block_time(100)).abs() < 1e-9);
        assert!((times[1] - block_time(119)).abs() < 1e-9);
    }

    #[test]
    fn test_silence_never_triggers() {
        let mut detector = OnsetDetector::with_config(SR, config());
        let onsets = detector.process(&vec![0.0; BLOCK * 50], 0.0);
        assert!(onsets.is_empty());
    }

    #[test]
    fn test_low_frequency_rumble_is_filtered() {
        let mut detector = OnsetDetector::with_config(SR, config());
        let mut signal = sine_blocks(&vec![0.01; 100]);
        // Hann-windowed 30 Hz swell, 10x the tone's amplitude
        let start = 40 * BLOCK;
        let len = 20 * BLOCK;
        for i in 0..len {
            let t = i as f32 / SR as f32;
            let window =
                0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / (len - 1) as f32).cos());
            signal[start + i] += 0.1 * window * (2.0 * std::f32::consts::PI * 30.0 * t).sin();
        }
        let onsets = detector.process(&signal, 0.0);
        assert!(onsets.is_empty(), "rumble triggered {:?}", onsets);
    }

    #[test]
    fn test_blocks_assemble_across_calls() {
        let mut detector = OnsetDetector::with_config(SR, config());
        let mut amplitudes = vec![0.01f32; 80];
        amplitudes[60] = 0.1;
        let signal = sine_blocks(&amplitudes);

        let mut onsets = Vec::new();
        for (i, chunk) in signal.chunks(300).enumerate() {
            let start = (i * 300) as f64 / SR as f64;
            onsets.extend(detector.process(chunk, start));
        }
        assert_eq!(onsets.len(), 1);
        assert!((onsets[0].time - block_time(60)).abs() < 1e-9);
    }

    #[test]
    fn test_reset_restores_refractory_and_baseline() {
        let mut detector = OnsetDetector::with_config(SR, config());
        let loud = sine_blocks(&[0.01, 0.01, 0.5]);
        assert_eq!(detector.process(&loud, 0.0).len(), 1);

        detector.reset();
        let again = sine_blocks(&[0.01, 0.01, 0.5]);
        assert_eq!(detector.process(&again, 0.02).len(), 1);
    }

    #[test]
    fn test_level_crossing_strategy() {
        let config = OnsetDetectionConfig {
            strategy: OnsetStrategy::LevelCrossing,
            ..config()
        };
        let mut detector = OnsetDetector::with_config(SR, config);
        assert_eq!(detector.strategy(), OnsetStrategy::LevelCrossing);

        let mut amplitudes = vec![0.01f32; 40];
        amplitudes[20] = 0.9;
        let onsets = detector.process(&sine_blocks(&amplitudes), 0.0);
        assert_eq!(onsets.len(), 1);
        assert!((onsets[0].time - block_time(20)).abs() < 1e-9);
    }

    #[test]
    fn test_listener_panic_does_not_abort_detection() {
        struct Panics;
        impl OnsetListener for Panics {
            fn on_onset(&self, _onset: &Onset) {
                panic!("consumer failure");
            }
        }

        #[derive(Default)]
        struct Collect(Mutex<Vec<Onset>>);
        impl OnsetListener for Collect {
            fn on_onset(&self, onset: &Onset) {
                self.0.lock().unwrap().push(*onset);
            }
        }

        let collected = Arc::new(Collect::default());
        let mut detector = OnsetDetector::with_config(SR, config());
        detector.add_listener(Arc::new(Panics));
        detector.add_listener(collected.clone());

        let mut amplitudes = vec![0.01f32; 60];
        amplitudes[20] = 0.3;
        amplitudes[50] = 0.9;
        let onsets = detector.process(&sine_blocks(&amplitudes), 0.0);

        assert_eq!(onsets.len(), 2);
        assert_eq!(collected.0.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_default_blocks_retrigger_on_steady_beat() {
        let clicks = [0.25, 0.75, 1.25, 1.75];
        let signal = crate::testing::click_train(SR, 2.0, &clicks, 0.5);
        let mut detector = OnsetDetector::new(SR);

        let onsets = detector.process(&signal, 0.0);
        assert_eq!(onsets.len(), 4, "equal hits half a second apart all fire");
        for (onset, click) in onsets.iter().zip(clicks) {
            assert!((onset.time - click).abs() < 0.001);
        }
    }

    #[test]
    fn test_mean_square() {
        assert_eq!(mean_square(&[]), 0.0);
        assert!((mean_square(&[1.0, -1.0, 0.0, 0.0]) - 0.5).abs() < 1e-6);
    }
}
