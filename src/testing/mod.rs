//! Deterministic test harness utilities.
//!
//! Synthetic PCM (silence, seeded noise, click trains), a fixed beat grid
//! standing in for a running scheduler, and a listener that records every
//! callback the pipeline emits. Used by unit tests, `tests/` and the CLI's
//! offline `analyze` command.

use std::f32::consts::PI;
use std::sync::{Mutex, MutexGuard, PoisonError};

use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::analysis::onset::{Onset, OnsetListener};
use crate::analysis::tempo_monitor::{StatusListener, StatusReport};
use crate::audio::metronome::beat_duration;
use crate::audio::scheduler::{
    BarStartEvent, BeatEvent, BeatGridSnapshot, BeatGridSource, PolyTickEvent, SchedulerEvent,
    SchedulerListener, TickEvent,
};

/// Sample rate used by synthetic fixtures
pub const ENGINE_SAMPLE_RATE: u32 = 48_000;

const CLICK_FREQUENCY_HZ: f32 = 2_000.0;
const CLICK_SECS: f64 = 0.015;

/// Endless main-beat grid starting at `origin`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedGrid {
    origin: f64,
    bpm: u32,
    beat_unit: u32,
    beat_duration: f64,
}

impl FixedGrid {
    pub fn new(origin: f64, bpm: u32, beat_unit: u32) -> Self {
        Self {
            origin,
            bpm,
            beat_unit,
            beat_duration: beat_duration(bpm, beat_unit),
        }
    }

    pub fn beat_time(&self, index: u64) -> f64 {
        self.origin + index as f64 * self.beat_duration
    }

    pub fn beat_duration(&self) -> f64 {
        self.beat_duration
    }
}

impl BeatGridSource for FixedGrid {
    fn grid_snapshot(&self, time: f64, window_beats: f64) -> BeatGridSnapshot {
        let window = window_beats.abs() * self.beat_duration;
        let first = ((time - window - self.origin) / self.beat_duration)
            .floor()
            .max(0.0) as u64;
        let last = ((time + window - self.origin) / self.beat_duration).ceil();

        let mut beats = Vec::new();
        if last >= 0.0 {
            for index in first..=last as u64 {
                let beat = self.beat_time(index);
                if (beat - time).abs() <= window {
                    beats.push(beat);
                }
            }
        }

        BeatGridSnapshot {
            target_bpm: self.bpm,
            beat_unit: self.beat_unit,
            beat_duration: self.beat_duration,
            beats,
        }
    }

    fn recent_beats(&self) -> Vec<BeatEvent> {
        Vec::new()
    }
}

/// `count` beat times at `bpm` quarter notes from `origin`, each shifted by `offset`
pub fn beat_times(origin: f64, bpm: u32, count: usize, offset: f64) -> Vec<f64> {
    let beat = beat_duration(bpm, 4);
    (0..count)
        .map(|i| origin + i as f64 * beat + offset)
        .collect()
}

pub fn silence(sample_rate: u32, secs: f64) -> Vec<f32> {
    vec![0.0; (secs * sample_rate as f64).round() as usize]
}

/// Uniform white noise, reproducible per seed
pub fn white_noise(sample_rate: u32, secs: f64, amplitude: f32, seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    let len = (secs * sample_rate as f64).round() as usize;
    let amplitude = amplitude.abs().max(f32::EPSILON);
    (0..len)
        .map(|_| rng.gen_range(-amplitude..amplitude))
        .collect()
}

/// Short decaying 2 kHz bursts starting at each of `click_times` (seconds
/// from the first sample). Clicks past the end are dropped.
pub fn click_train(sample_rate: u32, secs: f64, click_times: &[f64], amplitude: f32) -> Vec<f32> {
    let mut signal = silence(sample_rate, secs);
    add_clicks(&mut signal, sample_rate, click_times, amplitude);
    signal
}

/// Mix clicks into an existing signal
pub fn add_clicks(signal: &mut [f32], sample_rate: u32, click_times: &[f64], amplitude: f32) {
    let click_len = (CLICK_SECS * sample_rate as f64) as usize;
    for &time in click_times {
        if time < 0.0 {
            continue;
        }
        let start = (time * sample_rate as f64).round() as usize;
        for i in 0..click_len {
            let Some(sample) = signal.get_mut(start + i) else {
                break;
            };
            let t = i as f32 / sample_rate as f32;
            let envelope = (-(i as f32) / (click_len as f32 / 5.0)).exp();
            *sample += amplitude * envelope * (2.0 * PI * CLICK_FREQUENCY_HZ * t).sin();
        }
    }
}

/// Records every scheduler, onset and status callback it receives
#[derive(Default)]
pub struct EventRecorder {
    scheduler: Mutex<Vec<SchedulerEvent>>,
    onsets: Mutex<Vec<Onset>>,
    statuses: Mutex<Vec<StatusReport>>,
}

impl EventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scheduler_events(&self) -> Vec<SchedulerEvent> {
        lock(&self.scheduler).clone()
    }

    pub fn ticks(&self) -> Vec<TickEvent> {
        lock(&self.scheduler)
            .iter()
            .filter_map(|event| match event {
                SchedulerEvent::Tick(tick) => Some(*tick),
                _ => None,
            })
            .collect()
    }

    pub fn bar_starts(&self) -> Vec<BarStartEvent> {
        lock(&self.scheduler)
            .iter()
            .filter_map(|event| match event {
                SchedulerEvent::BarStart(bar) => Some(*bar),
                _ => None,
            })
            .collect()
    }

    pub fn poly_ticks(&self) -> Vec<PolyTickEvent> {
        lock(&self.scheduler)
            .iter()
            .filter_map(|event| match event {
                SchedulerEvent::PolyTick(poly) => Some(*poly),
                _ => None,
            })
            .collect()
    }

    pub fn onsets(&self) -> Vec<Onset> {
        lock(&self.onsets).clone()
    }

    pub fn statuses(&self) -> Vec<StatusReport> {
        lock(&self.statuses).clone()
    }

    pub fn clear(&self) {
        lock(&self.scheduler).clear();
        lock(&self.onsets).clear();
        lock(&self.statuses).clear();
    }
}

impl SchedulerListener for EventRecorder {
    fn on_tick(&self, event: &TickEvent) {
        lock(&self.scheduler).push(SchedulerEvent::Tick(*event));
    }

    fn on_bar_start(&self, event: &BarStartEvent) {
        lock(&self.scheduler).push(SchedulerEvent::BarStart(*event));
    }

    fn on_poly_tick(&self, event: &PolyTickEvent) {
        lock(&self.scheduler).push(SchedulerEvent::PolyTick(*event));
    }
}

impl OnsetListener for EventRecorder {
    fn on_onset(&self, onset: &Onset) {
        lock(&self.onsets).push(*onset);
    }
}

impl StatusListener for EventRecorder {
    fn on_status_change(&self, status: &StatusReport) {
        lock(&self.statuses).push(status.clone());
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_grid_window() {
        let grid = FixedGrid::new(10.0, 120, 4);
        let snapshot = grid.grid_snapshot(11.1, 1.25);
        assert_eq!(snapshot.beats, vec![10.5, 11.0, 11.5]);
        assert_eq!(snapshot.target_bpm, 120);
        assert_eq!(snapshot.beat_duration, 0.5);
    }

    #[test]
    fn test_fixed_grid_before_origin() {
        let grid = FixedGrid::new(10.0, 120, 4);
        assert!(grid.grid_snapshot(5.0, 1.25).beats.is_empty());
        assert_eq!(grid.grid_snapshot(9.6, 1.0).beats, vec![10.0]);
    }

    #[test]
    fn test_click_train_places_clicks() {
        let signal = click_train(ENGINE_SAMPLE_RATE, 1.0, &[0.25, 0.75, 2.0], 0.8);
        assert_eq!(signal.len(), 48_000);
        assert_eq!(signal[12_000 - 1], 0.0);
        assert!(signal[12_000..12_100].iter().any(|s| s.abs() > 0.1));
        assert!(signal[36_000..36_100].iter().any(|s| s.abs() > 0.1));
        assert!(signal[20_000..30_000].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_white_noise_is_reproducible() {
        let a = white_noise(ENGINE_SAMPLE_RATE, 0.01, 0.1, 7);
        let b = white_noise(ENGINE_SAMPLE_RATE, 0.01, 0.1, 7);
        assert_eq!(a, b);
        assert!(a.iter().all(|s| s.abs() <= 0.1));
    }

    #[test]
    fn test_beat_times_offset() {
        let times = beat_times(1.0, 120, 3, 0.04);
        assert_eq!(times.len(), 3);
        assert!((times[2] - 2.04).abs() < 1e-9);
    }
}
