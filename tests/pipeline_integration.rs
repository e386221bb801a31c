//! Integration tests for the listening pipeline
//!
//! Synthetic audio through the onset detector into the tempo monitor, plus
//! the monitor's verdicts against a fixed beat grid:
//! - Refractory suppression of close onsets
//! - IN_TIME / BEHIND convergence with hysteresis
//! - No-data timeout on the audio clock

use std::sync::Arc;

use tempo_coach::analysis::{OnsetDetector, TempoMonitor, TimingStatus};
use tempo_coach::audio::clock::ManualClock;
use tempo_coach::audio::scheduler::BeatGridSource;
use tempo_coach::config::TempoMonitorConfig;
use tempo_coach::testing::{
    beat_times, click_train, white_noise, EventRecorder, FixedGrid, ENGINE_SAMPLE_RATE,
};

struct Pipeline {
    clock: Arc<ManualClock>,
    recorder: Arc<EventRecorder>,
    monitor: Arc<TempoMonitor>,
}

impl Pipeline {
    /// 120 BPM grid with its first beat at `origin`
    fn new(origin: f64) -> Self {
        let clock = Arc::new(ManualClock::new(origin));
        let grid: Arc<dyn BeatGridSource> = Arc::new(FixedGrid::new(origin, 120, 4));
        let monitor = Arc::new(TempoMonitor::new(
            TempoMonitorConfig::default(),
            grid,
            clock.clone(),
        ));
        let recorder = Arc::new(EventRecorder::new());
        monitor.add_listener(recorder.clone());
        monitor.start();
        Self {
            clock,
            recorder,
            monitor,
        }
    }

    fn hit(&self, time: f64) {
        self.clock.set(time);
        self.monitor.handle_onset(time);
    }

    /// Feed `signal` (starting at `start`) through a fresh detector in 1024-sample chunks
    fn listen(&self, signal: &[f32], start: f64) -> usize {
        let mut detector = OnsetDetector::new(ENGINE_SAMPLE_RATE);
        detector.add_listener(self.monitor.clone());
        detector.add_listener(self.recorder.clone());
        let rate = ENGINE_SAMPLE_RATE as f64;
        let mut onsets = 0;
        for (i, chunk) in signal.chunks(1024).enumerate() {
            let chunk_start = start + (i * 1024) as f64 / rate;
            self.clock.set(chunk_start + chunk.len() as f64 / rate);
            onsets += detector.process(chunk, chunk_start).len();
        }
        onsets
    }
}

#[test]
fn test_single_drift_sample_stays_no_data() {
    let p = Pipeline::new(10.0);
    p.hit(10.5);
    assert_eq!(p.monitor.status().status_code, TimingStatus::NoData);
    assert!(p.monitor.status().active);
}

#[test]
fn test_on_grid_hits_converge_to_in_time() {
    let p = Pipeline::new(10.0);
    for time in beat_times(10.0, 120, 6, 0.0) {
        p.hit(time);
    }

    let status = p.monitor.status();
    assert_eq!(status.status_code, TimingStatus::InTime);
    assert!(status.avg_drift_ms.unwrap().abs() < 1e-6);
    assert_eq!(status.target_bpm, Some(120));
    assert!((status.player_bpm.unwrap() - 120.0).abs() < 0.5);
}

#[test]
fn test_late_hits_converge_to_behind() {
    let p = Pipeline::new(10.0);
    let times = beat_times(10.0, 120, 6, 0.040);

    p.hit(times[0]);
    p.hit(times[1]);
    assert_eq!(
        p.monitor.status().status_code,
        TimingStatus::NoData,
        "one consistent evaluation is not enough"
    );
    for &time in &times[2..] {
        p.hit(time);
    }

    let status = p.monitor.status();
    assert_eq!(status.status_code, TimingStatus::Behind);
    assert!((status.avg_drift_ms.unwrap() - 40.0).abs() < 1e-6);

    let published: Vec<TimingStatus> = p
        .recorder
        .statuses()
        .iter()
        .map(|s| s.status_code)
        .collect();
    assert_eq!(published, vec![TimingStatus::NoData, TimingStatus::Behind]);
}

#[test]
fn test_silence_times_out_to_no_data() {
    let p = Pipeline::new(10.0);
    for time in beat_times(10.0, 120, 6, 0.0) {
        p.hit(time);
    }
    assert_eq!(p.monitor.status().status_code, TimingStatus::InTime);

    p.clock.advance(7.9);
    assert!(!p.monitor.check_idle());
    p.clock.advance(0.2);
    assert!(p.monitor.check_idle());

    assert_eq!(p.monitor.status().status_code, TimingStatus::NoData);
    assert!(p.monitor.drift_history().is_empty());
    assert_eq!(p.monitor.onset_count(), 0);
}

#[test]
fn test_refractory_suppresses_second_spike() {
    let p = Pipeline::new(0.0);
    // Quiet noise floor, a hit at 0.5 s and a second one 80 ms later
    let mut signal = white_noise(ENGINE_SAMPLE_RATE, 1.0, 0.001, 7);
    let clicks = click_train(ENGINE_SAMPLE_RATE, 1.0, &[0.5, 0.58], 0.5);
    for (s, c) in signal.iter_mut().zip(clicks) {
        *s += c;
    }

    assert_eq!(p.listen(&signal, 0.0), 1);
    let onsets = p.recorder.onsets();
    assert!((onsets[0].time - 0.5).abs() < 0.002);
}

#[test]
fn test_late_click_track_reports_behind() {
    let p = Pipeline::new(0.0);
    let clicks = beat_times(0.0, 120, 8, 0.035);
    let signal = click_train(ENGINE_SAMPLE_RATE, 4.2, &clicks, 0.5);

    assert_eq!(p.listen(&signal, 0.0), 8);
    let status = p.monitor.status();
    assert_eq!(status.status_code, TimingStatus::Behind);
    let drift = status.avg_drift_ms.unwrap();
    assert!(drift > 33.0 && drift <= 35.0, "drift {}", drift);
    assert!(status.status_text.starts_with("Slightly behind"));
}
