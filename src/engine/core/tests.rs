use std::thread;
use std::time::{Duration, Instant};

use super::*;
use crate::analysis::{TimingClassification, TimingStatus};
use crate::engine::backend::StubBackend;
use crate::testing::{click_train, ENGINE_SAMPLE_RATE};
use crate::trainer::IntervalUnit;

fn stub_engine(start: f64) -> (EngineHandle, Arc<StubBackend>) {
    let backend = Arc::new(StubBackend::new(start));
    let engine = EngineHandle::new(AppConfig::default(), backend.clone());
    (engine, backend)
}

fn wait_for<F: Fn() -> bool>(condition: F) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

#[test]
fn test_playback_schedules_first_click() {
    let (engine, backend) = stub_engine(0.0);
    engine.start_playback().unwrap();
    assert!(engine.is_playing());
    assert!(backend.is_output_running());

    let sounds = backend.recorded().events();
    assert!(!sounds.is_empty(), "start primes one tick");
    assert!((sounds[0].time - 0.05).abs() < 1e-9);

    assert!(matches!(
        engine.start_playback(),
        Err(AudioError::AlreadyRunning)
    ));
    engine.stop_playback();
    engine.stop_playback();
    assert!(!engine.is_playing());
}

#[test]
fn test_listening_fails_closed_without_input() {
    let backend = Arc::new(StubBackend::without_capture(0.0));
    let engine = EngineHandle::new(AppConfig::default(), backend);

    assert!(!engine.start_listening());
    assert!(!engine.is_listening());
    let status = engine.status().status;
    assert_eq!(status.status_code, TimingStatus::NoData);
    assert!(!status.active);
}

#[test]
fn test_listening_classifies_clicks_on_the_grid() {
    let (engine, backend) = stub_engine(10.0);
    engine.scheduler().set_tempo(120);
    let mut hits = engine.subscribe_hits();
    engine.start_playback().unwrap();
    assert!(engine.start_listening());
    assert!(engine.status().status.active);

    let mut capture = backend.take_capture().unwrap();
    let clock = backend.clock_handle();
    let clicks: Vec<f64> = (0..6).map(|i| 0.05 + 0.5 * (i + 1) as f64).collect();
    let signal = click_train(ENGINE_SAMPLE_RATE, 3.4, &clicks, 0.5);
    for (i, chunk) in signal.chunks(1024).enumerate() {
        let start = 10.0 + (i * 1024) as f64 / ENGINE_SAMPLE_RATE as f64;
        clock.set(start);
        while !capture.push_interleaved(chunk, 1, start, ENGINE_SAMPLE_RATE) {
            thread::sleep(Duration::from_millis(1));
        }
    }

    assert!(
        wait_for(|| engine.monitor().status().status_code == TimingStatus::InTime),
        "status was {:?}",
        engine.monitor().status()
    );
    let first = hits.try_recv().unwrap();
    assert_eq!(
        first.timing.map(|t| t.classification),
        Some(TimingClassification::OnTime)
    );

    engine.stop_listening();
    assert!(!engine.is_listening());
    assert!(!engine.monitor().is_active());
    engine.stop_listening();
}

#[test]
fn test_calibration_applies_mean_offset_and_restores_tempo() {
    let (engine, backend) = stub_engine(5.0);
    engine.scheduler().set_tempo(120);
    let mut progress_rx = engine.subscribe_calibration();

    assert_eq!(
        engine.calibration_tap(),
        Err(CalibrationError::NotActive)
    );

    let progress = engine.start_calibration().unwrap();
    assert_eq!(progress.taps_collected, 0);
    assert_eq!(engine.scheduler().transport().tempo(), CALIBRATION_BPM);
    assert!(engine.is_playing());
    assert_eq!(
        engine.start_calibration(),
        Err(CalibrationError::AlreadyInProgress)
    );

    // First click lands at 5.05; every tap is heard 30 ms later
    backend.clock_handle().set(5.08);
    let mut last = None;
    for _ in 0..crate::calibration::DEFAULT_TAPS_NEEDED {
        last = Some(engine.calibration_tap().unwrap());
    }
    let result = last.unwrap().result.unwrap();
    assert_eq!(result.measured_ms, 30);
    assert_eq!(result.applied_ms, 30);

    let status = engine.status();
    assert!((status.latency_offset_ms - 30.0).abs() < 1e-9);
    assert_eq!(status.tempo, 120);
    assert!(!status.playing, "playback was off before calibrating");
    assert!(!status.calibrating);
    assert!(progress_rx.try_recv().is_ok());

    engine.set_manual_latency_ms(-10);
    assert!((engine.status().latency_offset_ms - 20.0).abs() < 1e-9);
}

#[test]
fn test_cancel_calibration_keeps_playback_running() {
    let (engine, _backend) = stub_engine(0.0);
    engine.scheduler().set_tempo(100);
    engine.start_playback().unwrap();

    engine.start_calibration().unwrap();
    engine.cancel_calibration();
    assert!(engine.is_playing());
    assert_eq!(engine.scheduler().transport().tempo(), 100);
}

#[test]
fn test_tap_tempo_sets_transport() {
    let (engine, backend) = stub_engine(1.0);
    let clock = backend.clock_handle();

    assert_eq!(engine.tap_tempo(), None);
    clock.set(1.5);
    assert_eq!(engine.tap_tempo(), None);
    clock.set(2.0);
    assert_eq!(engine.tap_tempo(), Some(120));
    assert_eq!(engine.scheduler().transport().tempo(), 120);
}

#[test]
fn test_ramp_sets_start_tempo() {
    let (engine, _backend) = stub_engine(0.0);
    engine.enable_ramp(RampSettings {
        start: 90,
        end: 120,
        step: 5,
        interval: 2,
        mode: IntervalUnit::Bars,
    });
    assert!(engine.status().ramp_active);
    assert_eq!(engine.scheduler().transport().tempo(), 90);
    engine.disable_ramp();
    assert!(!engine.status().ramp_active);
}

#[test]
fn test_blocks_override_ramp_on_bar_start() {
    let (engine, _backend) = stub_engine(0.0);
    engine.enable_ramp(RampSettings {
        start: 90,
        end: 120,
        step: 5,
        interval: 1,
        mode: IntervalUnit::Bars,
    });
    assert!(engine.start_blocks(vec![
        TempoBlock {
            bpm: 70,
            duration: 1,
            unit: IntervalUnit::Bars,
            label: String::new(),
        },
        TempoBlock {
            bpm: 50,
            duration: 1,
            unit: IntervalUnit::Bars,
            label: String::new(),
        },
    ]));
    assert_eq!(engine.scheduler().transport().tempo(), 70);
    assert!(engine.status().blocks_active);

    // Priming emits bar 0: the first block ends, the ramp stays put
    engine.scheduler().start().unwrap();
    assert_eq!(engine.scheduler().transport().tempo(), 50);
    assert_eq!(engine.block_status(), "Block 2/2");
    engine.scheduler().stop();

    engine.stop_blocks();
    assert!(!engine.status().blocks_active);
    assert_eq!(engine.block_status(), "Off");
}
