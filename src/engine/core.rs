//! EngineHandle: the orchestration layer shared by the CLI and embedders.
//!
//! Wires one scheduler, one tempo monitor and the capture/analysis pipeline
//! to an [`AudioBackend`], and exposes every result stream as a tokio
//! broadcast channel.
//!
//! Threads owned while running:
//! - `scheduler-tick`: lookahead timer driving the scheduler (20 ms)
//! - `analysis`: drains capture blocks through the onset detector
//! - `tempo-idle`: periodic no-data check for the tempo monitor (500 ms)
//! - the backend's own stream threads

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::analysis::{
    spawn_analysis_thread, HitResult, OnsetDetector, Quantizer, StatusReport, TapTempo,
    TempoMonitor,
};
use crate::audio::buffer_pool::BufferPool;
use crate::audio::driver::{PeriodicWorker, SchedulerDriver};
use crate::audio::scheduler::{
    BeatGridSource, LookaheadScheduler, SchedulerEvent, StepPattern,
};
use crate::calibration::{CalibrationProgress, LatencyCalibration};
use crate::config::AppConfig;
use crate::engine::backend::{AudioBackend, CpalBackend};
use crate::error::{log_audio_error, log_calibration_error, AudioError, CalibrationError};
use crate::telemetry::{self, DiagnosticError, LifecyclePhase, TelemetryBridge};
use crate::trainer::{RampSettings, RampTrainer, TempoBlock, TempoBlocks};

/// Tempo used while calibrating latency
pub const CALIBRATION_BPM: u32 = 80;

const DEFAULT_SAMPLE_RATE: u32 = 48_000;

/// Point-in-time summary for front-ends
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStatus {
    pub backend: String,
    pub playing: bool,
    pub listening: bool,
    pub tempo: u32,
    pub latency_offset_ms: f64,
    pub calibrating: bool,
    pub ramp_active: bool,
    pub blocks_active: bool,
    pub status: StatusReport,
}

/// Broadcast senders for every engine output stream
struct BroadcastChannels {
    scheduler: broadcast::Sender<SchedulerEvent>,
    status: broadcast::Sender<StatusReport>,
    hits: broadcast::Sender<HitResult>,
    calibration: broadcast::Sender<CalibrationProgress>,
}

impl BroadcastChannels {
    fn new() -> Self {
        Self {
            scheduler: broadcast::channel(256).0,
            status: broadcast::channel(64).0,
            hits: broadcast::channel(128).0,
            calibration: broadcast::channel(32).0,
        }
    }
}

/// Capture pipeline threads owned while listening
struct ListeningSession {
    running: Arc<AtomicBool>,
    analysis: Option<JoinHandle<()>>,
    idle_check: PeriodicWorker,
}

/// Transport state to put back once calibration ends
#[derive(Debug, Clone, Copy)]
struct CalibrationRestore {
    tempo: u32,
    was_playing: bool,
}

pub struct EngineHandle {
    config: AppConfig,
    backend: Arc<dyn AudioBackend>,
    scheduler: Arc<LookaheadScheduler>,
    driver: Mutex<SchedulerDriver>,
    monitor: Arc<TempoMonitor>,
    trainer: Arc<RampTrainer>,
    blocks: Arc<TempoBlocks>,
    calibration: Mutex<LatencyCalibration>,
    calibration_restore: Mutex<Option<CalibrationRestore>>,
    tap_tempo: Mutex<TapTempo>,
    listening: Mutex<Option<ListeningSession>>,
    broadcasts: BroadcastChannels,
}

impl EngineHandle {
    pub fn new(config: AppConfig, backend: Arc<dyn AudioBackend>) -> Self {
        let clock = backend.clock();
        let scheduler = Arc::new(LookaheadScheduler::new(
            config.scheduler.clone(),
            Arc::clone(&clock),
            backend.sink(),
        ));
        let grid: Arc<dyn BeatGridSource> = scheduler.clone();
        let monitor = Arc::new(TempoMonitor::new(
            config.tempo_monitor.clone(),
            grid,
            clock,
        ));
        let blocks = Arc::new(TempoBlocks::new(&scheduler));
        let trainer = Arc::new(RampTrainer::with_blocks(&scheduler, &blocks));
        let broadcasts = BroadcastChannels::new();

        scheduler.add_listener(Arc::new(broadcasts.scheduler.clone()));
        scheduler.add_listener(trainer.clone());
        scheduler.add_listener(blocks.clone());
        scheduler.add_listener(Arc::new(TelemetryBridge));
        monitor.add_listener(Arc::new(broadcasts.status.clone()));
        monitor.add_listener(Arc::new(TelemetryBridge));

        log::info!("[EngineHandle] Created with {} backend", backend.name());

        Self {
            driver: Mutex::new(SchedulerDriver::new(Arc::clone(&scheduler))),
            config,
            backend,
            scheduler,
            monitor,
            trainer,
            blocks,
            calibration: Mutex::new(LatencyCalibration::default()),
            calibration_restore: Mutex::new(None),
            tap_tempo: Mutex::new(TapTempo::new()),
            listening: Mutex::new(None),
            broadcasts,
        }
    }

    /// Engine on the default desktop audio devices
    pub fn with_cpal(config: AppConfig) -> Self {
        let backend = Arc::new(CpalBackend::new(config.audio.clone()));
        Self::new(config, backend)
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Transport setters and grid queries go straight to the scheduler
    pub fn scheduler(&self) -> &Arc<LookaheadScheduler> {
        &self.scheduler
    }

    pub fn monitor(&self) -> &Arc<TempoMonitor> {
        &self.monitor
    }

    pub fn status(&self) -> EngineStatus {
        let transport = self.scheduler.transport();
        EngineStatus {
            backend: self.backend.name().to_string(),
            playing: self.scheduler.is_playing(),
            listening: self.is_listening(),
            tempo: transport.tempo(),
            latency_offset_ms: transport.latency_offset_secs() * 1000.0,
            calibrating: lock(&self.calibration).is_active(),
            ramp_active: self.trainer.is_active(),
            blocks_active: self.blocks.is_active(),
            status: self.monitor.status(),
        }
    }

    // ========================================================================
    // STREAMS
    // ========================================================================

    pub fn subscribe_scheduler(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.broadcasts.scheduler.subscribe()
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<StatusReport> {
        self.broadcasts.status.subscribe()
    }

    pub fn subscribe_hits(&self) -> broadcast::Receiver<HitResult> {
        self.broadcasts.hits.subscribe()
    }

    pub fn subscribe_calibration(&self) -> broadcast::Receiver<CalibrationProgress> {
        self.broadcasts.calibration.subscribe()
    }

    // ========================================================================
    // PLAYBACK
    // ========================================================================

    fn ensure_output(&self) -> Result<(), AudioError> {
        match self.backend.start_output() {
            Ok(()) | Err(AudioError::AlreadyRunning) => Ok(()),
            Err(err) => {
                log_audio_error(&err, "EngineHandle::ensure_output");
                telemetry::hub().record_error(DiagnosticError::DeviceUnavailable, err.to_string());
                Err(err)
            }
        }
    }

    pub fn start_playback(&self) -> Result<(), AudioError> {
        self.ensure_output()?;
        lock(&self.driver).start()?;
        telemetry::hub().record_lifecycle(LifecyclePhase::PlaybackStarted);
        Ok(())
    }

    /// Idempotent. Clicks already handed to the output finish playing.
    pub fn stop_playback(&self) {
        let was_playing = self.scheduler.is_playing();
        lock(&self.driver).stop();
        if was_playing {
            telemetry::hub().record_lifecycle(LifecyclePhase::PlaybackStopped);
        }
    }

    pub fn is_playing(&self) -> bool {
        self.scheduler.is_playing()
    }

    pub fn preview_pattern(
        &self,
        pattern: &StepPattern,
        tempo: Option<u32>,
    ) -> Result<(), AudioError> {
        self.ensure_output()?;
        self.scheduler.preview_pattern(pattern, tempo)
    }

    // ========================================================================
    // LISTENING
    // ========================================================================

    /// Open the capture device and start classifying.
    ///
    /// Fails closed: when no input is available this logs, leaves the
    /// monitor at NO_DATA and returns `false`.
    pub fn start_listening(&self) -> bool {
        let mut session = lock(&self.listening);
        if session.is_some() {
            return true;
        }
        if self.ensure_output().is_err() {
            return false;
        }

        let (capture, analysis) = BufferPool::new(
            self.config.audio.buffer_pool_size,
            self.config.audio.buffer_size,
        )
        .split_for_threads();

        if let Err(err) = self.backend.start_capture(capture) {
            log_audio_error(&err, "EngineHandle::start_listening");
            telemetry::hub().record_error(DiagnosticError::DeviceUnavailable, err.to_string());
            return false;
        }

        let mut detector = OnsetDetector::with_config(
            self.config.audio.sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE),
            self.config.onset_detection.clone(),
        );
        detector.add_listener(self.monitor.clone());
        detector.add_listener(Arc::new(TelemetryBridge));
        let grid: Arc<dyn BeatGridSource> = self.scheduler.clone();
        let quantizer = Quantizer::new(grid);

        let running = Arc::new(AtomicBool::new(true));
        let analysis = match spawn_analysis_thread(
            analysis,
            detector,
            quantizer,
            self.broadcasts.hits.clone(),
            Arc::clone(&running),
        ) {
            Ok(handle) => handle,
            Err(err) => {
                let err = AudioError::from(err);
                log_audio_error(&err, "EngineHandle::start_listening");
                self.backend.stop_capture();
                return false;
            }
        };

        self.monitor.start();
        let monitor = Arc::clone(&self.monitor);
        let period = Duration::from_millis(self.config.tempo_monitor.idle_check_ms.max(1));
        let idle_check = match PeriodicWorker::spawn("tempo-idle", period, move || {
            monitor.check_idle();
        }) {
            Ok(worker) => worker,
            Err(err) => {
                let err = AudioError::from(err);
                log_audio_error(&err, "EngineHandle::start_listening");
                self.backend.stop_capture();
                running.store(false, Ordering::Release);
                let _ = analysis.join();
                self.monitor.stop();
                return false;
            }
        };

        *session = Some(ListeningSession {
            running,
            analysis: Some(analysis),
            idle_check,
        });
        telemetry::hub().record_lifecycle(LifecyclePhase::ListeningStarted);
        log::info!("[EngineHandle] Listening");
        true
    }

    /// Close the capture device and drain the analysis thread. Idempotent.
    pub fn stop_listening(&self) {
        let Some(mut session) = lock(&self.listening).take() else {
            return;
        };
        self.backend.stop_capture();
        session.running.store(false, Ordering::Release);
        if let Some(handle) = session.analysis.take() {
            if handle.join().is_err() {
                log::warn!("[EngineHandle] Analysis thread panicked");
            }
        }
        session.idle_check.stop();
        self.monitor.stop();
        telemetry::hub().record_lifecycle(LifecyclePhase::ListeningStopped);
        log::info!("[EngineHandle] Listening stopped");
    }

    pub fn is_listening(&self) -> bool {
        lock(&self.listening).is_some()
    }

    pub fn set_input_latency_ms(&self, ms: f64) {
        self.monitor.set_input_latency_ms(ms);
    }

    // ========================================================================
    // TAP TEMPO / TRAINERS
    // ========================================================================

    /// Register a tap now; applies and returns the tempo once enough taps agree
    pub fn tap_tempo(&self) -> Option<u32> {
        let now = self.scheduler.clock().now();
        let bpm = lock(&self.tap_tempo).tap(now)?;
        self.scheduler.set_tempo(bpm);
        log::info!("[EngineHandle] Tap tempo {} BPM", bpm);
        Some(bpm)
    }

    pub fn enable_ramp(&self, settings: RampSettings) {
        self.trainer.enable(settings);
    }

    pub fn disable_ramp(&self) {
        self.trainer.disable();
    }

    /// Play `blocks` in order; the ramp holds while they run
    pub fn start_blocks(&self, blocks: Vec<TempoBlock>) -> bool {
        self.blocks.start(blocks)
    }

    pub fn stop_blocks(&self) {
        self.blocks.stop();
    }

    pub fn block_status(&self) -> String {
        self.blocks.status_text()
    }

    // ========================================================================
    // CALIBRATION
    // ========================================================================

    /// Begin latency calibration at 80 BPM, starting playback if needed
    pub fn start_calibration(&self) -> Result<CalibrationProgress, CalibrationError> {
        let progress = {
            let mut calibration = lock(&self.calibration);
            calibration.start().map_err(|err| {
                log_calibration_error(&err, "EngineHandle::start_calibration");
                err
            })?;
            calibration.progress()
        };

        let restore = CalibrationRestore {
            tempo: self.scheduler.transport().tempo(),
            was_playing: self.scheduler.is_playing(),
        };
        *lock(&self.calibration_restore) = Some(restore);
        self.scheduler.set_tempo(CALIBRATION_BPM);

        if !restore.was_playing {
            if let Err(err) = self.start_playback() {
                log_audio_error(&err, "EngineHandle::start_calibration");
                lock(&self.calibration).cancel();
                self.restore_after_calibration();
                return Err(CalibrationError::NoReferenceBeat);
            }
        }

        let _ = self.broadcasts.calibration.send(progress.clone());
        Ok(progress)
    }

    /// Register a calibration tap at the current audio time
    pub fn calibration_tap(&self) -> Result<CalibrationProgress, CalibrationError> {
        let now = self.scheduler.clock().now();
        let recent = self.scheduler.recent_beats();
        let progress = lock(&self.calibration).tap(now, &recent).map_err(|err| {
            log_calibration_error(&err, "EngineHandle::calibration_tap");
            err
        })?;

        if let Some(result) = progress.result {
            self.scheduler.set_latency_offset_ms(result.applied_ms as f64);
            self.restore_after_calibration();
        }
        let _ = self.broadcasts.calibration.send(progress.clone());
        Ok(progress)
    }

    pub fn cancel_calibration(&self) {
        lock(&self.calibration).cancel();
        self.restore_after_calibration();
    }

    /// Manual latency trim added on top of the measured value
    pub fn set_manual_latency_ms(&self, ms: i64) {
        let applied = {
            let mut calibration = lock(&self.calibration);
            calibration.set_manual_ms(ms);
            calibration.applied_ms()
        };
        self.scheduler.set_latency_offset_ms(applied as f64);
    }

    fn restore_after_calibration(&self) {
        let Some(restore) = lock(&self.calibration_restore).take() else {
            return;
        };
        self.scheduler.set_tempo(restore.tempo);
        if !restore.was_playing {
            self.stop_playback();
        }
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Stop everything and close the output device
    pub fn shutdown(&self) {
        self.stop_listening();
        self.stop_playback();
        self.backend.stop_output();
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests;
