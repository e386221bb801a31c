use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::audio::buffer_pool::CaptureThreadChannels;
use crate::audio::clock::{AudioClock, ManualClock, RecordingSink, SoundSink};
use crate::error::AudioError;

use super::AudioBackend;

/// Deterministic backend used for tests and CLI dry runs.
///
/// Time only moves through [`StubBackend::clock_handle`], scheduled sounds
/// are recorded, and the capture channels are parked so a caller can push
/// synthetic audio with [`StubBackend::take_capture`].
pub struct StubBackend {
    clock: Arc<ManualClock>,
    sink: Arc<RecordingSink>,
    output_running: AtomicBool,
    capture: Mutex<Option<CaptureThreadChannels>>,
    capture_available: AtomicBool,
}

impl StubBackend {
    pub fn new(start_time: f64) -> Self {
        Self {
            clock: Arc::new(ManualClock::new(start_time)),
            sink: Arc::new(RecordingSink::new()),
            output_running: AtomicBool::new(false),
            capture: Mutex::new(None),
            capture_available: AtomicBool::new(true),
        }
    }

    /// Simulate a machine without a microphone (or with permission denied)
    pub fn without_capture(start_time: f64) -> Self {
        let backend = Self::new(start_time);
        backend.capture_available.store(false, Ordering::Release);
        backend
    }

    pub fn clock_handle(&self) -> Arc<ManualClock> {
        Arc::clone(&self.clock)
    }

    pub fn recorded(&self) -> Arc<RecordingSink> {
        Arc::clone(&self.sink)
    }

    pub fn is_output_running(&self) -> bool {
        self.output_running.load(Ordering::Acquire)
    }

    /// Take the capture end handed over by the last `start_capture`
    pub fn take_capture(&self) -> Option<CaptureThreadChannels> {
        self.lock_capture().take()
    }

    fn lock_capture(&self) -> MutexGuard<'_, Option<CaptureThreadChannels>> {
        self.capture.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new(0.0)
    }
}

impl AudioBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn clock(&self) -> Arc<dyn AudioClock> {
        self.clock.clone()
    }

    fn sink(&self) -> Arc<dyn SoundSink> {
        self.sink.clone()
    }

    fn start_output(&self) -> Result<(), AudioError> {
        if self.output_running.swap(true, Ordering::AcqRel) {
            return Err(AudioError::AlreadyRunning);
        }
        Ok(())
    }

    fn stop_output(&self) {
        self.output_running.store(false, Ordering::Release);
    }

    fn start_capture(&self, channels: CaptureThreadChannels) -> Result<(), AudioError> {
        if !self.capture_available.load(Ordering::Acquire) {
            return Err(AudioError::DeviceUnavailable {
                direction: "input".to_string(),
            });
        }
        let mut slot = self.lock_capture();
        if slot.is_some() {
            return Err(AudioError::AlreadyRunning);
        }
        *slot = Some(channels);
        Ok(())
    }

    fn stop_capture(&self) {
        self.lock_capture().take();
    }
}
