// Periodic timer threads
//
// The scheduler tick and the tempo monitor's idle check both run on a plain
// OS thread that wakes at a fixed period. Neither touches the realtime audio
// callback, so an occasionally late wake-up only shortens the lookahead
// margin for that tick.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::scheduler::LookaheadScheduler;
use crate::error::{log_audio_error, AudioError};

/// Named thread invoking a closure every `period` until stopped
pub struct PeriodicWorker {
    name: String,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicWorker {
    pub fn spawn<F>(name: &str, period: Duration, mut work: F) -> io::Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                while flag.load(Ordering::Acquire) {
                    work();
                    // Unparked early by stop()
                    thread::park_timeout(period);
                }
            })?;

        log::debug!("[PeriodicWorker] {} started ({:?})", name, period);
        Ok(Self {
            name: name.to_string(),
            running,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Signal the thread and wait for it. Safe to call repeatedly.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            handle.thread().unpark();
            if handle.join().is_err() {
                log::warn!("[PeriodicWorker] {} panicked", self.name);
            }
            log::debug!("[PeriodicWorker] {} stopped", self.name);
        }
    }
}

impl Drop for PeriodicWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Drives [`LookaheadScheduler::tick`] from a lookahead timer thread
pub struct SchedulerDriver {
    scheduler: Arc<LookaheadScheduler>,
    worker: Option<PeriodicWorker>,
}

impl SchedulerDriver {
    pub fn new(scheduler: Arc<LookaheadScheduler>) -> Self {
        Self {
            scheduler,
            worker: None,
        }
    }

    pub fn scheduler(&self) -> &Arc<LookaheadScheduler> {
        &self.scheduler
    }

    /// Start the scheduler and its timer thread
    pub fn start(&mut self) -> Result<(), AudioError> {
        if self.worker.is_some() {
            return Err(AudioError::AlreadyRunning);
        }
        self.scheduler.start()?;

        let period = Duration::from_millis(self.scheduler.config().lookahead_ms.max(1));
        let scheduler = Arc::clone(&self.scheduler);
        match PeriodicWorker::spawn("scheduler-tick", period, move || scheduler.tick()) {
            Ok(worker) => {
                self.worker = Some(worker);
                Ok(())
            }
            Err(err) => {
                self.scheduler.stop();
                let err = AudioError::from(err);
                log_audio_error(&err, "SchedulerDriver::start");
                Err(err)
            }
        }
    }

    /// Stop the timer, then the scheduler. Idempotent.
    pub fn stop(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.stop();
        }
        self.scheduler.stop();
    }

    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(PeriodicWorker::is_running)
    }
}

impl Drop for SchedulerDriver {
    fn drop(&mut self) {
        self.stop();
    }
}
