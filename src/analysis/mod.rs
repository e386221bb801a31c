// Analysis module - onset detection, per-hit timing and tempo/drift classification
//
// Architecture:
// - AnalysisWorker: thread loop that consumes capture blocks from the buffer pool
// - Pipeline: OnsetDetector -> (listeners: TempoMonitor, telemetry) + Quantizer
// - Output: HitResult per onset via tokio broadcast; status via TempoMonitor listeners
//
// The capture callback never waits on this thread: when the worker falls
// behind, the pool runs dry and the callback drops input (see buffer_pool.rs).

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rtrb::PopError;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::audio::buffer_pool::AnalysisThreadChannels;
use crate::telemetry;

pub mod level_crossing;
pub mod onset;
pub mod quantizer;
pub mod tap_tempo;
pub mod tempo_monitor;

pub use onset::{Onset, OnsetDetector, OnsetListener};
pub use quantizer::{Quantizer, TimingClassification, TimingFeedback};
pub use tap_tempo::TapTempo;
pub use tempo_monitor::{StatusColor, StatusListener, StatusReport, TempoMonitor, TimingStatus};

/// One detected hit with its immediate timing verdict
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HitResult {
    pub onset: Onset,
    /// `None` when no beat was near (transport stopped)
    pub timing: Option<TimingFeedback>,
}

/// Idle wait when the data queue is empty
const IDLE_POLL: Duration = Duration::from_millis(1);

const OCCUPANCY_EVERY_N_BLOCKS: u64 = 32;

struct AnalysisWorker {
    channels: AnalysisThreadChannels,
    detector: OnsetDetector,
    quantizer: Quantizer,
    hit_tx: broadcast::Sender<HitResult>,
    running: Arc<AtomicBool>,
    processed_blocks: u64,
}

impl AnalysisWorker {
    fn run(mut self) {
        log::info!(
            "[AnalysisThread] Starting analysis loop ({:?} strategy)",
            self.detector.strategy()
        );

        loop {
            let block = match self.channels.data_consumer.pop() {
                Ok(block) => block,
                Err(PopError::Empty) => {
                    // Drain everything queued before honouring shutdown
                    if !self.running.load(Ordering::Acquire) {
                        break;
                    }
                    thread::sleep(IDLE_POLL);
                    continue;
                }
            };

            if block.sample_rate != 0 && block.sample_rate != self.detector.sample_rate() {
                log::info!(
                    "[AnalysisThread] Input rate changed to {} Hz",
                    block.sample_rate
                );
                self.detector.set_sample_rate(block.sample_rate);
            }

            let onsets = self.detector.process(&block.samples, block.start_time);
            self.processed_blocks += 1;

            if self.channels.pool_producer.push(block).is_err() {
                log::warn!("[AnalysisThread] Pool queue full, dropping block");
                telemetry::hub()
                    .record_error(telemetry::DiagnosticError::BufferDrain, "pool queue full");
            }

            if self.processed_blocks % OCCUPANCY_EVERY_N_BLOCKS == 0 {
                let capacity = self.channels.data_consumer.buffer().capacity().max(1);
                let queued = self.channels.data_consumer.slots();
                telemetry::hub().record_buffer_occupancy(
                    "capture_queue",
                    queued as f32 / capacity as f32 * 100.0,
                );
            }

            for onset in onsets {
                self.dispatch(onset);
            }
        }

        log::info!(
            "[AnalysisThread] Exiting after {} blocks",
            self.processed_blocks
        );
    }

    fn dispatch(&self, onset: Onset) {
        let timing = self.quantizer.quantize(onset.time);
        if let Some(feedback) = timing.as_ref() {
            telemetry::hub().record_hit(feedback);
        }
        log::debug!(
            "[AnalysisThread] Onset at {:.3}s energy {:.2e} timing {:?}",
            onset.time,
            onset.energy,
            timing.map(|t| t.classification)
        );
        let _ = self.hit_tx.send(HitResult { onset, timing });
    }
}

/// Spawn the analysis thread.
///
/// The detector's own listeners (tempo monitor, telemetry) are called on
/// this thread for every onset. The thread exits once `running` is cleared
/// and the data queue is drained.
pub fn spawn_analysis_thread(
    channels: AnalysisThreadChannels,
    detector: OnsetDetector,
    quantizer: Quantizer,
    hit_tx: broadcast::Sender<HitResult>,
    running: Arc<AtomicBool>,
) -> io::Result<JoinHandle<()>> {
    let worker = AnalysisWorker {
        channels,
        detector,
        quantizer,
        hit_tx,
        running,
        processed_blocks: 0,
    };
    thread::Builder::new()
        .name("analysis".to_string())
        .spawn(move || worker.run())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::buffer_pool::BufferPool;
    use crate::testing::{click_train, EventRecorder, FixedGrid, ENGINE_SAMPLE_RATE};

    #[test]
    fn test_analysis_thread_detects_and_quantizes() {
        let (mut capture, analysis) = BufferPool::new(64, 2048).split_for_threads();
        let recorder = Arc::new(EventRecorder::new());
        let mut detector = OnsetDetector::new(ENGINE_SAMPLE_RATE);
        detector.add_listener(recorder.clone());
        let quantizer = Quantizer::new(Arc::new(FixedGrid::new(0.0, 120, 4)));
        let (hit_tx, mut hit_rx) = broadcast::channel(16);
        let running = Arc::new(AtomicBool::new(true));

        let handle =
            spawn_analysis_thread(analysis, detector, quantizer, hit_tx, running.clone()).unwrap();

        // Clicks 15 ms after beats 1 and 2
        let signal = click_train(ENGINE_SAMPLE_RATE, 1.2, &[0.515, 1.015], 0.5);
        for (i, chunk) in signal.chunks(1024).enumerate() {
            let start = (i * 1024) as f64 / ENGINE_SAMPLE_RATE as f64;
            while !capture.push_interleaved(chunk, 1, start, ENGINE_SAMPLE_RATE) {
                thread::sleep(Duration::from_millis(1));
            }
        }

        running.store(false, Ordering::Release);
        handle.join().unwrap();

        assert_eq!(recorder.onsets().len(), 2);
        let first = hit_rx.try_recv().unwrap();
        let timing = first.timing.unwrap();
        assert_eq!(timing.classification, TimingClassification::OnTime);
        assert_eq!(timing.beat_time, 0.5);
        // Stamped at the start of the 32-sample block holding the click
        assert!(timing.error_ms > 13.0 && timing.error_ms <= 15.0);
        assert!(hit_rx.try_recv().is_ok());
    }
}
