//! Diagnostics telemetry collector and helpers.
//!
//! The collector multiplexes onsets, per-hit timing, classifier status
//! changes, bar starts and buffer occupancy into a bounded history plus a
//! broadcast stream.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use once_cell::sync::Lazy;
use tokio::sync::broadcast;

use crate::analysis::onset::{Onset, OnsetListener};
use crate::analysis::quantizer::TimingFeedback;
use crate::analysis::tempo_monitor::{StatusListener, StatusReport};
use crate::audio::scheduler::{BarStartEvent, SchedulerListener};

pub mod events;

pub use events::{DiagnosticError, LifecyclePhase, MetricEvent};

/// Global telemetry hub shared across the crate.
static HUB: Lazy<TelemetryHub> = Lazy::new(TelemetryHub::default);

/// Access the global telemetry hub.
pub fn hub() -> &'static TelemetryHub {
    &HUB
}

/// Snapshot of collector state for CLI reporting.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TelemetrySnapshot {
    pub recent: Vec<MetricEvent>,
    pub total_events: u64,
    pub dropped_events: u64,
}

/// Broadcast-based collector retaining a bounded history of metrics.
pub struct TelemetryCollector {
    tx: broadcast::Sender<MetricEvent>,
    history: Mutex<VecDeque<MetricEvent>>,
    history_capacity: usize,
    total_events: AtomicU64,
    dropped_history: AtomicU64,
}

impl TelemetryCollector {
    pub fn new(buffer: usize, history_capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer.max(1));
        Self {
            tx,
            history: Mutex::new(VecDeque::with_capacity(history_capacity)),
            history_capacity: history_capacity.max(1),
            total_events: AtomicU64::new(0),
            dropped_history: AtomicU64::new(0),
        }
    }

    pub fn publish(&self, event: MetricEvent) {
        self.total_events.fetch_add(1, Ordering::Relaxed);
        {
            let mut history = lock(&self.history);
            if history.len() == self.history_capacity {
                history.pop_front();
                self.dropped_history.fetch_add(1, Ordering::Relaxed);
            }
            history.push_back(event.clone());
        }

        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MetricEvent> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        let history = lock(&self.history);
        TelemetrySnapshot {
            recent: history.iter().cloned().collect(),
            total_events: self.total_events.load(Ordering::Relaxed),
            dropped_events: self.dropped_history.load(Ordering::Relaxed),
        }
    }
}

impl Default for TelemetryCollector {
    fn default() -> Self {
        Self::new(256, 64)
    }
}

/// Rolling window of absolute hit errors
struct AccuracyTracker {
    samples: VecDeque<f32>,
    max_samples: usize,
}

impl AccuracyTracker {
    fn new(max_samples: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(max_samples),
            max_samples: max_samples.max(1),
        }
    }

    fn observe(&mut self, value: f32) -> (f32, f32, usize) {
        if self.samples.len() == self.max_samples {
            self.samples.pop_front();
        }
        self.samples.push_back(value.abs());

        let count = self.samples.len();
        let sum: f32 = self.samples.iter().copied().sum();
        let max = self
            .samples
            .iter()
            .copied()
            .fold(0.0_f32, |acc, next| acc.max(next));
        let avg = if count == 0 { 0.0 } else { sum / count as f32 };
        (avg, max, count)
    }
}

/// Top-level hub wrapping collector state plus derived gauges.
pub struct TelemetryHub {
    collector: TelemetryCollector,
    accuracy: Mutex<AccuracyTracker>,
    buffer_gauges: Mutex<HashMap<&'static str, f32>>,
}

impl TelemetryHub {
    pub fn new(channel_capacity: usize, history_capacity: usize, accuracy_window: usize) -> Self {
        Self {
            collector: TelemetryCollector::new(channel_capacity, history_capacity),
            accuracy: Mutex::new(AccuracyTracker::new(accuracy_window)),
            buffer_gauges: Mutex::new(HashMap::new()),
        }
    }

    pub fn collector(&self) -> &TelemetryCollector {
        &self.collector
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        self.collector.snapshot()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MetricEvent> {
        self.collector.subscribe()
    }

    pub fn record_onset(&self, onset: &Onset) {
        self.collector.publish(MetricEvent::Onset {
            time: onset.time,
            energy: onset.energy,
        });
    }

    pub fn record_hit(&self, feedback: &TimingFeedback) {
        self.collector.publish(MetricEvent::Hit {
            classification: feedback.classification,
            error_ms: feedback.error_ms,
        });

        let (avg, max, count) = lock(&self.accuracy).observe(feedback.error_ms);
        self.collector.publish(MetricEvent::HitAccuracy {
            avg_ms: avg,
            max_ms: max,
            sample_count: count,
        });
    }

    pub fn record_status(&self, status: &StatusReport) {
        self.collector.publish(MetricEvent::StatusChange {
            code: status.status_code,
            avg_drift_ms: status.avg_drift_ms,
            player_bpm: status.player_bpm,
        });
    }

    pub fn record_bar_start(&self, event: &BarStartEvent) {
        self.collector.publish(MetricEvent::BarStart {
            bar: event.bar,
            time: event.time,
            count_in: event.count_in,
        });
    }

    pub fn record_buffer_occupancy(&self, channel: &'static str, percent: f32) {
        let normalized = percent.clamp(0.0, 100.0);
        let mut gauges = lock(&self.buffer_gauges);

        let should_emit = gauges
            .get(channel)
            .map(|last| (last - normalized).abs() >= 2.5)
            .unwrap_or(true);

        if should_emit {
            gauges.insert(channel, normalized);
            self.collector.publish(MetricEvent::BufferOccupancy {
                channel: channel.to_string(),
                percent: normalized,
            });
        }
    }

    pub fn record_lifecycle(&self, phase: LifecyclePhase) {
        self.collector.publish(MetricEvent::Lifecycle {
            phase,
            timestamp_ms: now_timestamp_ms(),
        });
    }

    pub fn record_error(&self, code: DiagnosticError, context: impl Into<String>) {
        self.collector.publish(MetricEvent::Error {
            code,
            context: context.into(),
        });
    }
}

impl Default for TelemetryHub {
    fn default() -> Self {
        Self::new(256, 64, 32)
    }
}

/// Forwards pipeline callbacks to the global hub
#[derive(Debug, Default, Clone, Copy)]
pub struct TelemetryBridge;

impl OnsetListener for TelemetryBridge {
    fn on_onset(&self, onset: &Onset) {
        hub().record_onset(onset);
    }
}

impl StatusListener for TelemetryBridge {
    fn on_status_change(&self, status: &StatusReport) {
        hub().record_status(status);
    }
}

impl SchedulerListener for TelemetryBridge {
    fn on_bar_start(&self, event: &BarStartEvent) {
        hub().record_bar_start(event);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn now_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::quantizer::TimingClassification;
    use crate::analysis::tempo_monitor::TimingStatus;

    fn feedback(error_ms: f32) -> TimingFeedback {
        TimingFeedback::from_error_ms(error_ms, 1.0)
    }

    #[test]
    fn collector_preserves_order_within_history() {
        let collector = TelemetryCollector::new(8, 3);
        collector.publish(MetricEvent::Onset {
            time: 1.0,
            energy: 0.1,
        });
        collector.publish(MetricEvent::Onset {
            time: 2.0,
            energy: 0.2,
        });
        collector.publish(MetricEvent::BufferOccupancy {
            channel: "test".to_string(),
            percent: 50.0,
        });

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.recent.len(), 3);
        assert!(
            matches!(snapshot.recent[0], MetricEvent::Onset { time, .. } if (time - 1.0).abs() < f64::EPSILON)
        );
        assert!(matches!(
            snapshot.recent[2],
            MetricEvent::BufferOccupancy { .. }
        ));
    }

    #[test]
    fn collector_drops_history_when_full() {
        let collector = TelemetryCollector::new(8, 2);
        for i in 0..3 {
            collector.publish(MetricEvent::Onset {
                time: i as f64,
                energy: 0.0,
            });
        }

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.recent.len(), 2);
        assert_eq!(snapshot.dropped_events, 1);
        assert!(
            matches!(snapshot.recent[0], MetricEvent::Onset { time, .. } if (time - 1.0).abs() < f64::EPSILON)
        );
    }

    #[test]
    fn hub_emits_hit_and_accuracy() {
        let hub = TelemetryHub::new(8, 8, 4);
        hub.record_hit(&feedback(12.0));
        hub.record_hit(&feedback(-60.0));

        let snapshot = hub.snapshot();
        assert_eq!(snapshot.total_events, 4);
        assert!(snapshot.recent.iter().any(|event| matches!(
            event,
            MetricEvent::Hit {
                classification: TimingClassification::Early,
                ..
            }
        )));
        assert!(matches!(
            snapshot.recent[3],
            MetricEvent::HitAccuracy { avg_ms, max_ms, sample_count: 2 }
                if (avg_ms - 36.0).abs() < 1e-3 && (max_ms - 60.0).abs() < 1e-3
        ));
    }

    #[test]
    fn buffer_gauge_debounces_small_changes() {
        let hub = TelemetryHub::new(8, 8, 4);
        hub.record_buffer_occupancy("queue", 10.0);
        hub.record_buffer_occupancy("queue", 10.5);
        hub.record_buffer_occupancy("queue", 25.0);

        let count = hub
            .snapshot()
            .recent
            .iter()
            .filter(|event| matches!(event, MetricEvent::BufferOccupancy { .. }))
            .count();
        assert_eq!(count, 2);
    }

    #[test]
    fn status_and_bar_start_are_recorded() {
        let hub = TelemetryHub::new(8, 8, 4);
        let mut rx = hub.subscribe();
        hub.record_status(&StatusReport::no_data(true));
        hub.record_bar_start(&BarStartEvent {
            bar: 3,
            time: 1.5,
            count_in: false,
        });

        assert!(matches!(
            rx.try_recv(),
            Ok(MetricEvent::StatusChange {
                code: TimingStatus::NoData,
                ..
            })
        ));
        assert!(matches!(rx.try_recv(), Ok(MetricEvent::BarStart { bar: 3, .. })));
    }

    #[test]
    fn metric_event_json_shape() {
        let json = serde_json::to_string(&MetricEvent::Lifecycle {
            phase: LifecyclePhase::ListeningStarted,
            timestamp_ms: 7,
        })
        .unwrap();
        assert_eq!(
            json,
            r#"{"type":"lifecycle","payload":{"phase":"listening_started","timestamp_ms":7}}"#
        );
    }
}
