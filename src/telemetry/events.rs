//! Telemetry event types published through the global hub.

use serde::{Deserialize, Serialize};

use crate::analysis::quantizer::TimingClassification;
use crate::analysis::tempo_monitor::TimingStatus;

/// Engine lifecycle stages
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LifecyclePhase {
    PlaybackStarted,
    PlaybackStopped,
    ListeningStarted,
    ListeningStopped,
}

/// Diagnostic error codes surfaced via telemetry
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticError {
    DeviceUnavailable,
    BufferDrain,
    VoiceQueueOverflow,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum MetricEvent {
    Onset {
        time: f64,
        energy: f32,
    },
    Hit {
        classification: TimingClassification,
        error_ms: f32,
    },
    /// Rolling mean / max of |hit error|
    HitAccuracy {
        avg_ms: f32,
        max_ms: f32,
        sample_count: usize,
    },
    StatusChange {
        code: TimingStatus,
        avg_drift_ms: Option<f64>,
        player_bpm: Option<f64>,
    },
    BarStart {
        bar: u64,
        time: f64,
        count_in: bool,
    },
    BufferOccupancy {
        channel: String,
        percent: f32,
    },
    Lifecycle {
        phase: LifecyclePhase,
        timestamp_ms: u64,
    },
    Error {
        code: DiagnosticError,
        context: String,
    },
}
