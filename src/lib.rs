// Tempo Coach Core - lookahead metronome and timing feedback engine
// Sample-accurate click scheduling, onset detection and tempo/drift coaching

// Module declarations
pub mod analysis;
pub mod audio;
pub mod calibration;
pub mod config;
pub mod engine;
pub mod error;
pub mod telemetry;
pub mod testing;
pub mod trainer;

// Re-exports for convenience
pub use analysis::{
    HitResult, Onset, OnsetDetector, StatusReport, TapTempo, TempoMonitor, TimingStatus,
};
pub use audio::{
    Accent, LookaheadScheduler, Meter, SchedulerDriver, SubdivisionKind, Transport,
};
pub use config::AppConfig;
pub use engine::{AudioBackend, EngineHandle, StubBackend};
pub use error::{AudioError, CalibrationError, ConfigError, ErrorCode};
pub use trainer::{IntervalUnit, RampSettings, RampTrainer, TempoBlock, TempoBlocks};
