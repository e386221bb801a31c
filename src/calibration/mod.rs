// Calibration module - output latency measurement by tapping along
//
// The calibration workflow:
// 1. Start playback (the engine switches to 80 BPM for the run)
// 2. The player taps on every click they hear
// 3. After 20 taps the mean offset becomes the scheduler's latency offset

pub mod procedure;
pub mod progress;

pub use procedure::{LatencyCalibration, DEFAULT_TAPS_NEEDED};
pub use progress::{CalibrationProgress, LatencyResult};
