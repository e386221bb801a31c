// Calibration error types and constants

use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Calibration error code constants
///
/// Error code range: 2001-2004
pub struct CalibrationErrorCodes {}

impl CalibrationErrorCodes {
    /// Calibration finished before enough taps were collected
    pub const INSUFFICIENT_TAPS: i32 = 2001;

    /// A tap was registered while no calibration is running
    pub const NOT_ACTIVE: i32 = 2002;

    /// Calibration already in progress
    pub const ALREADY_IN_PROGRESS: i32 = 2003;

    /// No recent metronome beat to compare the tap against
    pub const NO_REFERENCE_BEAT: i32 = 2004;
}

/// Log a calibration error with structured context
pub fn log_calibration_error(err: &CalibrationError, context: &str) {
    error!(
        "Calibration error in {}: code={}, component=LatencyCalibration, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Latency calibration errors
///
/// Error code range: 2001-2004
#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationError {
    /// Insufficient taps collected for calibration
    InsufficientTaps { required: usize, collected: usize },

    /// Calibration is not running
    NotActive,

    /// Calibration already in progress
    AlreadyInProgress,

    /// The scheduler has not emitted any beats yet
    NoReferenceBeat,
}

impl ErrorCode for CalibrationError {
    fn code(&self) -> i32 {
        match self {
            CalibrationError::InsufficientTaps { .. } => CalibrationErrorCodes::INSUFFICIENT_TAPS,
            CalibrationError::NotActive => CalibrationErrorCodes::NOT_ACTIVE,
            CalibrationError::AlreadyInProgress => CalibrationErrorCodes::ALREADY_IN_PROGRESS,
            CalibrationError::NoReferenceBeat => CalibrationErrorCodes::NO_REFERENCE_BEAT,
        }
    }

    fn message(&self) -> String {
        match self {
            CalibrationError::InsufficientTaps {
                required,
                collected,
            } => {
                format!("Insufficient taps: need {}, got {}", required, collected)
            }
            CalibrationError::NotActive => "Latency calibration is not running".to_string(),
            CalibrationError::AlreadyInProgress => "Calibration already in progress".to_string(),
            CalibrationError::NoReferenceBeat => {
                "No metronome beat to compare against. Start the metronome first.".to_string()
            }
        }
    }
}

impl fmt::Display for CalibrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CalibrationError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for CalibrationError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calibration_error_codes() {
        assert_eq!(
            CalibrationError::InsufficientTaps {
                required: 20,
                collected: 5
            }
            .code(),
            2001
        );
        assert_eq!(CalibrationError::NotActive.code(), 2002);
        assert_eq!(CalibrationError::AlreadyInProgress.code(), 2003);
        assert_eq!(CalibrationError::NoReferenceBeat.code(), 2004);
    }

    #[test]
    fn test_calibration_error_display() {
        let err = CalibrationError::InsufficientTaps {
            required: 20,
            collected: 5,
        };
        assert!(err.message().contains("need 20"));
        assert!(err.message().contains("got 5"));
        assert!(format!("{}", err).contains("2001"));
    }
}
