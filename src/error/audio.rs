// Audio error types and constants

use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Numeric codes reported by [`AudioError`]
///
/// Error code range: 1001-1005
pub struct AudioErrorCodes {}

impl AudioErrorCodes {
    /// Scheduler, stream or clock started twice
    pub const ALREADY_RUNNING: i32 = 1001;

    /// Operation needs a running clock or stream
    pub const NOT_RUNNING: i32 = 1002;

    /// Device or OS failure (thread spawn, driver error)
    pub const HARDWARE_ERROR: i32 = 1003;

    pub const STREAM_OPEN_FAILED: i32 = 1004;

    /// No input or output device present
    pub const DEVICE_UNAVAILABLE: i32 = 1005;
}

/// Log once where the error is produced; callers up the stack only propagate
pub fn log_audio_error(err: &AudioError, context: &str) {
    error!(
        "[Audio] {} failed: code={}, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Failures of the playback and capture machinery.
///
/// Transport parameters never show up here: tempo, meter, accents and the
/// rest are clamped by their setters instead of being rejected.
#[derive(Debug, Clone, PartialEq)]
pub enum AudioError {
    AlreadyRunning,
    NotRunning,
    HardwareError { details: String },
    StreamOpenFailed { reason: String },
    /// `direction` is "input" or "output"
    DeviceUnavailable { direction: String },
}

impl ErrorCode for AudioError {
    fn code(&self) -> i32 {
        match self {
            AudioError::AlreadyRunning => AudioErrorCodes::ALREADY_RUNNING,
            AudioError::NotRunning => AudioErrorCodes::NOT_RUNNING,
            AudioError::HardwareError { .. } => AudioErrorCodes::HARDWARE_ERROR,
            AudioError::StreamOpenFailed { .. } => AudioErrorCodes::STREAM_OPEN_FAILED,
            AudioError::DeviceUnavailable { .. } => AudioErrorCodes::DEVICE_UNAVAILABLE,
        }
    }

    fn message(&self) -> String {
        match self {
            AudioError::AlreadyRunning => "Already running; stop it before starting again".to_string(),
            AudioError::NotRunning => "Not running; start it first".to_string(),
            AudioError::HardwareError { details } => format!("Audio hardware failure: {}", details),
            AudioError::StreamOpenFailed { reason } => {
                format!("Could not open audio stream: {}", reason)
            }
            AudioError::DeviceUnavailable { direction } => {
                format!("No {} audio device available", direction)
            }
        }
    }
}

impl fmt::Display for AudioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message(), self.code())
    }
}

impl std::error::Error for AudioError {}

impl From<std::io::Error> for AudioError {
    fn from(err: std::io::Error) -> Self {
        AudioError::HardwareError {
            details: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_contiguous() {
        let errors = [
            AudioError::AlreadyRunning,
            AudioError::NotRunning,
            AudioError::HardwareError {
                details: String::new(),
            },
            AudioError::StreamOpenFailed {
                reason: String::new(),
            },
            AudioError::DeviceUnavailable {
                direction: "input".to_string(),
            },
        ];
        let codes: Vec<i32> = errors.iter().map(ErrorCode::code).collect();
        assert_eq!(codes, vec![1001, 1002, 1003, 1004, 1005]);
    }

    #[test]
    fn test_device_unavailable_names_direction() {
        let err = AudioError::DeviceUnavailable {
            direction: "output".to_string(),
        };
        assert_eq!(err.message(), "No output audio device available");
        assert_eq!(
            err.to_string(),
            "No output audio device available (code 1005)"
        );
    }

    #[test]
    fn test_already_running_message() {
        assert!(AudioError::AlreadyRunning
            .message()
            .starts_with("Already running"));
    }

    #[test]
    fn test_io_error_becomes_hardware_error() {
        let audio_err: AudioError = std::io::Error::other("spawn failed").into();
        assert_eq!(
            audio_err,
            AudioError::HardwareError {
                details: "spawn failed".to_string()
            }
        );
    }
}
