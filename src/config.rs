//! Configuration management for dynamic parameter tuning
//!
//! This module provides runtime configuration loading from JSON files,
//! enabling fast iteration without recompilation. Scheduler timing,
//! onset detection and tempo-monitor thresholds can all be adjusted via
//! the config file for rapid experimentation.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::ConfigError;

/// Complete application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub scheduler: SchedulerConfig,
    pub onset_detection: OnsetDetectionConfig,
    pub tempo_monitor: TempoMonitorConfig,
    pub audio: AudioConfig,
}

/// Lookahead scheduler timing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Period of the timer that drives `tick()`
    pub lookahead_ms: u64,
    /// How far past "now" each tick enqueues events
    pub schedule_ahead_ms: f64,
    /// Delay between `start()` and the first downbeat
    pub start_offset_ms: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            lookahead_ms: 20,
            schedule_ahead_ms: 120.0,
            start_offset_ms: 50.0,
        }
    }
}

impl SchedulerConfig {
    pub fn schedule_ahead_secs(&self) -> f64 {
        self.schedule_ahead_ms / 1000.0
    }

    pub fn start_offset_secs(&self) -> f64 {
        self.start_offset_ms / 1000.0
    }
}

/// Which onset detection strategy to run on the capture stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnsetStrategy {
    /// Mean-square energy against a slow-moving baseline (reference design)
    Energy,
    /// Rectified amplitude over a decaying level with fixed additive threshold
    LevelCrossing,
}

/// Onset detection algorithm parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OnsetDetectionConfig {
    pub strategy: OnsetStrategy,
    /// Baseline energy smoothing coefficient (closer to 1 = slower)
    pub smoothing: f32,
    /// Multiplier applied to the baseline to form the trigger threshold
    pub threshold_factor: f32,
    /// Floor added to the threshold so digital silence never triggers
    pub epsilon: f32,
    /// Refractory period between onsets
    pub min_interval_ms: f64,
    /// High-pass pre-filter cutoff
    pub highpass_hz: f32,
    /// Additive threshold for the level-crossing strategy
    pub legacy_threshold: f32,
    /// Level decay for the level-crossing strategy
    pub legacy_decay: f32,
    /// Samples per analysis block
    pub block_size: usize,
}

impl Default for OnsetDetectionConfig {
    fn default() -> Self {
        Self {
            strategy: OnsetStrategy::Energy,
            smoothing: 0.995,
            threshold_factor: 3.0,
            epsilon: 1e-7,
            min_interval_ms: 100.0,
            highpass_hz: 120.0,
            legacy_threshold: 0.25,
            legacy_decay: 0.92,
            block_size: 32,
        }
    }
}

/// Tempo/drift classifier thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TempoMonitorConfig {
    pub max_onsets: usize,
    pub max_drifts: usize,
    /// |avg drift| at or below this is IN_TIME
    pub drift_tolerance_ms: f64,
    /// BPM deviation before RUSHING/SLOWING may be reported
    pub tempo_tolerance_bpm: f64,
    pub min_stable_count: u32,
    pub min_status_interval_secs: f64,
    pub min_drifts_for_status: usize,
    pub no_data_timeout_ms: f64,
    pub min_ioi_secs: f64,
    pub max_ioi_secs: f64,
    /// Half-width of the grid query window, in beats
    pub grid_window_beats: f64,
    /// Onsets further than this fraction of a beat from the grid are noise
    pub noise_gate_beats: f64,
    /// Number of trailing onsets used for tempo estimation
    pub tempo_window: usize,
    pub trim_fraction: f64,
    /// Weight of the previous tempo estimate when blending
    pub tempo_smoothing: f64,
    /// Period of the independent no-data check
    pub idle_check_ms: u64,
    /// Known capture latency subtracted from every onset
    pub input_latency_ms: f64,
}

impl Default for TempoMonitorConfig {
    fn default() -> Self {
        Self {
            max_onsets: 32,
            max_drifts: 20,
            drift_tolerance_ms: 20.0,
            tempo_tolerance_bpm: 2.5,
            min_stable_count: 2,
            min_status_interval_secs: 0.6,
            min_drifts_for_status: 2,
            no_data_timeout_ms: 8000.0,
            min_ioi_secs: 0.22,
            max_ioi_secs: 2.0,
            grid_window_beats: 1.25,
            noise_gate_beats: 0.45,
            tempo_window: 12,
            trim_fraction: 0.15,
            tempo_smoothing: 0.65,
            idle_check_ms: 500,
            input_latency_ms: 0.0,
        }
    }
}

/// Audio engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Size of buffer pool for real-time audio transfer
    pub buffer_pool_size: usize,
    /// Size of each audio buffer in samples
    pub buffer_size: usize,
    /// Capacity of the scheduled-voice queue feeding the output callback
    pub voice_queue_size: usize,
    /// Preferred device sample rate; the device default is used when unset
    pub sample_rate: Option<u32>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            buffer_pool_size: 64,
            buffer_size: 2048,
            voice_queue_size: 256,
            sample_rate: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from JSON file, reporting failures
    pub fn try_load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(&path).map_err(|err| ConfigError::Read {
            path: path.as_ref().display().to_string(),
            reason: err.to_string(),
        })?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Load configuration from JSON file
    ///
    /// Falls back to the default configuration (with a warning) if the file
    /// is missing or its JSON is invalid.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match Self::try_load_from_file(&path) {
            Ok(config) => {
                log::info!("[Config] Loaded configuration from {:?}", path.as_ref());
                config
            }
            Err(err) => {
                log::warn!("[Config] {}. Using defaults.", err);
                Self::default()
            }
        }
    }

    /// Load configuration from the default location
    pub fn load() -> Self {
        Self::load_from_file("assets/tempo_config.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.scheduler.lookahead_ms, 20);
        assert_eq!(config.scheduler.schedule_ahead_ms, 120.0);
        assert_eq!(config.onset_detection.strategy, OnsetStrategy::Energy);
        assert_eq!(config.onset_detection.threshold_factor, 3.0);
        assert_eq!(config.tempo_monitor.max_onsets, 32);
        assert_eq!(config.tempo_monitor.no_data_timeout_ms, 8000.0);
        assert_eq!(config.audio.buffer_pool_size, 64);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{ "onset_detection": { "strategy": "level_crossing" } }"#;
        let parsed: AppConfig = serde_json::from_str(json).unwrap();

        assert_eq!(
            parsed.onset_detection.strategy,
            OnsetStrategy::LevelCrossing
        );
        assert_eq!(parsed.onset_detection.min_interval_ms, 100.0);
        assert_eq!(parsed.tempo_monitor.min_stable_count, 2);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let result = AppConfig::try_load_from_file("/nonexistent/tempo_config.json");
        assert_eq!(result.unwrap_err().code(), 3001);

        let config = AppConfig::load_from_file("/nonexistent/tempo_config.json");
        assert_eq!(config.scheduler.start_offset_ms, 50.0);
    }
}
