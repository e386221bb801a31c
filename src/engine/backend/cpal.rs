//! CPAL-based audio backend for desktop platforms (Linux, macOS, Windows)
//!
//! Thin adapter from the engine's [`AudioBackend`] trait to
//! [`CpalAudioEngine`]; the output frame counter is the audio clock.

use std::sync::Arc;

use crate::audio::buffer_pool::CaptureThreadChannels;
use crate::audio::clock::{AudioClock, SoundSink};
use crate::audio::engine_cpal::CpalAudioEngine;
use crate::config::AudioConfig;
use crate::error::AudioError;

use super::AudioBackend;

pub struct CpalBackend {
    engine: CpalAudioEngine,
}

impl CpalBackend {
    pub fn new(audio_config: AudioConfig) -> Self {
        Self {
            engine: CpalAudioEngine::new(audio_config),
        }
    }
}

impl AudioBackend for CpalBackend {
    fn name(&self) -> &'static str {
        "cpal"
    }

    fn clock(&self) -> Arc<dyn AudioClock> {
        self.engine.clock()
    }

    fn sink(&self) -> Arc<dyn SoundSink> {
        self.engine.voices()
    }

    fn start_output(&self) -> Result<(), AudioError> {
        self.engine.start_output()
    }

    fn stop_output(&self) {
        self.engine.stop_output();
    }

    fn start_capture(&self, channels: CaptureThreadChannels) -> Result<(), AudioError> {
        self.engine.start_input(channels)
    }

    fn stop_capture(&self) {
        self.engine.stop_input();
    }
}
