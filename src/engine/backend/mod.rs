//! Backend abstractions for the engine core.
//!
//! A backend owns the audio devices: it supplies the audio clock and the
//! sound sink the scheduler writes into, and feeds captured blocks into the
//! buffer pool while listening.

use std::sync::Arc;

use crate::audio::buffer_pool::CaptureThreadChannels;
use crate::audio::clock::{AudioClock, SoundSink};
use crate::error::AudioError;

/// Trait implemented by audio I/O backends.
pub trait AudioBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn clock(&self) -> Arc<dyn AudioClock>;

    fn sink(&self) -> Arc<dyn SoundSink>;

    /// Open the output device. Returns `AlreadyRunning` if it is open.
    fn start_output(&self) -> Result<(), AudioError>;

    fn stop_output(&self);

    /// Open the capture device, pushing blocks into `channels`
    fn start_capture(&self, channels: CaptureThreadChannels) -> Result<(), AudioError>;

    fn stop_capture(&self);
}

mod cpal;
mod stub;

pub use cpal::CpalBackend;
pub use stub::StubBackend;
