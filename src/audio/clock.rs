//! Audio-domain clock and sound emission seams.
//!
//! The scheduler never touches an audio device directly. It reads time from
//! an [`AudioClock`] and enqueues future-timestamped events into a
//! [`SoundSink`] that guarantees sample-accurate playback. Desktop builds
//! back both traits with the cpal output stream; tests and the CLI dry run
//! use [`ManualClock`] and [`RecordingSink`].

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use super::metronome::Voice;
use crate::error::AudioError;

/// Monotonic, high-resolution time source shared by all scheduling (seconds).
pub trait AudioClock: Send + Sync {
    fn now(&self) -> f64;

    /// Resume a suspended output device before scheduling starts.
    fn resume(&self) -> Result<(), AudioError> {
        Ok(())
    }
}

/// Audio event emission primitive.
///
/// Implementations must start `voice` exactly at `time` on the audio clock.
/// Calls must never block on the realtime rendering path.
pub trait SoundSink: Send + Sync {
    fn schedule_sound(&self, time: f64, voice: Voice, duration_secs: f64);
}

/// A sound event as handed to a [`SoundSink`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScheduledSound {
    pub time: f64,
    pub voice: Voice,
    pub duration_secs: f64,
}

/// Audio clock derived from the number of frames an output stream has rendered
#[derive(Debug, Default)]
pub struct FrameClock {
    frames: AtomicU64,
    sample_rate: AtomicU32,
}

impl FrameClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fix the rate used to convert frames to seconds; set before the stream runs
    pub fn set_sample_rate(&self, sample_rate: u32) {
        self.sample_rate.store(sample_rate, Ordering::Release);
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate.load(Ordering::Acquire)
    }

    /// Called by the output callback after rendering `frames`
    #[inline]
    pub fn advance_frames(&self, frames: u64) {
        self.frames.fetch_add(frames, Ordering::Release);
    }

    #[inline]
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Acquire)
    }
}

impl AudioClock for FrameClock {
    fn now(&self) -> f64 {
        match self.sample_rate() {
            0 => 0.0,
            rate => self.frames() as f64 / rate as f64,
        }
    }

    fn resume(&self) -> Result<(), AudioError> {
        if self.sample_rate() == 0 {
            return Err(AudioError::NotRunning);
        }
        Ok(())
    }
}

/// Wall-clock fallback for sessions without an output device
#[derive(Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioClock for SystemClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Clock whose time only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    bits: AtomicU64,
}

impl ManualClock {
    pub fn new(start: f64) -> Self {
        Self {
            bits: AtomicU64::new(start.to_bits()),
        }
    }

    pub fn set(&self, time: f64) {
        self.bits.store(time.to_bits(), Ordering::SeqCst);
    }

    pub fn advance(&self, delta: f64) {
        self.set(self.now() + delta);
    }
}

impl AudioClock for ManualClock {
    fn now(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::SeqCst))
    }
}

/// Sink that remembers every scheduled sound
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ScheduledSound>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ScheduledSound> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl SoundSink for RecordingSink {
    fn schedule_sound(&self, time: f64, voice: Voice, duration_secs: f64) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ScheduledSound {
                time,
                voice,
                duration_secs,
            });
    }
}

/// Sink that discards everything (listening-only sessions)
#[derive(Debug, Default)]
pub struct NullSink;

impl SoundSink for NullSink {
    fn schedule_sound(&self, _time: f64, _voice: Voice, _duration_secs: f64) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::metronome::{ClickKind, Sound};

    #[test]
    fn test_manual_clock_set_and_advance() {
        let clock = ManualClock::new(1.5);
        assert_eq!(clock.now(), 1.5);
        clock.advance(0.25);
        assert!((clock.now() - 1.75).abs() < 1e-12);
        clock.set(10.0);
        assert_eq!(clock.now(), 10.0);
    }

    #[test]
    fn test_frame_clock_requires_running_stream() {
        let clock = FrameClock::new();
        assert_eq!(clock.now(), 0.0);
        assert_eq!(clock.resume(), Err(AudioError::NotRunning));

        clock.set_sample_rate(48000);
        clock.advance_frames(24000);
        assert!((clock.now() - 0.5).abs() < 1e-12);
        assert!(clock.resume().is_ok());
    }

    #[test]
    fn test_system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }

    #[test]
    fn test_recording_sink_keeps_order() {
        let sink = RecordingSink::new();
        let voice = Voice::for_click(Sound::Beep, ClickKind::Normal, 1.0);
        sink.schedule_sound(0.5, voice, 0.07);
        sink.schedule_sound(0.25, voice, 0.04);

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].time, 0.5);
        assert_eq!(events[1].duration_secs, 0.04);

        sink.clear();
        assert!(sink.is_empty());
    }
}
