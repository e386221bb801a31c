//! Desktop audio I/O on cpal.
//!
//! The output stream is the audio clock: every rendered frame advances a
//! [`FrameClock`], and scheduled voices arrive through a lock-free rtrb
//! queue ([`VoiceQueue`]) so the output callback never blocks. Each voice is
//! rendered starting at its exact frame, independent of when the scheduler
//! thread happened to enqueue it.
//!
//! The input stream timestamps each captured block on the same clock and
//! hands it to the analysis thread through the buffer pool.
//!
//! cpal streams are not `Send`, so each stream lives on its own thread
//! ([`StreamThread`]) that builds it, plays it, and drops it on stop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use rtrb::{Consumer, Producer, RingBuffer};

use super::buffer_pool::CaptureThreadChannels;
use super::clock::{AudioClock, FrameClock, ScheduledSound, SoundSink};
use super::metronome::{secs_to_samples, Voice};
use crate::config::AudioConfig;
use crate::error::{log_audio_error, AudioError};

// ============================================================================
// VOICE QUEUE
// ============================================================================

/// [`SoundSink`] feeding the output callback.
///
/// The producer end is swapped on every output (re)start. Sounds scheduled
/// while no stream is connected are discarded.
#[derive(Default)]
pub struct VoiceQueue {
    producer: Mutex<Option<Producer<ScheduledSound>>>,
    dropped: AtomicU64,
}

impl VoiceQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fresh queue and return the renderer that drains it
    pub fn connect(&self, capacity: usize, sample_rate: u32) -> OutputRenderer {
        let capacity = capacity.max(1);
        let (producer, consumer) = RingBuffer::new(capacity);
        *self.lock() = Some(producer);
        OutputRenderer::new(consumer, capacity, sample_rate)
    }

    pub fn disconnect(&self) {
        self.lock().take();
    }

    /// Sounds rejected because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn lock(&self) -> MutexGuard<'_, Option<Producer<ScheduledSound>>> {
        self.producer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SoundSink for VoiceQueue {
    fn schedule_sound(&self, time: f64, voice: Voice, duration_secs: f64) {
        if let Some(producer) = self.lock().as_mut() {
            let sound = ScheduledSound {
                time,
                voice,
                duration_secs,
            };
            if producer.push(sound).is_err() {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                log::warn!("[CpalEngine] Voice queue full, dropped click at {:.3}s", time);
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ActiveVoice {
    start_frame: u64,
    total: usize,
    voice: Voice,
}

/// Realtime side of the voice queue: mixes scheduled voices at exact frames
pub struct OutputRenderer {
    queue: Consumer<ScheduledSound>,
    active: Vec<ActiveVoice>,
    sample_rate: u32,
}

impl OutputRenderer {
    fn new(queue: Consumer<ScheduledSound>, capacity: usize, sample_rate: u32) -> Self {
        Self {
            queue,
            active: Vec::with_capacity(capacity),
            sample_rate: sample_rate.max(1),
        }
    }

    /// Render one interleaved block whose first frame is `block_start`.
    ///
    /// Never allocates: voices beyond the pre-allocated capacity wait in the
    /// queue until a slot frees up.
    pub fn render(&mut self, out: &mut [f32], channels: usize, block_start: u64) {
        let channels = channels.max(1);
        let frames = out.len() / channels;
        let block_end = block_start + frames as u64;
        out.fill(0.0);

        while self.active.len() < self.active.capacity() {
            match self.queue.pop() {
                Ok(sound) => self.active.push(ActiveVoice {
                    start_frame: secs_to_samples(sound.time, self.sample_rate),
                    total: secs_to_samples(sound.duration_secs, self.sample_rate) as usize,
                    voice: sound.voice,
                }),
                Err(_) => break,
            }
        }

        for voice in &self.active {
            let end = voice.start_frame + voice.total as u64;
            let from = voice.start_frame.max(block_start);
            let to = end.min(block_end);
            for frame in from..to {
                let value = voice.voice.sample_at(
                    (frame - voice.start_frame) as usize,
                    voice.total,
                    self.sample_rate,
                );
                let base = (frame - block_start) as usize * channels;
                for sample in &mut out[base..base + channels] {
                    *sample += value;
                }
            }
        }

        self.active
            .retain(|v| v.start_frame + v.total as u64 > block_end);
        for sample in out.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }
    }

    pub fn active_voices(&self) -> usize {
        self.active.len()
    }
}

// ============================================================================
// STREAM THREADS
// ============================================================================

/// Thread owning one playing cpal stream until stopped
pub struct StreamThread {
    name: String,
    stop_tx: mpsc::Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl StreamThread {
    /// Build and play a stream on a dedicated thread, waiting for the outcome
    pub fn spawn<F>(name: &str, build: F) -> Result<Self, AudioError>
    where
        F: FnOnce() -> Result<cpal::Stream, AudioError> + Send + 'static,
    {
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), AudioError>>();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let stream = match build().and_then(|stream| {
                    stream.play().map_err(|e| AudioError::HardwareError {
                        details: format!("Stream start failed: {}", e),
                    })?;
                    Ok(stream)
                }) {
                    Ok(stream) => stream,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                // Blocks until stop() or the handle is dropped
                let _ = stop_rx.recv();
                drop(stream);
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                name: name.to_string(),
                stop_tx,
                handle: Some(handle),
            }),
            Ok(Err(err)) => {
                let _ = handle.join();
                Err(err)
            }
            Err(_) => {
                let _ = handle.join();
                Err(AudioError::HardwareError {
                    details: format!("{} exited before the stream started", name),
                })
            }
        }
    }

    pub fn stop(&mut self) {
        let _ = self.stop_tx.send(());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::warn!("[CpalEngine] {} panicked", self.name);
            }
        }
    }
}

impl Drop for StreamThread {
    fn drop(&mut self) {
        self.stop();
    }
}

// ============================================================================
// ENGINE
// ============================================================================

/// cpal output + input streams sharing one frame clock
pub struct CpalAudioEngine {
    config: AudioConfig,
    clock: Arc<FrameClock>,
    voices: Arc<VoiceQueue>,
    output: Mutex<Option<StreamThread>>,
    input: Mutex<Option<StreamThread>>,
}

impl CpalAudioEngine {
    pub fn new(config: AudioConfig) -> Self {
        Self {
            config,
            clock: Arc::new(FrameClock::new()),
            voices: Arc::new(VoiceQueue::new()),
            output: Mutex::new(None),
            input: Mutex::new(None),
        }
    }

    pub fn clock(&self) -> Arc<FrameClock> {
        Arc::clone(&self.clock)
    }

    pub fn voices(&self) -> Arc<VoiceQueue> {
        Arc::clone(&self.voices)
    }

    pub fn is_output_running(&self) -> bool {
        lock_slot(&self.output).is_some()
    }

    pub fn is_input_running(&self) -> bool {
        lock_slot(&self.input).is_some()
    }

    pub fn start_output(&self) -> Result<(), AudioError> {
        let mut slot = lock_slot(&self.output);
        if slot.is_some() {
            return Err(AudioError::AlreadyRunning);
        }

        let config = self.config.clone();
        let clock = Arc::clone(&self.clock);
        let voices = Arc::clone(&self.voices);
        let thread = StreamThread::spawn("audio-output", move || {
            build_output_stream(&config, clock, &voices)
        })
        .map_err(|err| {
            log_audio_error(&err, "CpalAudioEngine::start_output");
            err
        })?;

        *slot = Some(thread);
        log::info!(
            "[CpalEngine] Output running at {} Hz",
            self.clock.sample_rate()
        );
        Ok(())
    }

    pub fn stop_output(&self) {
        if let Some(mut thread) = lock_slot(&self.output).take() {
            thread.stop();
            self.voices.disconnect();
            log::info!("[CpalEngine] Output stopped");
        }
    }

    /// Open the default input device, feeding `channels`
    pub fn start_input(&self, channels: CaptureThreadChannels) -> Result<(), AudioError> {
        let mut slot = lock_slot(&self.input);
        if slot.is_some() {
            return Err(AudioError::AlreadyRunning);
        }

        let clock: Arc<dyn AudioClock> = self.clock.clone();
        let sample_rate_hint = self.config.sample_rate;
        let thread = StreamThread::spawn("audio-input", move || {
            build_input_stream(sample_rate_hint, clock, channels)
        })
        .map_err(|err| {
            log_audio_error(&err, "CpalAudioEngine::start_input");
            err
        })?;

        *slot = Some(thread);
        log::info!("[CpalEngine] Input capture running");
        Ok(())
    }

    pub fn stop_input(&self) {
        if let Some(mut thread) = lock_slot(&self.input).take() {
            thread.stop();
            log::info!("[CpalEngine] Input capture stopped");
        }
    }
}

impl Drop for CpalAudioEngine {
    fn drop(&mut self) {
        self.stop_input();
        self.stop_output();
    }
}

fn lock_slot(slot: &Mutex<Option<StreamThread>>) -> MutexGuard<'_, Option<StreamThread>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

fn stream_config(
    default: cpal::SupportedStreamConfig,
    sample_rate_hint: Option<u32>,
) -> Result<cpal::StreamConfig, AudioError> {
    if default.sample_format() != cpal::SampleFormat::F32 {
        return Err(AudioError::StreamOpenFailed {
            reason: "Only F32 sample format is currently supported".to_string(),
        });
    }
    let mut config: cpal::StreamConfig = default.into();
    if let Some(rate) = sample_rate_hint {
        config.sample_rate = cpal::SampleRate(rate);
    }
    Ok(config)
}

fn build_output_stream(
    config: &AudioConfig,
    clock: Arc<FrameClock>,
    voices: &VoiceQueue,
) -> Result<cpal::Stream, AudioError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| AudioError::DeviceUnavailable {
            direction: "output".to_string(),
        })?;
    let default = device
        .default_output_config()
        .map_err(|e| AudioError::StreamOpenFailed {
            reason: format!("Failed to get default output config: {:?}", e),
        })?;
    let stream_config = stream_config(default, config.sample_rate)?;
    let channels = stream_config.channels as usize;
    let sample_rate = stream_config.sample_rate.0;

    // Frames keep counting across restarts; the rate must not change under them
    match clock.sample_rate() {
        0 => clock.set_sample_rate(sample_rate),
        existing if existing != sample_rate => {
            return Err(AudioError::StreamOpenFailed {
                reason: format!(
                    "Output rate changed from {} Hz to {} Hz",
                    existing, sample_rate
                ),
            })
        }
        _ => {}
    }

    let mut renderer = voices.connect(config.voice_queue_size, sample_rate);
    device
        .build_output_stream(
            &stream_config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let block_start = clock.frames();
                renderer.render(data, channels, block_start);
                clock.advance_frames((data.len() / channels.max(1)) as u64);
            },
            |err| log::error!("[CpalEngine] Output stream error: {}", err),
            None,
        )
        .map_err(|e| map_build_error("output", e))
}

fn build_input_stream(
    sample_rate_hint: Option<u32>,
    clock: Arc<dyn AudioClock>,
    mut channels: CaptureThreadChannels,
) -> Result<cpal::Stream, AudioError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| AudioError::DeviceUnavailable {
            direction: "input".to_string(),
        })?;
    let default = device
        .default_input_config()
        .map_err(|e| AudioError::StreamOpenFailed {
            reason: format!("Failed to get default input config: {:?}", e),
        })?;
    let stream_config = stream_config(default, sample_rate_hint)?;
    let channel_count = stream_config.channels as usize;
    let sample_rate = stream_config.sample_rate.0;

    device
        .build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let frames = data.len() / channel_count.max(1);
                // The block ended "now"; stamp its first sample
                let start_time = clock.now() - frames as f64 / sample_rate as f64;
                channels.push_interleaved(data, channel_count, start_time, sample_rate);
            },
            |err| log::error!("[CpalEngine] Input stream error: {}", err),
            None,
        )
        .map_err(|e| map_build_error("input", e))
}

fn map_build_error(direction: &str, err: cpal::BuildStreamError) -> AudioError {
    match err {
        cpal::BuildStreamError::DeviceNotAvailable => AudioError::DeviceUnavailable {
            direction: direction.to_string(),
        },
        other => AudioError::StreamOpenFailed {
            reason: format!("{:?}", other),
        },
    }
}
