// Audio module - transport model, lookahead scheduling and desktop audio I/O

pub mod buffer_pool;
pub mod clock;
pub mod driver;
pub mod engine_cpal;
pub mod metronome;
pub mod scheduler;
pub mod transport;

// Re-export commonly used types for convenience
pub use buffer_pool::{
    AnalysisThreadChannels, BufferPool, BufferPoolChannels, CaptureBlock, CaptureThreadChannels,
    DEFAULT_BUFFER_COUNT, DEFAULT_BUFFER_SIZE,
};
pub use clock::{
    AudioClock, FrameClock, ManualClock, NullSink, RecordingSink, ScheduledSound, SoundSink,
    SystemClock,
};
pub use driver::{PeriodicWorker, SchedulerDriver};
pub use engine_cpal::CpalAudioEngine;
pub use metronome::{beat_duration, ClickKind, Sound, Voice, Waveform};
pub use scheduler::{
    BarStartEvent, BeatEvent, BeatGridSnapshot, BeatGridSource, LookaheadScheduler, PolyLayer,
    PolyTickEvent, SchedulerEvent, SchedulerListener, SchedulerStatus, StepPattern, TickEvent,
};
pub use transport::{Accent, Meter, Phrase, Polyrhythm, SilentBars, SubdivisionKind, Transport};
