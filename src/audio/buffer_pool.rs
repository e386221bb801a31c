// BufferPool - lock-free capture block pool with dual SPSC queues
//
// Moves captured audio from the realtime input callback to the analysis
// thread without allocating or locking on the audio thread. All blocks are
// allocated up front; ownership circulates between two rtrb ring buffers.
//
// Architecture:
// - DATA_QUEUE: capture callback pushes filled blocks, analysis thread consumes
// - POOL_QUEUE: analysis thread returns drained blocks, capture callback recycles
//
// When the pool runs dry (analysis thread stalled) the capture callback drops
// the incoming samples; the onset detector treats the gap as silence.

use rtrb::{Consumer, Producer};

pub const DEFAULT_BUFFER_COUNT: usize = 16;
pub const DEFAULT_BUFFER_SIZE: usize = 2048;

/// Mono samples captured in one input callback
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CaptureBlock {
    pub samples: Vec<f32>,
    /// Audio-clock time of the first sample
    pub start_time: f64,
    pub sample_rate: u32,
}

impl CaptureBlock {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: Vec::with_capacity(capacity),
            start_time: 0.0,
            sample_rate: 0,
        }
    }
}

/// All four queue ends, before they are handed to their threads
pub struct BufferPoolChannels {
    pub data_producer: Producer<CaptureBlock>,
    pub data_consumer: Consumer<CaptureBlock>,
    pub pool_producer: Producer<CaptureBlock>,
    pub pool_consumer: Consumer<CaptureBlock>,
}

/// Queue ends owned by the capture callback
pub struct CaptureThreadChannels {
    pub data_producer: Producer<CaptureBlock>,
    pub pool_consumer: Consumer<CaptureBlock>,
}

impl CaptureThreadChannels {
    /// Copy the first channel of `interleaved` into a recycled block and queue it.
    ///
    /// Returns `false` when no empty block was available or the data queue
    /// is full; the samples are dropped in that case.
    pub fn push_interleaved(
        &mut self,
        interleaved: &[f32],
        channels: usize,
        start_time: f64,
        sample_rate: u32,
    ) -> bool {
        let Ok(mut block) = self.pool_consumer.pop() else {
            return false;
        };
        block.samples.clear();
        let channels = channels.max(1);
        let room = block.samples.capacity();
        block.samples.extend(
            interleaved
                .chunks(channels)
                .map(|frame| frame.first().copied().unwrap_or(0.0))
                .take(room),
        );
        block.start_time = start_time;
        block.sample_rate = sample_rate;
        self.data_producer.push(block).is_ok()
    }
}

/// Queue ends owned by the analysis thread
pub struct AnalysisThreadChannels {
    pub data_consumer: Consumer<CaptureBlock>,
    pub pool_producer: Producer<CaptureBlock>,
}

impl BufferPoolChannels {
    pub fn split_for_threads(self) -> (CaptureThreadChannels, AnalysisThreadChannels) {
        (
            CaptureThreadChannels {
                data_producer: self.data_producer,
                pool_consumer: self.pool_consumer,
            },
            AnalysisThreadChannels {
                data_consumer: self.data_consumer,
                pool_producer: self.pool_producer,
            },
        )
    }
}

/// Lock-free capture block pool
///
/// # Example
/// ```ignore
/// let (mut capture, mut analysis) = BufferPool::new(16, 2048).split_for_threads();
///
/// // In the input callback:
/// capture.push_interleaved(data, channels, clock.now(), sample_rate);
///
/// // In the analysis thread:
/// if let Ok(block) = analysis.data_consumer.pop() {
///     detector.process(&block.samples, block.start_time);
///     analysis.pool_producer.push(block).ok();
/// }
/// ```
pub struct BufferPool;

impl BufferPool {
    /// Pre-allocate `buffer_count` blocks of `buffer_size` samples.
    ///
    /// # Panics
    /// Panics if either argument is 0.
    #[allow(clippy::new_ret_no_self)]
    pub fn new(buffer_count: usize, buffer_size: usize) -> BufferPoolChannels {
        assert!(buffer_count > 0, "buffer_count must be greater than 0");
        assert!(buffer_size > 0, "buffer_size must be greater than 0");

        let (mut pool_producer, pool_consumer) = rtrb::RingBuffer::new(buffer_count);
        let (data_producer, data_consumer) = rtrb::RingBuffer::new(buffer_count);

        for _ in 0..buffer_count {
            if pool_producer
                .push(CaptureBlock::with_capacity(buffer_size))
                .is_err()
            {
                break;
            }
        }

        BufferPoolChannels {
            data_producer,
            data_consumer,
            pool_producer,
            pool_consumer,
        }
    }
}
