//! Practice trainers driven by the scheduler's bar starts.
//!
//! - `ramp`: steps the tempo toward a target every N bars or seconds
//! - `blocks`: plays a fixed sequence of tempo blocks, each for a set length
//!
//! Both register as [`SchedulerListener`](crate::audio::scheduler::SchedulerListener)s
//! and only change the tempo through the scheduler. While a block sequence
//! is running the ramp holds still.

use serde::{Deserialize, Serialize};

pub mod blocks;
pub mod ramp;

pub use blocks::{TempoBlock, TempoBlocks};
pub use ramp::{RampSettings, RampTrainer};

/// Whether a trainer interval is counted in bars or in audio-clock seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntervalUnit {
    Bars,
    Seconds,
}
