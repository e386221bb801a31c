//! Engine module housing the reusable audio core.
//!
//! This module exposes trait-based backends (`backend`) and the `EngineHandle`
//! orchestration layer (`core`) used by the CLI.

pub mod backend;
pub mod core;

pub use backend::{AudioBackend, CpalBackend, StubBackend};
pub use core::{EngineHandle, EngineStatus, CALIBRATION_BPM};
