//! Tempo ramp trainer.
//!
//! Listens to bar starts and raises (or lowers) the scheduler tempo by a
//! fixed step every `interval` bars or seconds until `end` is reached.
//! Count-in bars are not counted in bars mode; in seconds mode the clock
//! runs through them.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde::{Deserialize, Serialize};

use super::blocks::TempoBlocks;
use super::IntervalUnit;
use crate::audio::scheduler::{BarStartEvent, LookaheadScheduler, SchedulerListener};
use crate::audio::transport::{MAX_TEMPO, MIN_TEMPO};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RampSettings {
    pub start: u32,
    pub end: u32,
    /// Signed BPM change per step
    pub step: i32,
    /// Bars or seconds between steps, depending on `mode`
    pub interval: u32,
    pub mode: IntervalUnit,
}

impl Default for RampSettings {
    fn default() -> Self {
        Self {
            start: 100,
            end: 140,
            step: 2,
            interval: 4,
            mode: IntervalUnit::Bars,
        }
    }
}

impl RampSettings {
    /// Next tempo after one step from `current`, never overshooting `end`
    pub fn next_tempo(&self, current: u32) -> u32 {
        let next = current as i64 + self.step as i64;
        let end = self.end as i64;
        let next = if (self.step > 0 && next > end) || (self.step < 0 && next < end) {
            end
        } else {
            next
        };
        next.clamp(MIN_TEMPO as i64, MAX_TEMPO as i64) as u32
    }
}

#[derive(Debug, Clone, Copy)]
struct RampState {
    settings: RampSettings,
    bars_left: u32,
    timer_start: f64,
}

pub struct RampTrainer {
    scheduler: Weak<LookaheadScheduler>,
    blocks: Option<Weak<TempoBlocks>>,
    state: Mutex<Option<RampState>>,
}

impl RampTrainer {
    /// Holds the scheduler weakly; register the trainer with
    /// [`LookaheadScheduler::add_listener`] to drive it.
    pub fn new(scheduler: &Arc<LookaheadScheduler>) -> Self {
        Self {
            scheduler: Arc::downgrade(scheduler),
            blocks: None,
            state: Mutex::new(None),
        }
    }

    /// Like [`new`](Self::new), but pauses while `blocks` has a sequence running
    pub fn with_blocks(scheduler: &Arc<LookaheadScheduler>, blocks: &Arc<TempoBlocks>) -> Self {
        Self {
            blocks: Some(Arc::downgrade(blocks)),
            ..Self::new(scheduler)
        }
    }

    fn held_by_blocks(&self) -> bool {
        self.blocks
            .as_ref()
            .and_then(Weak::upgrade)
            .is_some_and(|blocks| blocks.is_active())
    }

    /// Jump to the start tempo and begin counting toward the first step
    pub fn enable(&self, settings: RampSettings) {
        let Some(scheduler) = self.scheduler.upgrade() else {
            return;
        };
        let settings = RampSettings {
            interval: settings.interval.max(1),
            ..settings
        };
        scheduler.set_tempo(settings.start);
        *self.lock() = Some(RampState {
            settings,
            bars_left: settings.interval,
            timer_start: scheduler.clock().now(),
        });
        log::info!(
            "[RampTrainer] Ramp {} -> {} BPM, step {} every {} {:?}",
            settings.start,
            settings.end,
            settings.step,
            settings.interval,
            settings.mode
        );
    }

    pub fn disable(&self) {
        if self.lock().take().is_some() {
            log::info!("[RampTrainer] Off");
        }
    }

    pub fn is_active(&self) -> bool {
        self.lock().is_some()
    }

    pub fn settings(&self) -> Option<RampSettings> {
        self.lock().map(|state| state.settings)
    }

    fn lock(&self) -> MutexGuard<'_, Option<RampState>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SchedulerListener for RampTrainer {
    fn on_bar_start(&self, event: &BarStartEvent) {
        if self.held_by_blocks() {
            return;
        }
        let Some(scheduler) = self.scheduler.upgrade() else {
            return;
        };

        let due = {
            let mut guard = self.lock();
            let Some(state) = guard.as_mut() else {
                return;
            };
            match state.settings.mode {
                IntervalUnit::Bars if event.count_in => None,
                IntervalUnit::Bars => {
                    state.bars_left = state.bars_left.saturating_sub(1);
                    if state.bars_left == 0 {
                        state.bars_left = state.settings.interval;
                        Some(state.settings)
                    } else {
                        None
                    }
                }
                IntervalUnit::Seconds => {
                    if event.time - state.timer_start >= state.settings.interval as f64 {
                        state.timer_start = event.time;
                        Some(state.settings)
                    } else {
                        None
                    }
                }
            }
        };

        if let Some(settings) = due {
            let next = settings.next_tempo(scheduler.transport().tempo());
            scheduler.set_tempo(next);
            log::info!("[RampTrainer] Now {} BPM", next);
        }
    }
}
