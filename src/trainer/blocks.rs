// Tempo blocks
//
// A practice sequence of fixed-tempo sections ("60 BPM for 8 bars, then
// 80 BPM for 30 seconds, ..."). Each block sets the tempo when it begins and
// hands over to the next once its length has elapsed. Bar-counted blocks
// ignore count-in bars; second-counted blocks measure audio-clock time from
// the bar the block began on.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde::{Deserialize, Serialize};

use super::IntervalUnit;
use crate::audio::scheduler::{BarStartEvent, LookaheadScheduler, SchedulerListener};

/// One section of a block sequence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TempoBlock {
    pub bpm: u32,
    /// Length in `unit`s
    pub duration: u32,
    pub unit: IntervalUnit,
    pub label: String,
}

impl Default for TempoBlock {
    fn default() -> Self {
        Self {
            bpm: 100,
            duration: 8,
            unit: IntervalUnit::Bars,
            label: String::new(),
        }
    }
}

#[derive(Debug)]
struct BlockRun {
    blocks: Vec<TempoBlock>,
    index: usize,
    bars_left: i64,
    started_at: f64,
}

impl BlockRun {
    fn current(&self) -> &TempoBlock {
        &self.blocks[self.index]
    }

    fn position(&self) -> String {
        format!("Block {}/{}", self.index + 1, self.blocks.len())
    }
}

#[derive(Debug)]
struct BlocksState {
    run: Option<BlockRun>,
    status: String,
}

pub struct TempoBlocks {
    scheduler: Weak<LookaheadScheduler>,
    state: Mutex<BlocksState>,
}

impl TempoBlocks {
    pub fn new(scheduler: &Arc<LookaheadScheduler>) -> Self {
        Self {
            scheduler: Arc::downgrade(scheduler),
            state: Mutex::new(BlocksState {
                run: None,
                status: "Off".to_string(),
            }),
        }
    }

    /// Begin `blocks` from the first one. Returns `false` for an empty sequence.
    pub fn start(&self, blocks: Vec<TempoBlock>) -> bool {
        let Some(scheduler) = self.scheduler.upgrade() else {
            return false;
        };
        let mut state = self.lock();
        let Some(first) = blocks.first() else {
            state.run = None;
            state.status = "Off".to_string();
            return false;
        };

        let bpm = first.bpm;
        let run = BlockRun {
            bars_left: first.duration as i64,
            blocks,
            index: 0,
            started_at: scheduler.clock().now(),
        };
        state.status = run.position();
        log::info!(
            "[TempoBlocks] Starting {} blocks at {} BPM",
            run.blocks.len(),
            bpm
        );
        state.run = Some(run);
        drop(state);

        scheduler.set_tempo(bpm);
        true
    }

    pub fn stop(&self) {
        let mut state = self.lock();
        if state.run.take().is_some() {
            log::info!("[TempoBlocks] Stopped");
        }
        state.status = "Off".to_string();
    }

    pub fn is_active(&self) -> bool {
        self.lock().run.is_some()
    }

    /// Zero-based index of the block being played
    pub fn current_index(&self) -> Option<usize> {
        self.lock().run.as_ref().map(|run| run.index)
    }

    /// Progress line: "Block 2/3 • 4 bars remaining", "Done", "Off"
    pub fn status_text(&self) -> String {
        self.lock().status.clone()
    }

    fn lock(&self) -> MutexGuard<'_, BlocksState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SchedulerListener for TempoBlocks {
    fn on_bar_start(&self, event: &BarStartEvent) {
        let Some(scheduler) = self.scheduler.upgrade() else {
            return;
        };

        let next_bpm = {
            let mut guard = self.lock();
            let state = &mut *guard;
            let Some(run) = state.run.as_mut() else {
                return;
            };

            let (unit, duration) = (run.current().unit, run.current().duration);
            let remaining = match unit {
                IntervalUnit::Bars => {
                    if !event.count_in {
                        run.bars_left -= 1;
                    }
                    run.bars_left as f64
                }
                IntervalUnit::Seconds => {
                    (duration as f64 - (event.time - run.started_at)).max(0.0)
                }
            };

            if remaining > 0.0 {
                let left = match unit {
                    IntervalUnit::Bars => format!("{} bars", run.bars_left),
                    IntervalUnit::Seconds => format!("{}s", remaining.ceil() as u64),
                };
                state.status = format!("{} • {} remaining", run.position(), left);
                None
            } else {
                run.index += 1;
                match run.blocks.get(run.index).cloned() {
                    Some(next) => {
                        run.bars_left = next.duration as i64;
                        run.started_at = event.time;
                        state.status = if next.label.is_empty() {
                            run.position()
                        } else {
                            format!("{} • {}", run.position(), next.label)
                        };
                        log::info!(
                            "[TempoBlocks] {} at {} BPM",
                            run.position(),
                            next.bpm
                        );
                        Some(next.bpm)
                    }
                    None => {
                        state.run = None;
                        state.status = "Done".to_string();
                        log::info!("[TempoBlocks] Sequence done");
                        None
                    }
                }
            }
        };

        if let Some(bpm) = next_bpm {
            scheduler.set_tempo(bpm);
        }
    }
}
