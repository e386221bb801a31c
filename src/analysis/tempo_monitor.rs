// TempoMonitor - tempo/drift classifier
//
// Aligns onsets to the scheduler's beat grid, estimates the performer's tempo
// from inter-onset intervals and publishes a hysteresis-stabilised verdict:
// NO_DATA, IN_TIME, AHEAD, BEHIND, RUSHING or SLOWING.
//
// Pipeline per onset:
// 1. Subtract the known input latency and append to the onset history
// 2. Nearest grid beat within ±1.25 beats; > 0.45 beat away is noise
// 3. Trimmed-median IOI tempo estimate, blended 65/35 with the previous one
// 4. Classify from mean drift and estimated tempo
// 5. Publish only after the candidate repeats and 600 ms have passed
//
// Eight seconds without onsets (audio clock) clears every history and forces
// NO_DATA; this is checked on each onset and by `check_idle`.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::onset::{Onset, OnsetListener};
use crate::audio::clock::AudioClock;
use crate::audio::scheduler::{BeatGridSnapshot, BeatGridSource};
use crate::config::TempoMonitorConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimingStatus {
    NoData,
    InTime,
    Ahead,
    Behind,
    Rushing,
    Slowing,
}

impl TimingStatus {
    pub fn code(self) -> &'static str {
        match self {
            TimingStatus::NoData => "NO_DATA",
            TimingStatus::InTime => "IN_TIME",
            TimingStatus::Ahead => "AHEAD",
            TimingStatus::Behind => "BEHIND",
            TimingStatus::Rushing => "RUSHING",
            TimingStatus::Slowing => "SLOWING",
        }
    }
}

/// Presentation hint attached to every status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusColor {
    Grey,
    Green,
    Yellow,
    Red,
}

/// Published classifier status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub active: bool,
    /// Estimated performer tempo, rounded to 0.1 BPM
    pub player_bpm: Option<f64>,
    pub target_bpm: Option<u32>,
    /// Mean drift, rounded to whole milliseconds
    pub avg_drift_ms: Option<f64>,
    pub status_code: TimingStatus,
    pub status_text: String,
    pub color: StatusColor,
}

impl StatusReport {
    pub fn no_data(active: bool) -> Self {
        Self::new(active, TimingStatus::NoData, None, None, None)
    }

    /// Build a report; text and color derive only from the code and magnitudes
    pub fn new(
        active: bool,
        code: TimingStatus,
        avg_drift_ms: Option<f64>,
        target_bpm: Option<u32>,
        player_bpm: Option<f64>,
    ) -> Self {
        let rounded_drift = avg_drift_ms.map(f64::round);
        let tempo_delta = match (player_bpm, target_bpm) {
            (Some(player), Some(target)) => {
                Some(((player - target as f64) * 10.0).round() / 10.0)
            }
            _ => None,
        };

        let (status_text, color) = match (code, rounded_drift, tempo_delta) {
            (TimingStatus::InTime, _, _) => ("In time".to_string(), StatusColor::Green),
            (TimingStatus::Ahead, Some(drift), _) => (
                format!("Slightly ahead (~{} ms early)", drift.abs()),
                StatusColor::Yellow,
            ),
            (TimingStatus::Behind, Some(drift), _) => (
                format!("Slightly behind (~{} ms late)", drift),
                StatusColor::Yellow,
            ),
            (TimingStatus::Rushing, _, Some(delta)) if delta > 0.0 => (
                format!("Rushing (~{} BPM faster)", delta.abs()),
                StatusColor::Red,
            ),
            (TimingStatus::Rushing, _, _) => ("Rushing".to_string(), StatusColor::Red),
            (TimingStatus::Slowing, _, Some(delta)) if delta < 0.0 => (
                format!("Slowing (~{} BPM slower)", delta.abs()),
                StatusColor::Red,
            ),
            (TimingStatus::Slowing, _, _) => ("Slowing".to_string(), StatusColor::Red),
            _ => ("Waiting for clear hits...".to_string(), StatusColor::Grey),
        };

        Self {
            active,
            player_bpm: player_bpm.map(|bpm| (bpm * 10.0).round() / 10.0),
            target_bpm,
            avg_drift_ms: rounded_drift,
            status_code: code,
            status_text,
            color,
        }
    }
}

/// Consumer of published status changes
pub trait StatusListener: Send + Sync {
    fn on_status_change(&self, status: &StatusReport);
}

impl StatusListener for broadcast::Sender<StatusReport> {
    fn on_status_change(&self, status: &StatusReport) {
        let _ = self.send(status.clone());
    }
}

struct MonitorState {
    active: bool,
    onset_times: VecDeque<f64>,
    drifts: VecDeque<f64>,
    last_tempo: Option<f64>,
    pending_status: TimingStatus,
    pending_count: u32,
    last_status_change: Option<f64>,
    /// Audio-clock time the last onset arrived
    last_onset_at: Option<f64>,
    input_latency_secs: f64,
    status: StatusReport,
}

impl MonitorState {
    fn clear_history(&mut self) {
        self.onset_times.clear();
        self.drifts.clear();
        self.last_tempo = None;
        self.pending_status = TimingStatus::NoData;
        self.pending_count = 0;
    }
}

pub struct TempoMonitor {
    config: TempoMonitorConfig,
    grid: Arc<dyn BeatGridSource>,
    clock: Arc<dyn AudioClock>,
    state: Mutex<MonitorState>,
    listeners: RwLock<Vec<Arc<dyn StatusListener>>>,
}

impl TempoMonitor {
    pub fn new(
        config: TempoMonitorConfig,
        grid: Arc<dyn BeatGridSource>,
        clock: Arc<dyn AudioClock>,
    ) -> Self {
        let state = MonitorState {
            active: false,
            onset_times: VecDeque::with_capacity(config.max_onsets),
            drifts: VecDeque::with_capacity(config.max_drifts),
            last_tempo: None,
            pending_status: TimingStatus::NoData,
            pending_count: 0,
            last_status_change: None,
            last_onset_at: None,
            input_latency_secs: config.input_latency_ms / 1000.0,
            status: StatusReport::no_data(false),
        };
        Self {
            config,
            grid,
            clock,
            state: Mutex::new(state),
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &TempoMonitorConfig {
        &self.config
    }

    pub fn add_listener(&self, listener: Arc<dyn StatusListener>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    pub fn start(&self) {
        let published = {
            let mut state = self.lock_state();
            state.active = true;
            state.clear_history();
            state.last_status_change = None;
            state.last_onset_at = None;
            Self::publish(&mut state, StatusReport::no_data(true))
        };
        log::info!("[TempoMonitor] Started");
        self.notify(published);
    }

    /// Synchronous and idempotent
    pub fn stop(&self) {
        let published = {
            let mut state = self.lock_state();
            if !state.active {
                return;
            }
            state.active = false;
            state.clear_history();
            state.last_onset_at = None;
            Self::publish(&mut state, StatusReport::no_data(false))
        };
        log::info!("[TempoMonitor] Stopped");
        self.notify(published);
    }

    pub fn is_active(&self) -> bool {
        self.lock_state().active
    }

    /// Last published status
    pub fn status(&self) -> StatusReport {
        self.lock_state().status.clone()
    }

    pub fn set_input_latency_ms(&self, ms: f64) {
        self.lock_state().input_latency_secs = ms / 1000.0;
    }

    /// Drift samples currently held, oldest first
    pub fn drift_history(&self) -> Vec<f64> {
        self.lock_state().drifts.iter().copied().collect()
    }

    pub fn onset_count(&self) -> usize {
        self.lock_state().onset_times.len()
    }

    /// Feed one onset timestamp (audio clock seconds)
    pub fn handle_onset(&self, time: f64) {
        let now = self.clock.now();
        let mut published = Vec::with_capacity(2);
        {
            let mut state = self.lock_state();
            if !state.active {
                return;
            }

            if self.timed_out(&state, now) {
                state.clear_history();
                published.extend(Self::publish(&mut state, StatusReport::no_data(true)));
            }
            state.last_onset_at = Some(now);

            let corrected = time - state.input_latency_secs;
            state.onset_times.push_back(corrected);
            while state.onset_times.len() > self.config.max_onsets {
                state.onset_times.pop_front();
            }

            let snapshot = self
                .grid
                .grid_snapshot(corrected, self.config.grid_window_beats);

            if let Some(drift) = self.drift_ms(corrected, &snapshot) {
                state.drifts.push_back(drift);
                while state.drifts.len() > self.config.max_drifts {
                    state.drifts.pop_front();
                }
            } else {
                log::trace!("[TempoMonitor] Onset at {:.3}s discarded as noise", corrected);
            }

            state.last_tempo = self.estimate_tempo(&state, &snapshot);
            published.extend(self.evaluate(&mut state, &snapshot, now));
        }
        for report in published {
            self.notify(Some(report));
        }
    }

    /// Independent no-data check; returns true when it forced NO_DATA
    pub fn check_idle(&self) -> bool {
        let now = self.clock.now();
        let published = {
            let mut state = self.lock_state();
            if !state.active || !self.timed_out(&state, now) {
                return false;
            }
            state.clear_history();
            state.last_onset_at = None;
            Self::publish(&mut state, StatusReport::no_data(true))
        };
        log::debug!("[TempoMonitor] No onsets for {} ms", self.config.no_data_timeout_ms);
        self.notify(published);
        true
    }

    fn timed_out(&self, state: &MonitorState, now: f64) -> bool {
        state
            .last_onset_at
            .is_some_and(|last| (now - last) * 1000.0 > self.config.no_data_timeout_ms)
    }

    fn drift_ms(&self, onset: f64, snapshot: &BeatGridSnapshot) -> Option<f64> {
        let (offset, _) = super::quantizer::nearest_offset(onset, &snapshot.beats)?;
        if offset.abs() > snapshot.beat_duration * self.config.noise_gate_beats {
            return None;
        }
        Some(offset * 1000.0)
    }

    fn estimate_tempo(&self, state: &MonitorState, snapshot: &BeatGridSnapshot) -> Option<f64> {
        let skip = state
            .onset_times
            .len()
            .saturating_sub(self.config.tempo_window);
        let times: Vec<f64> = state.onset_times.iter().skip(skip).copied().collect();
        if times.len() < 3 || snapshot.target_bpm == 0 {
            return None;
        }

        let expected = snapshot.beat_duration;
        let (min_ioi, max_ioi) = if expected > 0.0 {
            (
                self.config.min_ioi_secs.max(expected * 0.45),
                self.config.max_ioi_secs.min(expected * 2.2),
            )
        } else {
            (self.config.min_ioi_secs, self.config.max_ioi_secs)
        };

        let mut iois: Vec<f64> = times
            .windows(2)
            .map(|pair| pair[1] - pair[0])
            .filter(|ioi| (min_ioi..=max_ioi).contains(ioi))
            .collect();
        if iois.len() < 2 {
            return None;
        }
        iois.sort_by(f64::total_cmp);

        let trim = (iois.len() as f64 * self.config.trim_fraction).floor() as usize;
        let trimmed = if iois.len() > 2 * trim {
            &iois[trim..iois.len() - trim]
        } else {
            &iois[..]
        };
        let median = trimmed[trimmed.len() / 2];
        if !median.is_finite() || median <= 0.0 {
            return None;
        }

        // Beats per minute in the meter's beat unit
        let raw = snapshot.target_bpm as f64 * expected / median;
        Some(match state.last_tempo {
            Some(previous) if previous.is_finite() => {
                previous * self.config.tempo_smoothing + raw * (1.0 - self.config.tempo_smoothing)
            }
            _ => raw,
        })
    }

    fn classify(&self, avg_drift: f64, player_bpm: Option<f64>, target_bpm: f64) -> TimingStatus {
        let tolerance = self.config.drift_tolerance_ms;
        let drift_only = || {
            if avg_drift.abs() <= tolerance {
                TimingStatus::InTime
            } else if avg_drift < 0.0 {
                TimingStatus::Ahead
            } else {
                TimingStatus::Behind
            }
        };

        match player_bpm {
            Some(bpm) if bpm > target_bpm + self.config.tempo_tolerance_bpm && avg_drift < -tolerance => {
                TimingStatus::Rushing
            }
            Some(bpm) if bpm < target_bpm - self.config.tempo_tolerance_bpm && avg_drift > tolerance => {
                TimingStatus::Slowing
            }
            _ => drift_only(),
        }
    }

    fn evaluate(
        &self,
        state: &mut MonitorState,
        snapshot: &BeatGridSnapshot,
        now: f64,
    ) -> Option<StatusReport> {
        if state.drifts.len() < self.config.min_drifts_for_status.max(1) {
            return Self::publish(state, StatusReport::no_data(true));
        }

        let avg_drift = state.drifts.iter().sum::<f64>() / state.drifts.len() as f64;
        let target = snapshot.target_bpm;
        let code = self.classify(avg_drift, state.last_tempo, target as f64);

        if code != state.pending_status {
            state.pending_status = code;
            state.pending_count = 1;
        } else {
            state.pending_count += 1;
        }

        let stable = state.pending_count >= self.config.min_stable_count
            || code == TimingStatus::NoData;
        let spaced = state
            .last_status_change
            .map_or(true, |last| now - last >= self.config.min_status_interval_secs);
        if !(stable && spaced) {
            return None;
        }

        state.last_status_change = Some(now);
        let report = StatusReport::new(
            true,
            code,
            Some(avg_drift),
            Some(target),
            state.last_tempo,
        );
        if report.status_code != state.status.status_code {
            log::info!(
                "[TempoMonitor] {} -> {} (avg drift {:.1} ms)",
                state.status.status_code.code(),
                code.code(),
                avg_drift
            );
        }
        Self::publish(state, report)
    }

    /// Store `report`; returns it when listeners need to hear about it
    fn publish(state: &mut MonitorState, report: StatusReport) -> Option<StatusReport> {
        if state.status == report {
            return None;
        }
        state.status = report.clone();
        Some(report)
    }

    fn notify(&self, report: Option<StatusReport>) {
        let Some(report) = report else {
            return;
        };
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener.on_status_change(&report))).is_err() {
                log::warn!("[TempoMonitor] Status listener panicked");
            }
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl OnsetListener for TempoMonitor {
    fn on_onset(&self, onset: &Onset) {
        self.handle_onset(onset.time);
    }
}
