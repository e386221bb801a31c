//! Lookahead scheduler
//!
//! Turns the logical [`Transport`] into future-timestamped sound events on the
//! audio clock. A coarse software timer calls [`LookaheadScheduler::tick`]
//! (see [`SchedulerDriver`](super::driver::SchedulerDriver)); each tick
//! enqueues everything due before `now + schedule_ahead` into the
//! [`SoundSink`], which plays it sample-accurately.
//!
//! Main-beat times are accumulated from the beat duration and never derived
//! from "now", so timer jitter cannot leak into the tempo.
//!
//! Locking: the runtime mutex is always taken before the transport read
//! lock. Setters take only the transport write lock and apply on the next
//! tick. Listener callbacks are dispatched after both locks are released.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::clock::{AudioClock, SoundSink};
use super::metronome::{ClickKind, Sound, Voice, MAIN_CLICK_SECS};
use super::transport::{
    Accent, Meter, Phrase, Polyrhythm, SilentBars, SubdivisionKind, Transport,
};
use crate::config::SchedulerConfig;
use crate::error::{log_audio_error, AudioError};

/// Capacity of the recent-beats ring
pub const RECENT_BEATS_CAPACITY: usize = 64;

/// Earliest allowed event time relative to now
const TIME_FLOOR_SECS: f64 = 0.001;

/// Maximum groove jitter at full strength (±15 ms)
const MAX_JITTER_SECS: f64 = 0.015;

/// Fraction of half a beat the first eighth subdivision is delayed at full swing
const SWING_RATIO: f64 = 0.6;

/// Tolerance used when comparing polyrhythm pulse times
const POLY_EPSILON: f64 = 0.0005;

const PHRASE_PING_GAIN: f32 = 0.9;

/// Delay before the first step of a pattern preview
const PREVIEW_START_SECS: f64 = 0.05;

// ============================================================================
// EVENTS
// ============================================================================

/// Entry of the recent-beats ring
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BeatEvent {
    pub time: f64,
    pub bar: u64,
    pub beat: u32,
    pub is_subdivision: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TickEvent {
    pub beat: u32,
    pub bar: u64,
    /// Nominal beat time (before latency compensation)
    pub time: f64,
    pub count_in: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BarStartEvent {
    pub bar: u64,
    pub time: f64,
    pub count_in: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolyLayer {
    A,
    B,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PolyTickEvent {
    pub layer: PolyLayer,
    pub time: f64,
    pub bar: u64,
    pub index: u64,
}

/// Any callback the scheduler emits
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum SchedulerEvent {
    Tick(TickEvent),
    BarStart(BarStartEvent),
    PolyTick(PolyTickEvent),
}

/// Consumer of scheduler callbacks.
///
/// Called from the timer thread driving `tick()`. Implementations must be
/// quick; a panicking listener is logged and skipped.
pub trait SchedulerListener: Send + Sync {
    fn on_tick(&self, _event: &TickEvent) {}
    fn on_bar_start(&self, _event: &BarStartEvent) {}
    fn on_poly_tick(&self, _event: &PolyTickEvent) {}
}

impl SchedulerListener for broadcast::Sender<SchedulerEvent> {
    fn on_tick(&self, event: &TickEvent) {
        let _ = self.send(SchedulerEvent::Tick(*event));
    }

    fn on_bar_start(&self, event: &BarStartEvent) {
        let _ = self.send(SchedulerEvent::BarStart(*event));
    }

    fn on_poly_tick(&self, event: &PolyTickEvent) {
        let _ = self.send(SchedulerEvent::PolyTick(*event));
    }
}

// ============================================================================
// GRID QUERIES
// ============================================================================

/// Point-in-time view of the beat grid around a timestamp
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BeatGridSnapshot {
    pub target_bpm: u32,
    pub beat_unit: u32,
    pub beat_duration: f64,
    /// Main-beat times within the requested window, ascending
    pub beats: Vec<f64>,
}

/// Read-only beat grid consumed by the tempo monitor and calibration.
pub trait BeatGridSource: Send + Sync {
    /// Grid within `time ± window_beats * beat_duration`, taken atomically
    fn grid_snapshot(&self, time: f64, window_beats: f64) -> BeatGridSnapshot;

    fn recent_beats(&self) -> Vec<BeatEvent>;
}

/// One-shot step pattern for [`LookaheadScheduler::preview_pattern`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepPattern {
    pub meter: Meter,
    /// `Mute` steps are rests
    pub steps: Vec<Accent>,
}

/// Public view of the scheduler's runtime counters
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SchedulerStatus {
    pub is_playing: bool,
    pub is_counting_in: bool,
    pub count_in_remaining: u32,
    pub current_beat_index: u64,
    pub next_main_beat_time: f64,
}

// ============================================================================
// RUNTIME STATE
// ============================================================================

struct BeatRing {
    entries: [BeatEvent; RECENT_BEATS_CAPACITY],
    head: usize,
    len: usize,
}

impl BeatRing {
    fn new() -> Self {
        Self {
            entries: [BeatEvent::default(); RECENT_BEATS_CAPACITY],
            head: 0,
            len: 0,
        }
    }

    fn push(&mut self, event: BeatEvent) {
        if self.len < RECENT_BEATS_CAPACITY {
            self.entries[(self.head + self.len) % RECENT_BEATS_CAPACITY] = event;
            self.len += 1;
        } else {
            self.entries[self.head] = event;
            self.head = (self.head + 1) % RECENT_BEATS_CAPACITY;
        }
    }

    fn iter(&self) -> impl Iterator<Item = &BeatEvent> + '_ {
        (0..self.len).map(move |i| &self.entries[(self.head + i) % RECENT_BEATS_CAPACITY])
    }

    fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct PolyLayerState {
    interval: f64,
    next: f64,
}

#[derive(Debug, Default)]
struct PolyState {
    anchored: bool,
    bar: u64,
    start: f64,
    end: f64,
    layers: [PolyLayerState; 2],
}

impl PolyState {
    fn anchor(&mut self, bar: u64, bar_start: f64, bar_duration: f64, poly: &Polyrhythm) {
        let ratios = [poly.ratio_a.max(1), poly.ratio_b.max(1)];
        self.anchored = true;
        self.bar = bar;
        self.start = bar_start;
        self.end = bar_start + bar_duration;
        for (layer, ratio) in self.layers.iter_mut().zip(ratios) {
            layer.interval = bar_duration / ratio as f64;
            layer.next = bar_start;
        }
    }

    fn reset(&mut self) {
        *self = PolyState::default();
    }
}

struct RuntimeState {
    is_playing: bool,
    is_counting_in: bool,
    count_in_remaining: u32,
    current_beat_index: u64,
    next_main_beat_time: f64,
    poly: PolyState,
    recent: BeatRing,
    meter_epoch: u64,
    poly_epoch: u64,
}

impl RuntimeState {
    fn new() -> Self {
        Self {
            is_playing: false,
            is_counting_in: false,
            count_in_remaining: 0,
            current_beat_index: 0,
            next_main_beat_time: 0.0,
            poly: PolyState::default(),
            recent: BeatRing::new(),
            meter_epoch: 0,
            poly_epoch: 0,
        }
    }
}

/// Immutable per-tick inputs
struct TickContext<'a> {
    transport: &'a Transport,
    now: f64,
    horizon: f64,
}

// ============================================================================
// SCHEDULER
// ============================================================================

pub struct LookaheadScheduler {
    config: SchedulerConfig,
    clock: Arc<dyn AudioClock>,
    sink: Arc<dyn SoundSink>,
    transport: RwLock<Transport>,
    runtime: Mutex<RuntimeState>,
    listeners: RwLock<Vec<Arc<dyn SchedulerListener>>>,
}

impl LookaheadScheduler {
    pub fn new(
        config: SchedulerConfig,
        clock: Arc<dyn AudioClock>,
        sink: Arc<dyn SoundSink>,
    ) -> Self {
        Self::with_transport(config, clock, sink, Transport::default())
    }

    pub fn with_transport(
        config: SchedulerConfig,
        clock: Arc<dyn AudioClock>,
        sink: Arc<dyn SoundSink>,
        transport: Transport,
    ) -> Self {
        Self {
            config,
            clock,
            sink,
            transport: RwLock::new(transport),
            runtime: Mutex::new(RuntimeState::new()),
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn AudioClock> {
        &self.clock
    }

    pub fn add_listener(&self, listener: Arc<dyn SchedulerListener>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// Start playback: resume the output clock, reset counters and prime one tick
    pub fn start(&self) -> Result<(), AudioError> {
        if let Err(err) = self.clock.resume() {
            log_audio_error(&err, "LookaheadScheduler::start");
            return Err(err);
        }

        {
            let mut rt = self.lock_runtime();
            if rt.is_playing {
                return Err(AudioError::AlreadyRunning);
            }
            let transport = self.transport();
            rt.is_playing = true;
            rt.current_beat_index = 0;
            rt.next_main_beat_time = self.clock.now() + self.config.start_offset_secs();
            rt.count_in_remaining = transport.count_in_bars();
            rt.is_counting_in = rt.count_in_remaining > 0;
            rt.meter_epoch = transport.meter_epoch();
            rt.poly_epoch = transport.poly_epoch();
            rt.poly.reset();
            rt.recent.clear();

            log::info!(
                "[Scheduler] Started at {} BPM ({}/{}), count-in {} bars",
                transport.tempo(),
                transport.meter().beats_per_bar,
                transport.meter().beat_unit,
                rt.count_in_remaining
            );
        }

        self.tick();
        Ok(())
    }

    /// Stop playback. Already enqueued clicks are left to finish.
    pub fn stop(&self) {
        let mut rt = self.lock_runtime();
        if !rt.is_playing {
            return;
        }
        rt.is_playing = false;
        rt.is_counting_in = false;
        rt.count_in_remaining = 0;
        rt.poly.reset();
        rt.recent.clear();
        log::info!("[Scheduler] Stopped after {} beats", rt.current_beat_index);
    }

    pub fn is_playing(&self) -> bool {
        self.lock_runtime().is_playing
    }

    pub fn status(&self) -> SchedulerStatus {
        let rt = self.lock_runtime();
        SchedulerStatus {
            is_playing: rt.is_playing,
            is_counting_in: rt.is_counting_in,
            count_in_remaining: rt.count_in_remaining,
            current_beat_index: rt.current_beat_index,
            next_main_beat_time: rt.next_main_beat_time,
        }
    }

    /// Schedule everything due before the lookahead horizon
    pub fn tick(&self) {
        let events = {
            let mut rt = self.lock_runtime();
            if !rt.is_playing {
                return;
            }
            let transport = self.transport();
            let now = self.clock.now();
            let ctx = TickContext {
                transport: &transport,
                now,
                horizon: now + self.config.schedule_ahead_secs(),
            };
            let mut events = Vec::new();
            self.schedule_window(&mut rt, &ctx, &mut events);
            events
        };
        self.dispatch(&events);
    }

    fn schedule_window(
        &self,
        rt: &mut RuntimeState,
        ctx: &TickContext<'_>,
        events: &mut Vec<SchedulerEvent>,
    ) {
        let transport = ctx.transport;

        if rt.meter_epoch != transport.meter_epoch() {
            rt.meter_epoch = transport.meter_epoch();
            rt.current_beat_index = 0;
        }
        if rt.poly_epoch != transport.poly_epoch() {
            rt.poly_epoch = transport.poly_epoch();
            rt.poly.reset();
        }

        let polyrhythm = transport.polyrhythm();
        let beats_per_bar = transport.meter().beats_per_bar.max(1) as u64;
        let beat_duration = transport.beat_duration();
        let subdivision = transport.subdivision();
        let pattern = transport.subdivision_pattern();
        let slots = subdivision.count();

        while rt.next_main_beat_time < ctx.horizon {
            let beat_time = rt.next_main_beat_time;
            let beat = (rt.current_beat_index % beats_per_bar) as u32;
            let bar = rt.current_beat_index / beats_per_bar;
            let bar_start = beat_time - beat as f64 * beat_duration;
            let count_in = rt.is_counting_in;
            let audible = transport.audio_enabled() && !transport.silent_bars().is_silent(bar);

            if beat == 0 {
                events.push(SchedulerEvent::BarStart(BarStartEvent {
                    bar,
                    time: beat_time,
                    count_in,
                }));

                if polyrhythm.enabled {
                    // Finish the previous bar's pulses before re-anchoring
                    if rt.poly.anchored {
                        self.schedule_poly(rt, ctx, bar_start - POLY_EPSILON, events);
                    }
                    rt.poly
                        .anchor(bar, bar_start, transport.bar_duration(), &polyrhythm);
                }

                if audible && transport.phrase().starts_at(bar) {
                    let voice = Voice::for_click(
                        Sound::Ping,
                        ClickKind::Accent,
                        PHRASE_PING_GAIN * transport.volume(),
                    );
                    self.emit(ctx, beat_time, 0.0, voice, MAIN_CLICK_SECS);
                }
            }

            let mut accent = transport
                .accents()
                .get(beat as usize)
                .copied()
                .unwrap_or(Accent::Normal);
            if slots > 1 && accent != Accent::Mute {
                match pattern.first() {
                    Some(Accent::Mute) => accent = Accent::Mute,
                    Some(Accent::Accent) => accent = Accent::Accent,
                    _ => {}
                }
            }

            if accent != Accent::Mute && audible {
                let kind = if accent == Accent::Accent {
                    ClickKind::Accent
                } else {
                    ClickKind::Normal
                };
                let voice = Voice::for_click(transport.sound(), kind, transport.volume());
                self.emit(ctx, beat_time, 0.0, voice, MAIN_CLICK_SECS);
            }

            for slot in 1..slots {
                let state = pattern.get(slot).copied().unwrap_or(Accent::Normal);
                if state == Accent::Mute {
                    continue;
                }
                let mut offset = beat_duration * slot as f64 / slots as f64;
                if subdivision == SubdivisionKind::Eighth && slot == 1 {
                    offset += beat_duration / 2.0 * SWING_RATIO * transport.swing();
                }
                let jitter = groove_jitter(transport.groove_jitter());
                let time = if audible {
                    let voice = Voice::for_click(
                        transport.sound(),
                        ClickKind::Subdivision,
                        transport.volume(),
                    );
                    self.emit(
                        ctx,
                        beat_time + offset,
                        jitter,
                        voice,
                        ClickKind::Subdivision.duration_secs(),
                    )
                } else {
                    self.schedule_time(ctx, beat_time + offset, jitter)
                };
                rt.recent.push(BeatEvent {
                    time,
                    bar,
                    beat,
                    is_subdivision: true,
                });
            }

            events.push(SchedulerEvent::Tick(TickEvent {
                beat,
                bar,
                time: beat_time,
                count_in,
            }));
            rt.recent.push(BeatEvent {
                time: beat_time,
                bar,
                beat,
                is_subdivision: false,
            });

            rt.next_main_beat_time += beat_duration;
            rt.current_beat_index += 1;

            if count_in && beat as u64 == beats_per_bar - 1 {
                rt.count_in_remaining = rt.count_in_remaining.saturating_sub(1);
                if rt.count_in_remaining == 0 {
                    rt.is_counting_in = false;
                    log::debug!("[Scheduler] Count-in finished at bar {}", bar);
                }
            }
        }

        if polyrhythm.enabled && rt.poly.anchored {
            self.schedule_poly(rt, ctx, ctx.horizon, events);
        }
    }

    /// Advance both polyrhythm layers up to `limit` (never past the bar end)
    fn schedule_poly(
        &self,
        rt: &mut RuntimeState,
        ctx: &TickContext<'_>,
        limit: f64,
        events: &mut Vec<SchedulerEvent>,
    ) {
        let transport = ctx.transport;
        let polyrhythm = transport.polyrhythm();
        let poly = &mut rt.poly;
        let audible = transport.audio_enabled() && !transport.silent_bars().is_silent(poly.bar);
        let cutoff = limit.min(poly.end + POLY_EPSILON);

        let layers = [
            (PolyLayer::A, polyrhythm.sound_a, polyrhythm.volume_a),
            (PolyLayer::B, polyrhythm.sound_b, polyrhythm.volume_b),
        ];
        for (state, (layer, sound, volume)) in poly.layers.iter_mut().zip(layers) {
            let interval = state.interval;
            if interval.is_nan() || interval <= 0.0 {
                continue;
            }
            let mut next = state.next;
            // Catch up silently if the timer fell behind
            while next + POLY_EPSILON < ctx.now {
                next += interval;
            }
            while next < cutoff {
                if audible {
                    let voice =
                        Voice::for_click(sound, ClickKind::Accent, volume * transport.volume());
                    self.emit(ctx, next, 0.0, voice, MAIN_CLICK_SECS);
                }
                events.push(SchedulerEvent::PolyTick(PolyTickEvent {
                    layer,
                    time: next,
                    bar: poly.bar,
                    index: ((next - poly.start) / interval).round().max(0.0) as u64,
                }));
                next += interval;
            }
            state.next = next;
        }
    }

    /// `max(now + 1 ms, nominal - latency + jitter)`
    fn schedule_time(&self, ctx: &TickContext<'_>, nominal: f64, jitter: f64) -> f64 {
        (nominal - ctx.transport.latency_offset_secs() + jitter).max(ctx.now + TIME_FLOOR_SECS)
    }

    fn emit(
        &self,
        ctx: &TickContext<'_>,
        nominal: f64,
        jitter: f64,
        voice: Voice,
        duration_secs: f64,
    ) -> f64 {
        let time = self.schedule_time(ctx, nominal, jitter);
        self.sink.schedule_sound(time, voice, duration_secs);
        time
    }

    fn dispatch(&self, events: &[SchedulerEvent]) {
        if events.is_empty() {
            return;
        }
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for event in events {
            for listener in &listeners {
                let result = catch_unwind(AssertUnwindSafe(|| match event {
                    SchedulerEvent::Tick(e) => listener.on_tick(e),
                    SchedulerEvent::BarStart(e) => listener.on_bar_start(e),
                    SchedulerEvent::PolyTick(e) => listener.on_poly_tick(e),
                }));
                if result.is_err() {
                    log::warn!("[Scheduler] Listener panicked handling {:?}", event);
                }
            }
        }
    }

    /// Schedule a step pattern once, starting 50 ms from now.
    ///
    /// Steps divide one bar of quarter-note beats at `tempo` (or the current
    /// tempo). Steps get the same jitter and latency treatment as subdivisions.
    pub fn preview_pattern(&self, pattern: &StepPattern, tempo: Option<u32>) -> Result<(), AudioError> {
        self.clock.resume()?;
        let transport = self.transport();
        if !transport.audio_enabled() || pattern.steps.is_empty() {
            return Ok(());
        }

        let tempo = tempo.unwrap_or(transport.tempo()).clamp(1, 600);
        let beat = 60.0 / tempo as f64;
        let bar = beat * pattern.meter.beats_per_bar.max(1) as f64;
        let step = bar / pattern.steps.len() as f64;
        let now = self.clock.now();
        let ctx = TickContext {
            transport: &transport,
            now,
            horizon: now,
        };
        let start = now + PREVIEW_START_SECS;

        for (idx, accent) in pattern.steps.iter().enumerate() {
            let kind = match accent {
                Accent::Mute => continue,
                Accent::Accent => ClickKind::Accent,
                Accent::Normal => ClickKind::Normal,
            };
            let voice = Voice::for_click(transport.sound(), kind, transport.volume());
            let jitter = groove_jitter(transport.groove_jitter());
            self.emit(&ctx, start + idx as f64 * step, jitter, voice, MAIN_CLICK_SECS);
        }
        log::debug!(
            "[Scheduler] Previewed {} steps at {} BPM",
            pattern.steps.len(),
            tempo
        );
        Ok(())
    }

    /// Snapshot copy of the recent-beats ring, oldest first
    pub fn recent_beats(&self) -> Vec<BeatEvent> {
        self.lock_runtime().recent.iter().copied().collect()
    }

    /// Main-beat timestamps within `time ± window_secs`
    pub fn beat_grid_around(&self, time: f64, window_secs: f64) -> Vec<f64> {
        let rt = self.lock_runtime();
        let transport = self.transport();
        grid_around(&rt, &transport, time, window_secs)
    }

    // ========================================================================
    // TRANSPORT
    // ========================================================================

    /// Consistent copy of the transport
    pub fn transport(&self) -> Transport {
        self.transport
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Apply an arbitrary edit atomically; takes effect on the next tick
    pub fn update_transport<F: FnOnce(&mut Transport)>(&self, edit: F) {
        let mut transport = self
            .transport
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        edit(&mut transport);
    }

    pub fn set_tempo(&self, tempo: u32) {
        self.update_transport(|t| t.set_tempo(tempo));
    }

    pub fn set_meter(&self, meter: Meter) {
        self.update_transport(|t| t.set_meter(meter));
    }

    pub fn set_accents(&self, accents: &[Accent]) {
        self.update_transport(|t| t.set_accents(accents));
    }

    pub fn set_subdivision_kind(&self, kind: SubdivisionKind) {
        self.update_transport(|t| t.set_subdivision_kind(kind));
    }

    pub fn set_subdivision_pattern(&self, kind: SubdivisionKind, pattern: &[Accent]) {
        self.update_transport(|t| t.set_subdivision_pattern(kind, pattern));
    }

    pub fn set_swing(&self, swing: f64) {
        self.update_transport(|t| t.set_swing(swing));
    }

    pub fn set_groove_jitter(&self, jitter: f64) {
        self.update_transport(|t| t.set_groove_jitter(jitter));
    }

    pub fn set_latency_offset_ms(&self, ms: f64) {
        self.update_transport(|t| t.set_latency_offset_ms(ms));
    }

    pub fn set_silent_bars(&self, silent_bars: SilentBars) {
        self.update_transport(|t| t.set_silent_bars(silent_bars));
    }

    pub fn set_phrase(&self, phrase: Phrase) {
        self.update_transport(|t| t.set_phrase(phrase));
    }

    pub fn set_count_in(&self, bars: u32) {
        self.update_transport(|t| t.set_count_in(bars));
    }

    pub fn set_polyrhythm(&self, polyrhythm: Polyrhythm) {
        self.update_transport(|t| t.set_polyrhythm(polyrhythm));
    }

    pub fn set_sound(&self, sound: Sound) {
        self.update_transport(|t| t.set_sound(sound));
    }

    pub fn set_secondary_sound(&self, sound: Sound) {
        self.update_transport(|t| t.set_secondary_sound(sound));
    }

    pub fn set_volume(&self, volume: f32) {
        self.update_transport(|t| t.set_volume(volume));
    }

    pub fn set_mute(&self, muted: bool) {
        self.update_transport(|t| t.set_mute(muted));
    }

    pub fn set_quiet_mode(&self, quiet: bool) {
        self.update_transport(|t| t.set_quiet_mode(quiet));
    }

    fn lock_runtime(&self) -> MutexGuard<'_, RuntimeState> {
        self.runtime.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl BeatGridSource for LookaheadScheduler {
    fn grid_snapshot(&self, time: f64, window_beats: f64) -> BeatGridSnapshot {
        let rt = self.lock_runtime();
        let transport = self.transport();
        let beat_duration = transport.beat_duration();
        BeatGridSnapshot {
            target_bpm: transport.tempo(),
            beat_unit: transport.meter().beat_unit,
            beat_duration,
            beats: grid_around(&rt, &transport, time, window_beats * beat_duration),
        }
    }

    fn recent_beats(&self) -> Vec<BeatEvent> {
        LookaheadScheduler::recent_beats(self)
    }
}

/// Emitted main beats plus the projected grid from the next pending beat
fn grid_around(rt: &RuntimeState, transport: &Transport, time: f64, window: f64) -> Vec<f64> {
    let window = window.abs();
    let mut beats: Vec<f64> = rt
        .recent
        .iter()
        .filter(|b| !b.is_subdivision && (b.time - time).abs() <= window)
        .map(|b| b.time)
        .collect();

    if rt.is_playing {
        let beat_duration = transport.beat_duration();
        let mut t = rt.next_main_beat_time;
        while t <= time + window {
            if t >= time - window {
                beats.push(t);
            }
            t += beat_duration;
        }
    }

    beats.sort_by(f64::total_cmp);
    beats
}

fn groove_jitter(amount: f64) -> f64 {
    if amount <= 0.0 {
        return 0.0;
    }
    rand::thread_rng().gen_range(-1.0f64..=1.0) * MAX_JITTER_SECS * amount
}
