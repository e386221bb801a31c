//! Transport - the logical metronome state
//!
//! Owned by the [`LookaheadScheduler`](super::scheduler::LookaheadScheduler)
//! and mutated only through its setters. Every setter clamps or reshapes its
//! input into the valid range instead of rejecting it, so a `Transport` is
//! always schedulable.

use serde::{Deserialize, Serialize};

use super::metronome::{beat_duration, Sound};

pub const MIN_TEMPO: u32 = 1;
pub const MAX_TEMPO: u32 = 600;
pub const MAX_LATENCY_SECS: f64 = 0.2;
pub const MAX_COUNT_IN_BARS: u32 = 8;

/// Per-slot emphasis used by beat accents, subdivision and step patterns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Accent {
    Accent,
    Normal,
    Mute,
}

/// How many evenly spaced slots each beat is divided into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubdivisionKind {
    None,
    Eighth,
    Triplet,
    Sixteenth,
    Quintuplet,
}

impl SubdivisionKind {
    /// Subdivisions per beat, including the main beat at slot 0
    pub fn count(self) -> usize {
        match self {
            SubdivisionKind::None => 1,
            SubdivisionKind::Eighth => 2,
            SubdivisionKind::Triplet => 3,
            SubdivisionKind::Sixteenth => 4,
            SubdivisionKind::Quintuplet => 5,
        }
    }
}

/// Time signature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meter {
    pub beats_per_bar: u32,
    pub beat_unit: u32,
}

impl Meter {
    pub fn new(beats_per_bar: u32, beat_unit: u32) -> Self {
        Self {
            beats_per_bar: beats_per_bar.max(1),
            beat_unit: beat_unit.max(1),
        }
    }

    /// Parse `"7/8"`-style signatures; missing or invalid parts default to 4
    pub fn parse(signature: &str) -> Self {
        let mut parts = signature.split('/');
        let mut next = || {
            parts
                .next()
                .and_then(|p| p.trim().parse::<u32>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(4)
        };
        let beats = next();
        let unit = next();
        Self::new(beats, unit)
    }
}

impl Default for Meter {
    fn default() -> Self {
        Self::new(4, 4)
    }
}

/// Accent patterns for each subdivision kind, one entry per slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubdivisionPatterns {
    pub eighth: Vec<Accent>,
    pub triplet: Vec<Accent>,
    pub sixteenth: Vec<Accent>,
    pub quintuplet: Vec<Accent>,
}

impl Default for SubdivisionPatterns {
    fn default() -> Self {
        Self {
            eighth: default_pattern(2),
            triplet: default_pattern(3),
            sixteenth: default_pattern(4),
            quintuplet: default_pattern(5),
        }
    }
}

fn default_pattern(len: usize) -> Vec<Accent> {
    let mut pattern = vec![Accent::Normal; len];
    pattern[0] = Accent::Accent;
    pattern
}

impl SubdivisionPatterns {
    pub fn get(&self, kind: SubdivisionKind) -> &[Accent] {
        match kind {
            SubdivisionKind::None => &[],
            SubdivisionKind::Eighth => &self.eighth,
            SubdivisionKind::Triplet => &self.triplet,
            SubdivisionKind::Sixteenth => &self.sixteenth,
            SubdivisionKind::Quintuplet => &self.quintuplet,
        }
    }

    /// Replace `kind`'s pattern, padded with `Normal` / truncated to its slot count
    pub fn set(&mut self, kind: SubdivisionKind, pattern: &[Accent]) {
        let slot = match kind {
            SubdivisionKind::None => return,
            SubdivisionKind::Eighth => &mut self.eighth,
            SubdivisionKind::Triplet => &mut self.triplet,
            SubdivisionKind::Sixteenth => &mut self.sixteenth,
            SubdivisionKind::Quintuplet => &mut self.quintuplet,
        };
        *slot = fit_length(pattern, kind.count());
    }
}

fn fit_length(pattern: &[Accent], len: usize) -> Vec<Accent> {
    let mut fitted: Vec<Accent> = pattern.iter().copied().take(len).collect();
    fitted.resize(len, Accent::Normal);
    fitted
}

/// Bars whose audio is suppressed (callbacks still fire)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SilentBars {
    pub enabled: bool,
    pub every: u32,
}

impl SilentBars {
    pub fn new(enabled: bool, every: u32) -> Self {
        Self {
            enabled,
            every: every.max(2),
        }
    }

    pub fn is_silent(&self, bar_index: u64) -> bool {
        self.enabled && (bar_index + 1) % self.every.max(2) as u64 == 0
    }
}

impl Default for SilentBars {
    fn default() -> Self {
        Self::new(false, 4)
    }
}

/// Phrase marker: an extra ping on the first bar of every phrase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phrase {
    pub enabled: bool,
    pub length: u32,
    /// Number of phrases the player is aiming for; informational for consumers
    pub target: u32,
}

impl Phrase {
    pub fn new(enabled: bool, length: u32, target: u32) -> Self {
        Self {
            enabled,
            length: length.max(2),
            target,
        }
    }

    pub fn starts_at(&self, bar_index: u64) -> bool {
        self.enabled && bar_index % self.length.max(2) as u64 == 0
    }
}

impl Default for Phrase {
    fn default() -> Self {
        Self::new(false, 4, 0)
    }
}

/// Two periodic layers dividing each bar into `ratio_a` and `ratio_b` pulses
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Polyrhythm {
    pub enabled: bool,
    pub ratio_a: u32,
    pub ratio_b: u32,
    pub volume_a: f32,
    pub volume_b: f32,
    pub sound_a: Sound,
    pub sound_b: Sound,
}

impl Polyrhythm {
    fn sanitized(mut self) -> Self {
        self.ratio_a = self.ratio_a.max(1);
        self.ratio_b = self.ratio_b.max(1);
        self.volume_a = self.volume_a.clamp(0.0, 1.0);
        self.volume_b = self.volume_b.clamp(0.0, 1.0);
        self
    }
}

impl Default for Polyrhythm {
    fn default() -> Self {
        Self {
            enabled: false,
            ratio_a: 3,
            ratio_b: 2,
            volume_a: 1.0,
            volume_b: 0.7,
            sound_a: Sound::Woodblock,
            sound_b: Sound::Beep,
        }
    }
}

/// Complete logical transport.
///
/// Cloned as an immutable snapshot at the start of every scheduler tick and
/// for every external read. Deserialization goes through the same setters
/// as live edits, so a loaded transport is clamped like any other.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "TransportRecord")]
pub struct Transport {
    tempo: u32,
    meter: Meter,
    accents: Vec<Accent>,
    subdivision: SubdivisionKind,
    subdivision_patterns: SubdivisionPatterns,
    swing: f64,
    groove_jitter: f64,
    latency_offset_secs: f64,
    silent_bars: SilentBars,
    phrase: Phrase,
    count_in_bars: u32,
    polyrhythm: Polyrhythm,
    sound: Sound,
    secondary_sound: Sound,
    volume: f32,
    muted: bool,
    quiet_mode: bool,
    /// Bumped whenever the meter changes so the scheduler restarts its beat count
    meter_epoch: u64,
    /// Bumped whenever the polyrhythm config changes so layers re-anchor
    poly_epoch: u64,
}

impl Default for Transport {
    fn default() -> Self {
        let meter = Meter::default();
        Self {
            tempo: 120,
            meter,
            accents: normalize_accents(&[], meter.beats_per_bar),
            subdivision: SubdivisionKind::None,
            subdivision_patterns: SubdivisionPatterns::default(),
            swing: 0.0,
            groove_jitter: 0.0,
            latency_offset_secs: 0.0,
            silent_bars: SilentBars::default(),
            phrase: Phrase::default(),
            count_in_bars: 0,
            polyrhythm: Polyrhythm::default(),
            sound: Sound::Woodblock,
            secondary_sound: Sound::Beep,
            volume: 0.8,
            muted: false,
            quiet_mode: false,
            meter_epoch: 0,
            poly_epoch: 0,
        }
    }
}

/// Serialized form of [`Transport`], before any clamping
#[derive(Deserialize)]
#[serde(default)]
struct TransportRecord {
    tempo: u32,
    meter: Meter,
    accents: Vec<Accent>,
    subdivision: SubdivisionKind,
    subdivision_patterns: SubdivisionPatterns,
    swing: f64,
    groove_jitter: f64,
    latency_offset_secs: f64,
    silent_bars: SilentBars,
    phrase: Phrase,
    count_in_bars: u32,
    polyrhythm: Polyrhythm,
    sound: Sound,
    secondary_sound: Sound,
    volume: f32,
    muted: bool,
    quiet_mode: bool,
}

impl Default for TransportRecord {
    fn default() -> Self {
        let t = Transport::default();
        Self {
            tempo: t.tempo,
            meter: t.meter,
            accents: t.accents,
            subdivision: t.subdivision,
            subdivision_patterns: t.subdivision_patterns,
            swing: t.swing,
            groove_jitter: t.groove_jitter,
            latency_offset_secs: t.latency_offset_secs,
            silent_bars: t.silent_bars,
            phrase: t.phrase,
            count_in_bars: t.count_in_bars,
            polyrhythm: t.polyrhythm,
            sound: t.sound,
            secondary_sound: t.secondary_sound,
            volume: t.volume,
            muted: t.muted,
            quiet_mode: t.quiet_mode,
        }
    }
}

impl From<TransportRecord> for Transport {
    fn from(record: TransportRecord) -> Self {
        let mut t = Transport::default();
        t.set_tempo(record.tempo);
        t.set_meter(record.meter);
        t.set_accents(&record.accents);
        t.set_subdivision_kind(record.subdivision);
        for kind in [
            SubdivisionKind::Eighth,
            SubdivisionKind::Triplet,
            SubdivisionKind::Sixteenth,
            SubdivisionKind::Quintuplet,
        ] {
            t.set_subdivision_pattern(kind, record.subdivision_patterns.get(kind));
        }
        t.set_swing(record.swing);
        t.set_groove_jitter(record.groove_jitter);
        t.set_latency_offset_ms(record.latency_offset_secs * 1000.0);
        t.set_silent_bars(record.silent_bars);
        t.set_phrase(record.phrase);
        t.set_count_in(record.count_in_bars);
        t.set_polyrhythm(record.polyrhythm);
        t.set_sound(record.sound);
        t.set_secondary_sound(record.secondary_sound);
        t.set_volume(record.volume);
        t.set_mute(record.muted);
        t.set_quiet_mode(record.quiet_mode);
        t
    }
}

/// Pad/truncate to `beats` entries and force the downbeat to `Accent`
fn normalize_accents(accents: &[Accent], beats: u32) -> Vec<Accent> {
    let mut fitted = fit_length(accents, beats.max(1) as usize);
    fitted[0] = Accent::Accent;
    fitted
}

impl Transport {
    // ========================================================================
    // SETTERS
    // ========================================================================

    pub fn set_tempo(&mut self, tempo: u32) {
        self.tempo = tempo.clamp(MIN_TEMPO, MAX_TEMPO);
    }

    /// Change the meter, reflowing the accent array and restarting the beat count
    pub fn set_meter(&mut self, meter: Meter) {
        let meter = Meter::new(meter.beats_per_bar, meter.beat_unit);
        self.accents = normalize_accents(&self.accents, meter.beats_per_bar);
        self.meter = meter;
        self.meter_epoch += 1;
    }

    pub fn set_accents(&mut self, accents: &[Accent]) {
        self.accents = normalize_accents(accents, self.meter.beats_per_bar);
    }

    pub fn set_subdivision_kind(&mut self, kind: SubdivisionKind) {
        self.subdivision = kind;
    }

    pub fn set_subdivision_pattern(&mut self, kind: SubdivisionKind, pattern: &[Accent]) {
        self.subdivision_patterns.set(kind, pattern);
    }

    pub fn set_swing(&mut self, swing: f64) {
        self.swing = clamp_unit(swing);
    }

    pub fn set_groove_jitter(&mut self, jitter: f64) {
        self.groove_jitter = clamp_unit(jitter);
    }

    /// Latency offset in milliseconds, clamped to ±200 ms
    pub fn set_latency_offset_ms(&mut self, ms: f64) {
        let ms = if ms.is_finite() { ms } else { 0.0 };
        self.latency_offset_secs = (ms / 1000.0).clamp(-MAX_LATENCY_SECS, MAX_LATENCY_SECS);
    }

    pub fn set_silent_bars(&mut self, silent_bars: SilentBars) {
        self.silent_bars = SilentBars::new(silent_bars.enabled, silent_bars.every);
    }

    pub fn set_phrase(&mut self, phrase: Phrase) {
        self.phrase = Phrase::new(phrase.enabled, phrase.length, phrase.target);
    }

    pub fn set_count_in(&mut self, bars: u32) {
        self.count_in_bars = bars.min(MAX_COUNT_IN_BARS);
    }

    pub fn set_polyrhythm(&mut self, polyrhythm: Polyrhythm) {
        self.polyrhythm = polyrhythm.sanitized();
        self.poly_epoch += 1;
    }

    pub fn set_sound(&mut self, sound: Sound) {
        self.sound = sound;
    }

    pub fn set_secondary_sound(&mut self, sound: Sound) {
        self.secondary_sound = sound;
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.volume = if volume.is_finite() {
            volume.clamp(0.0, 1.0)
        } else {
            0.0
        };
    }

    pub fn set_mute(&mut self, muted: bool) {
        self.muted = muted;
    }

    pub fn set_quiet_mode(&mut self, quiet: bool) {
        self.quiet_mode = quiet;
    }

    // ========================================================================
    // GETTERS
    // ========================================================================

    pub fn tempo(&self) -> u32 {
        self.tempo
    }

    pub fn meter(&self) -> Meter {
        self.meter
    }

    pub fn accents(&self) -> &[Accent] {
        &self.accents
    }

    pub fn subdivision(&self) -> SubdivisionKind {
        self.subdivision
    }

    /// Pattern of the active subdivision kind
    pub fn subdivision_pattern(&self) -> &[Accent] {
        self.subdivision_patterns.get(self.subdivision)
    }

    pub fn subdivision_patterns(&self) -> &SubdivisionPatterns {
        &self.subdivision_patterns
    }

    pub fn swing(&self) -> f64 {
        self.swing
    }

    pub fn groove_jitter(&self) -> f64 {
        self.groove_jitter
    }

    pub fn latency_offset_secs(&self) -> f64 {
        self.latency_offset_secs
    }

    pub fn silent_bars(&self) -> SilentBars {
        self.silent_bars
    }

    pub fn phrase(&self) -> Phrase {
        self.phrase
    }

    pub fn count_in_bars(&self) -> u32 {
        self.count_in_bars
    }

    pub fn polyrhythm(&self) -> Polyrhythm {
        self.polyrhythm
    }

    pub fn sound(&self) -> Sound {
        self.sound
    }

    pub fn secondary_sound(&self) -> Sound {
        self.secondary_sound
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// Master gain actually applied to output (0 when muted or quiet)
    pub fn output_gain(&self) -> f32 {
        if self.audio_enabled() {
            self.volume
        } else {
            0.0
        }
    }

    /// Whether anything may be heard at all
    pub fn audio_enabled(&self) -> bool {
        !self.muted && !self.quiet_mode
    }

    pub fn beat_duration(&self) -> f64 {
        beat_duration(self.tempo, self.meter.beat_unit)
    }

    pub fn bar_duration(&self) -> f64 {
        self.beat_duration() * self.meter.beats_per_bar as f64
    }

    pub(crate) fn meter_epoch(&self) -> u64 {
        self.meter_epoch
    }

    pub(crate) fn poly_epoch(&self) -> u64 {
        self.poly_epoch
    }
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}
