//! Metronome - click voices and beat arithmetic
//!
//! This module describes *what* a click sounds like and *how long* a beat is.
//! Key features:
//! - Named sound profiles (accent / normal / subdivision pitches + waveform)
//! - `Voice` waveform parameters handed to a [`SoundSink`](super::clock::SoundSink)
//! - Beat/bar duration math shared by the scheduler and the classifier
//! - Deterministic tone-burst rendering for sample-accurate playback

use serde::{Deserialize, Serialize};

/// Duration of a main-beat click in seconds
pub const MAIN_CLICK_SECS: f64 = 0.07;

/// Duration of a subdivision click in seconds
pub const SUBDIVISION_CLICK_SECS: f64 = 0.04;

/// Level the exponential envelope decays to by the end of a click
const ENVELOPE_FLOOR: f32 = 0.001;

/// Oscillator shape of a click
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Waveform {
    Sine,
    Square,
    Triangle,
    Sawtooth,
}

impl Waveform {
    /// Sample the waveform at `phase` (in cycles, any real number)
    #[inline]
    pub fn sample(self, phase: f32) -> f32 {
        let frac = phase - phase.floor();
        match self {
            Waveform::Sine => (2.0 * std::f32::consts::PI * frac).sin(),
            Waveform::Square => {
                if frac < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            Waveform::Triangle => 1.0 - 4.0 * (frac - 0.5).abs(),
            Waveform::Sawtooth => 2.0 * frac - 1.0,
        }
    }
}

/// Named click sounds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sound {
    Woodblock,
    Beep,
    Click,
    Clave,
    Cowbell,
    /// Reserved for phrase markers
    Ping,
}

impl Sound {
    pub const ALL: [Sound; 6] = [
        Sound::Woodblock,
        Sound::Beep,
        Sound::Click,
        Sound::Clave,
        Sound::Cowbell,
        Sound::Ping,
    ];

    /// Look a sound up by name, falling back to `default` for unknown names
    pub fn parse_or(name: &str, default: Sound) -> Sound {
        Sound::ALL
            .iter()
            .copied()
            .find(|s| s.name().eq_ignore_ascii_case(name.trim()))
            .unwrap_or(default)
    }

    pub fn name(self) -> &'static str {
        match self {
            Sound::Woodblock => "woodblock",
            Sound::Beep => "beep",
            Sound::Click => "click",
            Sound::Clave => "clave",
            Sound::Cowbell => "cowbell",
            Sound::Ping => "ping",
        }
    }

    pub fn profile(self) -> SoundProfile {
        match self {
            Sound::Woodblock => SoundProfile::new(1900.0, 1500.0, 1200.0, Waveform::Square),
            Sound::Beep => SoundProfile::new(1200.0, 880.0, 660.0, Waveform::Sine),
            Sound::Click => SoundProfile::new(2600.0, 2200.0, 1800.0, Waveform::Triangle),
            Sound::Clave => SoundProfile::new(1800.0, 1400.0, 1000.0, Waveform::Sawtooth),
            Sound::Cowbell => SoundProfile::new(1200.0, 950.0, 750.0, Waveform::Square),
            Sound::Ping => SoundProfile::new(2300.0, 2000.0, 1800.0, Waveform::Triangle),
        }
    }
}

/// Pitches and waveform of a sound
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SoundProfile {
    pub accent_hz: f32,
    pub normal_hz: f32,
    pub subdivision_hz: f32,
    pub waveform: Waveform,
}

impl SoundProfile {
    const fn new(accent_hz: f32, normal_hz: f32, subdivision_hz: f32, waveform: Waveform) -> Self {
        Self {
            accent_hz,
            normal_hz,
            subdivision_hz,
            waveform,
        }
    }
}

/// Role of a click within the bar, selecting pitch, base gain and length
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClickKind {
    Accent,
    Normal,
    Subdivision,
}

impl ClickKind {
    fn base_gain(self) -> f32 {
        match self {
            ClickKind::Accent => 1.0,
            ClickKind::Normal => 0.6,
            ClickKind::Subdivision => 0.3,
        }
    }

    pub fn duration_secs(self) -> f64 {
        match self {
            ClickKind::Subdivision => SUBDIVISION_CLICK_SECS,
            _ => MAIN_CLICK_SECS,
        }
    }
}

/// Waveform parameters of one scheduled sound event
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Voice {
    pub frequency_hz: f32,
    pub waveform: Waveform,
    /// Peak gain before master volume
    pub gain: f32,
}

impl Voice {
    /// Build the voice for `kind` using `sound`'s profile, scaled by `gain_scale`
    pub fn for_click(sound: Sound, kind: ClickKind, gain_scale: f32) -> Self {
        let profile = sound.profile();
        let frequency_hz = match kind {
            ClickKind::Accent => profile.accent_hz,
            ClickKind::Normal => profile.normal_hz,
            ClickKind::Subdivision => profile.subdivision_hz,
        };
        Self {
            frequency_hz,
            waveform: profile.waveform,
            gain: kind.base_gain() * gain_scale,
        }
    }

    /// Value of this voice `offset` samples into a click of `total` samples
    #[inline]
    pub fn sample_at(&self, offset: usize, total: usize, sample_rate: u32) -> f32 {
        if offset >= total {
            return 0.0;
        }
        let t = offset as f32 / sample_rate as f32;
        // Exponential decay from `gain` to ENVELOPE_FLOOR over the click
        let progress = offset as f32 / total as f32;
        let envelope = ENVELOPE_FLOOR.powf(progress);
        self.waveform.sample(self.frequency_hz * t) * self.gain * envelope
    }
}

/// Duration of one beat in seconds: `60 / tempo * (4 / beat_unit)`
#[inline]
pub fn beat_duration(tempo: u32, beat_unit: u32) -> f64 {
    (60.0 / tempo.max(1) as f64) * (4.0 / beat_unit.max(1) as f64)
}

/// Converts a duration in seconds to a whole number of samples
#[inline]
pub fn secs_to_samples(secs: f64, sample_rate: u32) -> u64 {
    (secs.max(0.0) * sample_rate as f64).round() as u64
}

/// Renders a complete click into a new buffer.
///
/// Used by offline tooling; the realtime output path evaluates
/// [`Voice::sample_at`] directly so it never allocates.
pub fn render_voice(voice: &Voice, duration_secs: f64, sample_rate: u32) -> Vec<f32> {
    let total = secs_to_samples(duration_secs, sample_rate) as usize;
    (0..total)
        .map(|i| voice.sample_at(i, total, sample_rate))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_beat_duration_formula() {
        assert!((beat_duration(120, 4) - 0.5).abs() < 1e-12);
        assert!((beat_duration(60, 4) - 1.0).abs() < 1e-12);
        assert!((beat_duration(120, 8) - 0.25).abs() < 1e-12);
        assert!((beat_duration(90, 2) - 4.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_beat_duration_across_tempo_range() {
        for tempo in 1..=600u32 {
            for unit in [1u32, 2, 4, 8, 16] {
                let expected = 60.0 / tempo as f64 * (4.0 / unit as f64);
                assert!(
                    (beat_duration(tempo, unit) - expected).abs() < 1e-9,
                    "tempo {} unit {}",
                    tempo,
                    unit
                );
            }
        }
    }

    #[test]
    fn test_render_voice_length_and_range() {
        let voice = Voice::for_click(Sound::Woodblock, ClickKind::Accent, 1.0);
        for &sr in &[44100u32, 48000, 96000] {
            let samples = render_voice(&voice, MAIN_CLICK_SECS, sr);
            assert_eq!(samples.len(), (sr as f64 * MAIN_CLICK_SECS).round() as usize);
            for (i, &s) in samples.iter().enumerate() {
                assert!(
                    (-1.0..=1.0).contains(&s),
                    "sample {} at index {} out of range",
                    s,
                    i
                );
            }
        }
    }

    #[test]
    fn test_render_voice_decays() {
        let voice = Voice::for_click(Sound::Beep, ClickKind::Normal, 1.0);
        let samples = render_voice(&voice, MAIN_CLICK_SECS, 48000);
        let head: f32 = samples[..200].iter().map(|s| s.abs()).fold(0.0, f32::max);
        let tail: f32 = samples[samples.len() - 200..]
            .iter()
            .map(|s| s.abs())
            .fold(0.0, f32::max);
        assert!(tail < head * 0.05, "head {} tail {}", head, tail);
    }

    #[test]
    fn test_click_kind_gain_and_pitch() {
        let accent = Voice::for_click(Sound::Woodblock, ClickKind::Accent, 1.0);
        let normal = Voice::for_click(Sound::Woodblock, ClickKind::Normal, 1.0);
        let sub = Voice::for_click(Sound::Woodblock, ClickKind::Subdivision, 0.5);

        assert_eq!(accent.frequency_hz, 1900.0);
        assert_eq!(normal.frequency_hz, 1500.0);
        assert_eq!(sub.frequency_hz, 1200.0);
        assert_eq!(accent.gain, 1.0);
        assert_eq!(normal.gain, 0.6);
        assert!((sub.gain - 0.15).abs() < 1e-6);
        assert_eq!(ClickKind::Subdivision.duration_secs(), SUBDIVISION_CLICK_SECS);
    }

    #[test]
    fn test_sound_lookup_falls_back() {
        assert_eq!(Sound::parse_or("Cowbell", Sound::Woodblock), Sound::Cowbell);
        assert_eq!(Sound::parse_or("kazoo", Sound::Woodblock), Sound::Woodblock);
        assert_eq!(Sound::parse_or("kazoo", Sound::Beep), Sound::Beep);
    }
}
