//! Parameter snapshot consumed by the engine.
//!
//! A `SynthParameters` value is never edited in place once handed to the
//! engine. Every update replaces the whole snapshot, and derivations read the
//! snapshot by reference at the moment they run.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::dsp::{filter::FilterType, noise::NoiseColor, oscillator::Waveform};

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct SynthParameters {
    pub master_volume: f32,
    /// Portamento time in seconds. Accepted and stored, not applied.
    pub glide_time: f32,
    pub oscillators: Vec<OscillatorParams>,
    pub noise: NoiseParams,
    pub filter: FilterParams,
    pub amp_envelope: EnvelopeParams,
    pub filter_envelope: EnvelopeParams,
    pub lfo: LfoParams,
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OscillatorParams {
    pub waveform: Waveform,
    /// Octave offset in [-2, 2].
    pub octave: i8,
    pub detune_cents: f32,
    pub level: f32,
    pub enabled: bool,
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoiseParams {
    pub color: NoiseColor,
    pub level: f32,
    pub enabled: bool,
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterParams {
    pub filter_type: FilterType,
    pub cutoff_hz: f32,
    /// Resonance (Q).
    pub resonance: f32,
    /// Signed envelope depth in [-1, 1].
    pub envelope_amount: f32,
    /// Keyboard tracking in [0, 1].
    pub keyboard_tracking: f32,
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvelopeParams {
    pub attack: f32,
    pub decay: f32,
    pub sustain: f32,
    pub release: f32,
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LfoParams {
    pub waveform: Waveform,
    pub rate_hz: f32,
    pub pitch_depth: f32,
    pub filter_depth: f32,
    pub enabled: bool,
}

impl LfoParams {
    /// True when switching from `self` to `next` needs a new LFO sub-graph.
    ///
    /// A depth crossing zero counts, since attachment skips zero-depth taps.
    pub fn needs_rebuild(&self, next: &LfoParams) -> bool {
        self.enabled != next.enabled
            || self.waveform != next.waveform
            || self.rate_hz != next.rate_hz
            || (self.pitch_depth > 0.0) != (next.pitch_depth > 0.0)
            || (self.filter_depth > 0.0) != (next.filter_depth > 0.0)
    }
}

impl Default for SynthParameters {
    fn default() -> Self {
        Self {
            master_volume: 0.7,
            glide_time: 0.0,
            oscillators: vec![
                OscillatorParams {
                    waveform: Waveform::Sawtooth,
                    ..OscillatorParams::default()
                },
                OscillatorParams {
                    waveform: Waveform::Square,
                    detune_cents: 7.0,
                    level: 0.5,
                    enabled: false,
                    ..OscillatorParams::default()
                },
            ],
            noise: NoiseParams::default(),
            filter: FilterParams::default(),
            amp_envelope: EnvelopeParams::default(),
            filter_envelope: EnvelopeParams {
                attack: 0.05,
                decay: 0.3,
                sustain: 0.4,
                release: 0.4,
            },
            lfo: LfoParams::default(),
        }
    }
}

impl Default for OscillatorParams {
    fn default() -> Self {
        Self {
            waveform: Waveform::Sawtooth,
            octave: 0,
            detune_cents: 0.0,
            level: 0.8,
            enabled: true,
        }
    }
}

impl Default for NoiseParams {
    fn default() -> Self {
        Self {
            color: NoiseColor::White,
            level: 0.0,
            enabled: false,
        }
    }
}

impl Default for FilterParams {
    fn default() -> Self {
        Self {
            filter_type: FilterType::LowPass,
            cutoff_hz: 2_000.0,
            resonance: 1.0,
            envelope_amount: 0.3,
            keyboard_tracking: 0.5,
        }
    }
}

impl Default for EnvelopeParams {
    fn default() -> Self {
        Self {
            attack: 0.01,
            decay: 0.1,
            sustain: 0.7,
            release: 0.3,
        }
    }
}

impl Default for LfoParams {
    fn default() -> Self {
        Self {
            waveform: Waveform::Sine,
            rate_hz: 5.0,
            pitch_depth: 0.0,
            filter_depth: 0.0,
            enabled: false,
        }
    }
}

fn unit(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

fn non_negative(value: f32) -> f32 {
    if !value.is_finite() {
        0.0
    } else {
        value.max(0.0)
    }
}

impl SynthParameters {
    /// Copy with every field forced into its documented range.
    pub fn sanitized(&self) -> Self {
        let mut params = self.clone();

        params.master_volume = unit(params.master_volume);
        params.glide_time = non_negative(params.glide_time);

        for osc in &mut params.oscillators {
            osc.octave = osc.octave.clamp(-2, 2);
            osc.level = unit(osc.level);
            if !osc.detune_cents.is_finite() {
                osc.detune_cents = 0.0;
            }
        }

        params.noise.level = unit(params.noise.level);

        let filter = &mut params.filter;
        filter.cutoff_hz = non_negative(filter.cutoff_hz);
        filter.resonance = non_negative(filter.resonance);
        filter.envelope_amount = if filter.envelope_amount.is_nan() {
            0.0
        } else {
            filter.envelope_amount.clamp(-1.0, 1.0)
        };
        filter.keyboard_tracking = unit(filter.keyboard_tracking);

        for env in [&mut params.amp_envelope, &mut params.filter_envelope] {
            env.attack = non_negative(env.attack);
            env.decay = non_negative(env.decay);
            env.sustain = unit(env.sustain);
            env.release = non_negative(env.release);
        }

        let lfo = &mut params.lfo;
        lfo.rate_hz = non_negative(lfo.rate_hz);
        lfo.pitch_depth = unit(lfo.pitch_depth);
        lfo.filter_depth = unit(lfo.filter_depth);

        params
    }
}
