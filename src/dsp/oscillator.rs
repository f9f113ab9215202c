#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Periodic waveform a backend generator should produce.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Waveform {
    #[default]
    Sine,
    Square,
    Sawtooth,
    Triangle,
}

/// Equal-temperament frequency of a (possibly out-of-range) MIDI note.
/// A4 = 440 Hz = MIDI note 69
#[inline]
pub fn equal_temperament_freq(note: i32) -> f32 {
    440.0 * 2.0_f32.powf((note - 69) as f32 / 12.0)
}

/// Frequency ratio of a detune in cents.
#[inline]
pub fn cents_to_ratio(cents: f32) -> f32 {
    2.0_f32.powf(cents / 1200.0)
}

/// Unbent frequency for a note played through an oscillator with an octave
/// offset and fine tune.
#[inline]
pub fn tuned_frequency(note: u8, octave: i8, detune_cents: f32) -> f32 {
    equal_temperament_freq(note as i32 + octave as i32 * 12) * cents_to_ratio(detune_cents)
}
