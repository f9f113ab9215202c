#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/*
| type              | passes          | rejects      |
| ----------------- | --------------- | ------------ |
| low-pass          | below cutoff    | above cutoff |
| high-pass         | above cutoff    | below cutoff |
| band-pass         | around cutoff   | outside      |
| notch / band-stop | outside         | around cutoff|

The backend owns the coefficients. The engine only chooses the response,
the resonance and the cutoff automation, so all that lives here is the type
and the range every scheduled cutoff is clamped into.
*/

/// Lowest cutoff the engine will ever schedule.
pub const MIN_CUTOFF_HZ: f32 = 20.0;

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterType {
    #[default]
    LowPass,
    HighPass,
    BandPass,
    Notch,
}

/// Clamp a cutoff into `[20 Hz, Nyquist]`.
#[inline]
pub fn clamp_cutoff(cutoff_hz: f32, sample_rate: f32) -> f32 {
    let nyquist = (sample_rate * 0.5).max(MIN_CUTOFF_HZ);
    if cutoff_hz.is_nan() {
        return MIN_CUTOFF_HZ;
    }
    cutoff_hz.clamp(MIN_CUTOFF_HZ, nyquist)
}
