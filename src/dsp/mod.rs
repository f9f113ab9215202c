//! Control-rate building blocks shared by the voices.
//!
//! Nothing in here renders audio. These helpers compute frequencies,
//! cutoffs, noise tables and envelope automation that the backend then
//! plays back sample-accurately.

/// ADSR scheduling on backend parameters.
pub mod envelope;
/// Filter responses and cutoff clamping.
pub mod filter;
/// Seeded white and pink noise tables.
pub mod noise;
/// Waveforms and equal-temperament tuning.
pub mod oscillator;

pub use filter::FilterType;
pub use noise::NoiseColor;
pub use oscillator::Waveform;
