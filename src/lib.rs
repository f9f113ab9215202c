pub mod backend; // Automation-capable audio graph abstraction
pub mod dsp;
pub mod engine; // Voice allocation and timer bookkeeping
pub mod io;
pub mod synth; // Voice lifecycle, modulation and the engine facade

pub use backend::{offline::OfflineBackend, AudioBackend, BackendError, BackendResult};
pub use synth::{EngineConfig, SynthEngine, SynthMessage, SynthParameters};

/// Shortest ramp the envelope scheduler will emit, in seconds.
pub(crate) const MIN_RAMP_TIME: f64 = 0.001;
