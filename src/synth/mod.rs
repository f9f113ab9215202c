// Purpose: Voice lifecycle, modulation routing, and the engine facade
// This layer sits above the backend and turns note events into automation

pub mod engine;
pub mod message;
pub mod modulation;
pub mod params;
pub mod voice;

pub use engine::{EngineConfig, SynthEngine};
pub use message::{MessageReceiver, SynthMessage};
pub use params::SynthParameters;
