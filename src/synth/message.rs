#[cfg(feature = "rtrb")]
use rtrb::Consumer;

use crate::synth::params::SynthParameters;

/// Normalized inbound event, as produced by MIDI or UI collaborators.
#[derive(Debug, Clone, PartialEq)]
pub enum SynthMessage {
    NoteOn { note: u8, velocity: u8 },
    NoteOff { note: u8 },
    /// Bend in [-1, 1].
    PitchBend { value: f32 },
    ControlChange { controller: u8, value: u8 },
    UpdateParams(Box<SynthParameters>),
    AllNotesOff,
}

pub trait MessageReceiver {
    fn pop(&mut self) -> Option<SynthMessage>;
}

#[cfg(feature = "rtrb")]
impl MessageReceiver for Consumer<SynthMessage> {
    fn pop(&mut self) -> Option<SynthMessage> {
        Consumer::pop(self).ok()
    }
}

impl MessageReceiver for std::collections::VecDeque<SynthMessage> {
    fn pop(&mut self) -> Option<SynthMessage> {
        self.pop_front()
    }
}
