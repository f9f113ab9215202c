use crate::{io::midi::MidiEvent, synth::message::SynthMessage};

/// Convert a raw MIDI event on `channel_filter` into an engine message.
pub fn midi_to_synth(midi: MidiEvent, channel_filter: u8) -> Option<SynthMessage> {
    if midi.channel() != channel_filter {
        return None;
    }

    match midi {
        MidiEvent::NoteOn { key, velocity, .. } if velocity > 0 => Some(SynthMessage::NoteOn {
            note: key,
            velocity,
        }),
        MidiEvent::NoteOn { key, .. } | MidiEvent::NoteOff { key, .. } => {
            Some(SynthMessage::NoteOff { note: key })
        }
        MidiEvent::PitchBend { value, .. } => Some(SynthMessage::PitchBend {
            value: normalize_bend(value),
        }),
        MidiEvent::ControlChange {
            controller, value, ..
        } => Some(SynthMessage::ControlChange { controller, value }),
        MidiEvent::ProgramChange { .. } => None,
    }
}

/// Map a centered 14-bit bend onto [-1, 1], reaching both ends exactly.
pub fn normalize_bend(value: i16) -> f32 {
    let value = value.clamp(-8192, 8191);
    if value >= 0 {
        value as f32 / 8191.0
    } else {
        value as f32 / 8192.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn note_on_with_zero_velocity_is_note_off() {
        let event = MidiEvent::NoteOn {
            channel: 0,
            key: 64,
            velocity: 0,
        };
        assert_eq!(
            midi_to_synth(event, 0),
            Some(SynthMessage::NoteOff { note: 64 })
        );
    }

    #[test]
    fn other_channels_are_ignored() {
        let event = MidiEvent::NoteOn {
            channel: 3,
            key: 64,
            velocity: 90,
        };
        assert_eq!(midi_to_synth(event, 0), None);
        assert!(midi_to_synth(event, 3).is_some());
    }

    #[test]
    fn bend_extremes_map_to_unit_range() {
        assert_eq!(normalize_bend(8191), 1.0);
        assert_eq!(normalize_bend(-8192), -1.0);
        assert_eq!(normalize_bend(0), 0.0);
    }

    #[test]
    fn control_change_passes_through() {
        let event = MidiEvent::ControlChange {
            channel: 0,
            controller: 1,
            value: 42,
        };
        assert_eq!(
            midi_to_synth(event, 0),
            Some(SynthMessage::ControlChange {
                controller: 1,
                value: 42
            })
        );
    }
}
