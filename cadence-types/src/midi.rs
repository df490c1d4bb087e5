use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Channel-voice event kinds the engine matches and emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    NoteOn,
    NoteOff,
    ControlChange,
    ProgramChange,
}

impl EventType {
    pub fn name(&self) -> &'static str {
        match self {
            EventType::NoteOn => "note_on",
            EventType::NoteOff => "note_off",
            EventType::ControlChange => "control_change",
            EventType::ProgramChange => "program_change",
        }
    }

    /// Parses an event name, accepting the `note`/`cc`/`pc` shorthands.
    /// `note` maps to note-on here; condition matching expands it to both note events.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "note" | "note_on" => Some(EventType::NoteOn),
            "note_off" => Some(EventType::NoteOff),
            "cc" | "control_change" => Some(EventType::ControlChange),
            "pc" | "program_change" => Some(EventType::ProgramChange),
            _ => None,
        }
    }

    pub fn is_note(&self) -> bool {
        matches!(self, EventType::NoteOn | EventType::NoteOff)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A channel-voice MIDI message. Channels are 0-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MidiMessage {
    NoteOn { channel: u8, note: u8, velocity: u8 },
    NoteOff { channel: u8, note: u8, velocity: u8 },
    ControlChange { channel: u8, control: u8, value: u8 },
    ProgramChange { channel: u8, program: u8 },
}

impl MidiMessage {
    /// Builds a message from unclamped parts, clamping channel to 0..=15 and data to 0..=127.
    pub fn build(event: EventType, channel: i64, value1: i64, value2: i64) -> Self {
        let channel = channel.clamp(0, 15) as u8;
        let v1 = value1.clamp(0, 127) as u8;
        let v2 = value2.clamp(0, 127) as u8;
        match event {
            EventType::NoteOn => MidiMessage::NoteOn { channel, note: v1, velocity: v2 },
            EventType::NoteOff => MidiMessage::NoteOff { channel, note: v1, velocity: v2 },
            EventType::ControlChange => MidiMessage::ControlChange { channel, control: v1, value: v2 },
            EventType::ProgramChange => MidiMessage::ProgramChange { channel, program: v1 },
        }
    }

    pub fn event_type(&self) -> EventType {
        match self {
            MidiMessage::NoteOn { .. } => EventType::NoteOn,
            MidiMessage::NoteOff { .. } => EventType::NoteOff,
            MidiMessage::ControlChange { .. } => EventType::ControlChange,
            MidiMessage::ProgramChange { .. } => EventType::ProgramChange,
        }
    }

    pub fn channel(&self) -> u8 {
        match *self {
            MidiMessage::NoteOn { channel, .. }
            | MidiMessage::NoteOff { channel, .. }
            | MidiMessage::ControlChange { channel, .. }
            | MidiMessage::ProgramChange { channel, .. } => channel,
        }
    }

    /// Note, controller or program number.
    pub fn value1(&self) -> u8 {
        match *self {
            MidiMessage::NoteOn { note, .. } | MidiMessage::NoteOff { note, .. } => note,
            MidiMessage::ControlChange { control, .. } => control,
            MidiMessage::ProgramChange { program, .. } => program,
        }
    }

    /// Velocity or controller value; program changes carry none.
    pub fn value2(&self) -> u8 {
        match *self {
            MidiMessage::NoteOn { velocity, .. } | MidiMessage::NoteOff { velocity, .. } => velocity,
            MidiMessage::ControlChange { value, .. } => value,
            MidiMessage::ProgramChange { .. } => 0,
        }
    }

    /// Note-on with velocity 0 is treated as note-off.
    pub fn normalized(self) -> Self {
        match self {
            MidiMessage::NoteOn { channel, note, velocity: 0 } => {
                MidiMessage::NoteOff { channel, note, velocity: 0 }
            }
            other => other,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        match *self {
            MidiMessage::NoteOn { channel, note, velocity } => vec![0x90 | channel, note, velocity],
            MidiMessage::NoteOff { channel, note, velocity } => vec![0x80 | channel, note, velocity],
            MidiMessage::ControlChange { channel, control, value } => vec![0xB0 | channel, control, value],
            MidiMessage::ProgramChange { channel, program } => vec![0xC0 | channel, program],
        }
    }
}

impl fmt::Display for MidiMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            MidiMessage::NoteOn { channel, note, velocity } => {
                write!(f, "note_on ch={} note={} vel={}", channel + 1, note, velocity)
            }
            MidiMessage::NoteOff { channel, note, velocity } => {
                write!(f, "note_off ch={} note={} vel={}", channel + 1, note, velocity)
            }
            MidiMessage::ControlChange { channel, control, value } => {
                write!(f, "cc ch={} ctrl={} val={}", channel + 1, control, value)
            }
            MidiMessage::ProgramChange { channel, program } => {
                write!(f, "pc ch={} prog={}", channel + 1, program)
            }
        }
    }
}

/// System real-time transport messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Start,
    Stop,
    Continue,
    Reset,
}

/// A decoded raw MIDI packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawMidi {
    Message(MidiMessage),
    Clock,
    Transport(TransportKind),
}

/// Parse raw bytes from a MIDI input callback.
pub fn parse_midi_message(data: &[u8]) -> Option<RawMidi> {
    let status = *data.first()?;
    match status {
        0xF8 => return Some(RawMidi::Clock),
        0xFA => return Some(RawMidi::Transport(TransportKind::Start)),
        0xFB => return Some(RawMidi::Transport(TransportKind::Continue)),
        0xFC => return Some(RawMidi::Transport(TransportKind::Stop)),
        0xFF => return Some(RawMidi::Transport(TransportKind::Reset)),
        _ => {}
    }

    let channel = status & 0x0F;
    let message = match status & 0xF0 {
        0x80 if data.len() >= 3 => MidiMessage::NoteOff {
            channel,
            note: data[1],
            velocity: data[2],
        },
        0x90 if data.len() >= 3 => MidiMessage::NoteOn {
            channel,
            note: data[1],
            velocity: data[2],
        },
        0xB0 if data.len() >= 3 => MidiMessage::ControlChange {
            channel,
            control: data[1],
            value: data[2],
        },
        0xC0 if data.len() >= 2 => MidiMessage::ProgramChange {
            channel,
            program: data[1],
        },
        _ => return None,
    };
    Some(RawMidi::Message(message))
}

/// Index of an open output destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortHandle(pub usize);

/// One event delivered to the engine in a cycle batch.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Midi { port: String, message: MidiMessage },
    Osc { address: String, args: Vec<Value> },
    Clock { port: String },
    Transport { port: String, kind: TransportKind },
}

impl InboundEvent {
    pub fn from_raw(port: impl Into<String>, raw: RawMidi) -> Self {
        let port = port.into();
        match raw {
            RawMidi::Message(message) => InboundEvent::Midi { port, message },
            RawMidi::Clock => InboundEvent::Clock { port },
            RawMidi::Transport(kind) => InboundEvent::Transport { port, kind },
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, InboundEvent::Clock { .. } | InboundEvent::Transport { .. })
    }
}

/// A message ready to be sent to an output port.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMessage {
    pub message: MidiMessage,
    pub port: PortHandle,
    pub alias: String,
    pub source: String,
    pub event_type: EventType,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_note_on() {
        match parse_midi_message(&[0x91, 60, 100]) {
            Some(RawMidi::Message(MidiMessage::NoteOn { channel, note, velocity })) => {
                assert_eq!(channel, 1);
                assert_eq!(note, 60);
                assert_eq!(velocity, 100);
            }
            other => panic!("Expected NoteOn, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_realtime() {
        assert_eq!(parse_midi_message(&[0xF8]), Some(RawMidi::Clock));
        assert_eq!(
            parse_midi_message(&[0xFA]),
            Some(RawMidi::Transport(TransportKind::Start))
        );
        assert_eq!(
            parse_midi_message(&[0xFC]),
            Some(RawMidi::Transport(TransportKind::Stop))
        );
    }

    #[test]
    fn test_parse_truncated_is_none() {
        assert_eq!(parse_midi_message(&[0x90, 60]), None);
        assert_eq!(parse_midi_message(&[]), None);
    }

    #[test]
    fn test_note_on_velocity_zero_normalizes() {
        let msg = MidiMessage::NoteOn { channel: 0, note: 60, velocity: 0 }.normalized();
        assert_eq!(msg.event_type(), EventType::NoteOff);
    }

    #[test]
    fn test_build_clamps() {
        let msg = MidiMessage::build(EventType::NoteOn, 20, 200, -5);
        assert_eq!(msg, MidiMessage::NoteOn { channel: 15, note: 127, velocity: 0 });
    }

    #[test]
    fn test_to_bytes() {
        let msg = MidiMessage::ControlChange { channel: 2, control: 7, value: 99 };
        assert_eq!(msg.to_bytes(), vec![0xB2, 7, 99]);
    }

    #[test]
    fn test_event_type_shorthand() {
        assert_eq!(EventType::parse("cc"), Some(EventType::ControlChange));
        assert_eq!(EventType::parse("Note"), Some(EventType::NoteOn));
        assert_eq!(EventType::parse("sysex"), None);
    }
}
