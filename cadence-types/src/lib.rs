//! Plain data shared by the cadence engine and its front ends.

pub mod midi;
pub mod music;
pub mod value;

pub use midi::{
    parse_midi_message, EventType, InboundEvent, MidiMessage, OutgoingMessage, PortHandle, RawMidi,
    TransportKind,
};
pub use music::{ArpDirection, ArpMode, MusicLibrary, OctaveMode, ScaleTable};
pub use value::{ConfigValue, ScaleDirective, ScaleNotesDirective, Value};
