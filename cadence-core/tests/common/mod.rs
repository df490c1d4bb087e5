#![allow(dead_code)]
//! Test harness utilities for cadence-core integration tests.

use cadence_core::ports::StaticPortDirectory;
use cadence_core::rules::RuleSet;
use cadence_core::{CycleOutput, Engine, EngineSettings};
use cadence_types::{InboundEvent, MidiMessage, TransportKind};

pub const KEYS: &str = "Arturia KeyStep 37";
pub const CLOCK: &str = "Arturia Beatstep Pro";
pub const SYNTH: &str = "Korg Minilogue";

/// Aliases shared by every test document.
pub fn aliases() -> serde_json::Value {
    serde_json::json!({ "keys": "KeyStep", "clock": "Beatstep", "synth": "Minilogue" })
}

/// Build an engine over `doc` with one output and two inputs open.
pub fn engine(mut doc: serde_json::Value) -> Engine {
    if let Some(map) = doc.as_object_mut() {
        map.entry("device_alias").or_insert_with(aliases);
    }
    let rules = RuleSet::from_json(&doc).unwrap();
    let ports = StaticPortDirectory::new(
        vec![SYNTH.to_string()],
        vec![KEYS.to_string(), CLOCK.to_string()],
    );
    Engine::new(rules, Box::new(ports), EngineSettings::default())
}

pub fn note_on(channel: u8, note: u8, velocity: u8) -> InboundEvent {
    InboundEvent::Midi {
        port: KEYS.to_string(),
        message: MidiMessage::NoteOn { channel, note, velocity },
    }
}

pub fn note_off(channel: u8, note: u8) -> InboundEvent {
    InboundEvent::Midi {
        port: KEYS.to_string(),
        message: MidiMessage::NoteOff { channel, note, velocity: 0 },
    }
}

pub fn control(channel: u8, control: u8, value: u8) -> InboundEvent {
    InboundEvent::Midi {
        port: KEYS.to_string(),
        message: MidiMessage::ControlChange { channel, control, value },
    }
}

pub fn clock() -> InboundEvent {
    InboundEvent::Clock { port: CLOCK.to_string() }
}

pub fn transport(kind: TransportKind) -> InboundEvent {
    InboundEvent::Transport {
        port: CLOCK.to_string(),
        kind,
    }
}

/// Run one cycle per clock tick and collect everything emitted.
pub fn run_clocks(engine: &mut Engine, ticks: usize) -> Vec<CycleOutput> {
    (0..ticks).map(|_| engine.run_cycle(vec![clock()])).collect()
}

/// `(channel, note)` of every sounding note-on.
pub fn note_ons(out: &CycleOutput) -> Vec<(u8, u8)> {
    out.messages
        .iter()
        .filter_map(|sent| match sent.message {
            MidiMessage::NoteOn { channel, note, velocity } if velocity > 0 => Some((channel, note)),
            _ => None,
        })
        .collect()
}

/// `(channel, note)` of every note-off.
pub fn note_offs(out: &CycleOutput) -> Vec<(u8, u8)> {
    out.messages
        .iter()
        .filter_map(|sent| match sent.message {
            MidiMessage::NoteOff { channel, note, .. } => Some((channel, note)),
            _ => None,
        })
        .collect()
}
