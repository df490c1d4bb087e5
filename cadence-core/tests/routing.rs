mod common;

use serde_json::json;

use cadence_types::{MidiMessage, PortHandle, Value};

use common::{control, engine, note_off, note_on, note_ons};

#[test]
fn test_note_pass_through() {
    let mut engine = engine(json!({
        "midi_filter": [
            { "device_in": "keys", "event_in": "note", "output": [{ "device_out": "synth" }] }
        ]
    }));

    let out = engine.run_cycle(vec![note_on(0, 60, 100)]);
    assert_eq!(out.messages.len(), 1);
    let sent = &out.messages[0];
    assert_eq!(sent.message, MidiMessage::NoteOn { channel: 0, note: 60, velocity: 100 });
    assert_eq!(sent.port, PortHandle(0));
    assert_eq!(sent.alias, "synth");

    let out = engine.run_cycle(vec![note_off(0, 60)]);
    assert_eq!(out.messages.len(), 1);
    assert!(matches!(out.messages[0].message, MidiMessage::NoteOff { note: 60, .. }));
}

#[test]
fn test_unmatched_input_is_dropped() {
    let mut engine = engine(json!({
        "midi_filter": [
            { "device_in": "keys", "event_in": "note", "ch_in": 2, "output": [{ "device_out": "synth" }] }
        ]
    }));
    assert!(engine.run_cycle(vec![note_on(0, 60, 100)]).messages.is_empty());
    assert_eq!(note_ons(&engine.run_cycle(vec![note_on(1, 60, 100)])), vec![(1, 60)]);
}

#[test]
fn test_shortcut_output_with_chord() {
    let mut engine = engine(json!({
        "midi_filter": [
            {
                "device_in": "keys",
                "event_in": "note_on",
                "output": [{ "note([value_1, value_1 + 4, value_1 + 7])": "value_2", "device_out": "synth", "channel_out": 5 }]
            }
        ]
    }));
    let out = engine.run_cycle(vec![note_on(0, 60, 90)]);
    assert_eq!(note_ons(&out), vec![(4, 60), (4, 64), (4, 67)]);
}

#[test]
fn test_variable_assignment_transposes_later_notes() {
    let mut engine = engine(json!({
        "user_variables": { "global_transpose": 0 },
        "midi_filter": [
            { "device_in": "keys", "event_in": "cc", "value_1_in": 20, "output": [{ "global_transpose": "value_2_in - 64" }] },
            { "device_in": "keys", "event_in": "note", "output": [{ "device_out": "synth" }] }
        ]
    }));

    let out = engine.run_cycle(vec![control(0, 20, 76)]);
    assert!(out.messages.is_empty());
    assert_eq!(engine.state().vars.global_transpose(), 12);
    assert_eq!(note_ons(&engine.run_cycle(vec![note_on(0, 60, 100)])), vec![(0, 72)]);
}

fn versioned_rules() -> serde_json::Value {
    json!({
        "midi_filter": [
            { "device_in": "keys", "event_in": "pc", "set_version": "cycle" },
            { "version": 0, "device_in": "keys", "event_in": "note", "channel_out": 1, "output": [{ "device_out": "synth" }] },
            { "version": [1, 3], "device_in": "keys", "event_in": "note", "channel_out": 2, "output": [{ "device_out": "synth" }] },
            { "version": 3, "output": [{ "cc(7)": 100, "device_out": "synth" }] }
        ]
    })
}

#[test]
fn test_version_cycling_switches_filters() {
    let mut engine = engine(versioned_rules());
    assert_eq!(engine.state().available_versions, vec![0, 1, 3]);
    assert_eq!(note_ons(&engine.run_cycle(vec![note_on(0, 60, 100)])), vec![(0, 60)]);

    let program = cadence_types::InboundEvent::Midi {
        port: common::KEYS.to_string(),
        message: MidiMessage::ProgramChange { channel: 0, program: 1 },
    };
    let out = engine.run_cycle(vec![program]);
    assert_eq!(out.version_change, Some(1));
    assert_eq!(engine.version(), 1);
    assert_eq!(note_ons(&engine.run_cycle(vec![note_on(0, 60, 100)])), vec![(1, 60)]);
}

#[test]
fn test_selecting_a_version_runs_its_activation_rules() {
    let mut engine = engine(versioned_rules());

    let out = engine.select_version(&Value::Int(3));
    assert_eq!(out.version_change, Some(3));
    assert_eq!(
        out.messages.iter().map(|m| m.message).collect::<Vec<_>>(),
        vec![MidiMessage::ControlChange { channel: 0, control: 7, value: 100 }]
    );

    let out = engine.select_version(&Value::Int(2));
    assert_eq!(out.version_change, None);
    assert_eq!(engine.version(), 3);

    let out = engine.select_version(&Value::from("cycle_next"));
    assert_eq!(out.version_change, Some(0));
}

#[test]
fn test_osc_filter_drives_midi_and_osc() {
    let mut engine = engine(json!({
        "osc_configuration": {
            "send": { "mixer": { "ip": "127.0.0.1", "port": 9001, "address": "/mix" } }
        },
        "osc_filter": [
            {
                "address": "/note",
                "output": [
                    { "note(args[0])": 100, "device_out": "synth", "channel_out": 1 },
                    { "send_osc": { "target": "mixer", "args": [5, "args[1]"] } }
                ]
            }
        ]
    }));

    let out = engine.run_cycle(vec![cadence_types::InboundEvent::Osc {
        address: "/note".into(),
        args: vec![Value::Int(62), Value::Int(3)],
    }]);
    assert_eq!(note_ons(&out), vec![(0, 62)]);
    assert_eq!(out.osc.len(), 1);
    assert_eq!(out.osc[0].address, "/mix");
    assert_eq!(out.osc[0].port, 9001);
    assert_eq!(out.osc[0].args, vec![Value::Int(5), Value::Int(3)]);

    let out = engine.run_cycle(vec![cadence_types::InboundEvent::Osc {
        address: "/other".into(),
        args: vec![],
    }]);
    assert!(out.messages.is_empty() && out.osc.is_empty());
}
