mod common;

use serde_json::json;

use cadence_core::sequencer::PlayState;
use cadence_types::TransportKind;

use common::{clock, control, engine, note_off, note_offs, note_on, note_ons, run_clocks, transport};

fn sequencer_rules(extra: serde_json::Value) -> serde_json::Value {
    let mut seq = json!({
        "clock_in": "clock",
        "device_out": "synth",
        "step_total": 4,
        "seq_note": [60, 62, 64, 65]
    });
    if let (Some(seq), Some(extra)) = (seq.as_object_mut(), extra.as_object()) {
        seq.extend(extra.clone());
    }
    json!({ "sequencer": [seq] })
}

#[test]
fn test_sequencer_plays_steps_on_clock() {
    let mut engine = engine(sequencer_rules(json!({})));

    let out = engine.run_cycle(vec![transport(TransportKind::Start)]);
    assert_eq!(note_ons(&out), vec![(0, 60)]);

    // 1/16 at 24 ppqn is 6 ticks; length 0.9 releases after 5.
    let outs = run_clocks(&mut engine, 12);
    let ons: Vec<(usize, (u8, u8))> = outs
        .iter()
        .enumerate()
        .flat_map(|(i, out)| note_ons(out).into_iter().map(move |n| (i + 1, n)))
        .collect();
    assert_eq!(ons, vec![(6, (0, 62)), (12, (0, 64))]);
    assert_eq!(note_offs(&outs[4]), vec![(0, 60)]);
    assert_eq!(note_offs(&outs[10]), vec![(0, 62)]);
}

#[test]
fn test_sequencer_wraps_after_last_step() {
    let mut engine = engine(sequencer_rules(json!({ "step_total": 2 })));
    engine.run_cycle(vec![transport(TransportKind::Start)]);
    let outs = run_clocks(&mut engine, 18);
    let ons: Vec<(u8, u8)> = outs.iter().flat_map(note_ons).collect();
    assert_eq!(ons, vec![(0, 62), (0, 60), (0, 62)]);
}

#[test]
fn test_sequencer_catches_up_on_clock_bursts() {
    let mut engine = engine(sequencer_rules(json!({ "step_duration": 1 })));
    let mut ons = note_ons(&engine.run_cycle(vec![transport(TransportKind::Start)]));
    ons.extend(note_ons(&engine.run_cycle(vec![clock()])));
    ons.extend(note_ons(&engine.run_cycle(vec![clock()])));
    ons.extend(note_ons(&engine.run_cycle(vec![clock(), clock()])));
    assert_eq!(ons, vec![(0, 60), (0, 62), (0, 64), (0, 65)]);

    // More than one full cycle in a single batch still plays every step.
    let mut engine = common::engine(sequencer_rules(json!({ "step_duration": 1, "step_total": 2 })));
    engine.run_cycle(vec![transport(TransportKind::Start)]);
    let out = engine.run_cycle(vec![clock(); 5]);
    assert_eq!(note_ons(&out), vec![(0, 62), (0, 60), (0, 62), (0, 60), (0, 62)]);
}

#[test]
fn test_transport_stop_releases_notes() {
    let mut engine = engine(sequencer_rules(json!({})));
    engine.run_cycle(vec![transport(TransportKind::Start)]);
    run_clocks(&mut engine, 2);

    let out = engine.run_cycle(vec![transport(TransportKind::Stop)]);
    assert_eq!(note_offs(&out), vec![(0, 60)]);
    assert_eq!(engine.state().sequencers[0].play, PlayState::Stopped);
    assert!(run_clocks(&mut engine, 12).iter().all(|out| out.messages.is_empty()));
}

#[test]
fn test_swing_delays_odd_steps() {
    let mut engine = engine(sequencer_rules(json!({ "swing": 1.0 })));
    engine.run_cycle(vec![transport(TransportKind::Start)]);
    let outs = run_clocks(&mut engine, 9);
    let first_odd = outs.iter().position(|out| !note_ons(out).is_empty());
    assert_eq!(first_odd, Some(8));
}

#[test]
fn test_quantized_start_waits_for_grid() {
    let mut doc = sequencer_rules(json!({ "quantize_start": "1/4" }));
    doc["midi_filter"] = json!([
        { "device_in": "keys", "event_in": "cc", "value_1_in": 20, "output": [{ "action": "silence", "target_seq_index": 0 }] },
        { "device_in": "keys", "event_in": "cc", "value_1_in": 21, "output": [{ "action": "start_module", "target_seq_index": 0 }] }
    ]);
    let mut engine = engine(doc);

    // Start arms the sequencer; tick 0 is on the grid so it launches at once.
    engine.run_cycle(vec![transport(TransportKind::Start)]);
    assert_eq!(engine.state().sequencers[0].play, PlayState::Playing);
    run_clocks(&mut engine, 10);

    engine.run_cycle(vec![control(0, 20, 127)]);
    assert_eq!(engine.state().sequencers[0].play, PlayState::Stopped);
    engine.run_cycle(vec![control(0, 21, 127)]);
    assert_eq!(engine.state().sequencers[0].play, PlayState::Armed);

    // Clock ticks 11..=24: launched on tick 24, first step plays on tick 25.
    let outs = run_clocks(&mut engine, 14);
    assert!(outs.iter().all(|out| note_ons(out).is_empty()));
    assert_eq!(engine.state().sequencers[0].play, PlayState::Playing);
    let out = engine.run_cycle(vec![clock()]);
    assert_eq!(note_ons(&out), vec![(0, 60)]);
}

fn arp_rules() -> serde_json::Value {
    json!({
        "arpeggiator": [{ "arp_id": 1, "clock_in": "clock", "device_out": "synth" }],
        "midi_filter": [
            { "device_in": "keys", "event_in": "note", "output": [{ "arp_id": 1 }] }
        ]
    })
}

#[test]
fn test_arpeggiator_steps_through_held_notes() {
    let mut engine = engine(arp_rules());
    engine.run_cycle(vec![transport(TransportKind::Start)]);
    let out = engine.run_cycle(vec![note_on(0, 64, 100), note_on(0, 60, 100)]);
    assert!(out.messages.is_empty());

    let outs = run_clocks(&mut engine, 18);
    let ons: Vec<(usize, (u8, u8))> = outs
        .iter()
        .enumerate()
        .flat_map(|(i, out)| note_ons(out).into_iter().map(move |n| (i + 1, n)))
        .collect();
    assert_eq!(ons, vec![(6, (0, 60)), (12, (0, 64)), (18, (0, 60))]);
    assert_eq!(note_offs(&outs[10]), vec![(0, 60)]);
}

#[test]
fn test_arpeggiator_stops_when_notes_release() {
    let mut engine = engine(arp_rules());
    engine.run_cycle(vec![transport(TransportKind::Start)]);
    engine.run_cycle(vec![note_on(0, 60, 100)]);
    run_clocks(&mut engine, 6);

    engine.run_cycle(vec![note_off(0, 60)]);
    assert_eq!(engine.state().arps.instances[&(1, 0)].play, PlayState::Stopped);
    let outs = run_clocks(&mut engine, 12);
    assert!(outs.iter().all(|out| note_ons(out).is_empty()));
}

#[test]
fn test_arpeggiator_waits_for_transport() {
    let mut engine = engine(arp_rules());
    engine.run_cycle(vec![note_on(0, 60, 100)]);
    assert_eq!(engine.state().arps.instances[&(1, 0)].play, PlayState::Stopped);
    assert!(run_clocks(&mut engine, 12).iter().all(|out| note_ons(out).is_empty()));
}

#[test]
fn test_shutdown_flushes_pending_offs() {
    let mut engine = engine(sequencer_rules(json!({})));
    engine.run_cycle(vec![transport(TransportKind::Start)]);
    let offs = engine.shutdown();
    assert_eq!(offs.len(), 1);
    assert!(engine.shutdown().is_empty());
}
