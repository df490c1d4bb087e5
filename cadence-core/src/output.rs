//! Output blocks: what a matched rule or a firing sequencer step does.
//!
//! A block runs in a fixed order and most stages end it early: the `if`
//! guard, `send_osc`, module actions, variable assignments, `set_var` array
//! writes, `arp_id` routing and finally MIDI synthesis.

use cadence_types::{ConfigValue, EventType, MidiMessage, OutgoingMessage, Value};

use crate::arpeggiator::{self, ArpInstance};
use crate::eval::EvalContext;
use crate::osc::OscRequest;
use crate::rules::{ModuleAction, OscSend, OutputBlock, SetVarEntry};
use crate::sequencer::{is_float_array, PlayState};
use crate::state::{CycleOutput, EngineState, Env};

/// Keys that ask a block to build a MIDI message.
const SYNTHESIS_KEYS: &[&str] = &["event_out", "value_1_out", "value_2_out", "channel_out", "device_out"];

/// Where a block runs and the defaults its owner supplies.
#[derive(Debug, Clone, Copy)]
pub struct BlockSite<'a> {
    /// Rule id or module label, used in logs and as the message source.
    pub source: &'a str,
    /// Set when the block belongs to a sequencer step.
    pub sequencer: Option<usize>,
    pub channel_out: Option<&'a ConfigValue>,
    pub device_out: Option<&'a str>,
}

fn synthesizes_midi(block: &OutputBlock) -> bool {
    block.shortcut.is_some() || SYNTHESIS_KEYS.iter().any(|key| block.get(key).is_some())
}

/// Runs one block. MIDI messages it synthesizes are returned; note-offs
/// flushed by `silence` and OSC requests go straight to `out`.
pub fn run_block(
    state: &mut EngineState,
    env: &Env<'_>,
    block: &OutputBlock,
    site: &BlockSite<'_>,
    ctx: &EvalContext,
    out: &mut CycleOutput,
) -> Vec<OutgoingMessage> {
    if let Some(guard) = &block.guard {
        let pass = state
            .scope(ctx, site.sequencer, site.source)
            .resolve_bool(Some(guard), false);
        if !pass {
            log::trace!(target: "output", "[{}] block skipped by guard", site.source);
            return Vec::new();
        }
    }

    if let Some(send) = &block.send_osc {
        if let Some(request) = osc_request(state, env, send, site, ctx) {
            log::info!(
                target: "output",
                "[{}] OSC {} -> {} {:?}",
                site.source,
                request.address,
                request.target,
                request.args
            );
            out.osc.push(request);
        }
        return Vec::new();
    }

    match block.action {
        Some(ModuleAction::Silence) => {
            out.messages.extend(silence_targets(state, block, site, ctx));
            return Vec::new();
        }
        Some(ModuleAction::StartModule) => {
            start_target(state, block, site, ctx);
            return Vec::new();
        }
        None => {}
    }

    let assigned = run_assignments(state, &block.entries, site, ctx);
    if assigned && !block.has_midi_action {
        return Vec::new();
    }

    if !block.set_var.is_empty() {
        for entry in &block.set_var {
            set_array_value(state, entry, site, ctx);
        }
        if block.arp_id.is_none() && !synthesizes_midi(block) {
            return Vec::new();
        }
    }

    if let Some(id) = &block.arp_id {
        route_to_arpeggiator(state, block, id, site, ctx);
        return Vec::new();
    }

    synthesize(state, env, block, site, ctx)
}

fn osc_request(
    state: &EngineState,
    env: &Env<'_>,
    send: &OscSend,
    site: &BlockSite<'_>,
    ctx: &EvalContext,
) -> Option<OscRequest> {
    let Some(target) = env.rules.osc.send.get(&send.target) else {
        log::warn!(target: "output", "[{}] send_osc to undefined target '{}'", site.source, send.target);
        return None;
    };
    let scope = state.scope(ctx, site.sequencer, site.source);
    let args = send
        .args
        .iter()
        .map(|arg| scope.resolve_exact(Some(arg), Value::Null))
        .filter(|value| !value.is_null())
        .collect();
    Some(OscRequest {
        target: send.target.clone(),
        ip: target.ip.clone(),
        port: target.port,
        address: send.address.clone().unwrap_or_else(|| target.address.clone()),
        args,
    })
}

fn target_index(
    state: &EngineState,
    cfg: Option<&ConfigValue>,
    site: &BlockSite<'_>,
    ctx: &EvalContext,
) -> Option<i64> {
    let cfg = cfg?;
    let scope = state.scope(ctx, site.sequencer, site.source);
    match scope.resolve_int(Some(cfg), -1) {
        -1 => None,
        index => Some(index),
    }
}

fn silence_targets(
    state: &mut EngineState,
    block: &OutputBlock,
    site: &BlockSite<'_>,
    ctx: &EvalContext,
) -> Vec<OutgoingMessage> {
    let mut offs = Vec::new();
    if let Some(id) = target_index(state, block.target_arp_id.as_ref(), site, ctx) {
        offs.extend(state.arps.silence(id));
    }
    if let Some(index) = target_index(state, block.target_seq_index.as_ref(), site, ctx) {
        match usize::try_from(index).ok().and_then(|i| state.sequencers.get_mut(i)) {
            Some(seq) => offs.extend(seq.silence()),
            None => log::warn!(target: "output", "[{}] silence: no sequencer {}", site.source, index),
        }
    }
    offs
}

fn start_target(state: &mut EngineState, block: &OutputBlock, site: &BlockSite<'_>, ctx: &EvalContext) {
    let Some(index) = target_index(state, block.target_seq_index.as_ref(), site, ctx) else {
        return;
    };
    match usize::try_from(index).ok().and_then(|i| state.sequencers.get_mut(i)) {
        Some(seq) => seq.request_start(),
        None => log::warn!(target: "output", "[{}] start_module: no sequencer {}", site.source, index),
    }
}

/// Keys naming an existing user variable are assignments. Returns true when
/// at least one was present.
pub fn run_assignments(
    state: &mut EngineState,
    entries: &[(String, ConfigValue)],
    site: &BlockSite<'_>,
    ctx: &EvalContext,
) -> bool {
    let mut any = false;
    for (name, cfg) in entries {
        if !state.vars.contains(name) {
            continue;
        }
        any = true;
        let value = state
            .scope(ctx, site.sequencer, site.source)
            .resolve_exact(Some(cfg), Value::Null);
        if value.is_null() || !state.vars.assign(name, value) {
            continue;
        }
        log::debug!(
            target: "output",
            "[{}] {} = {}",
            site.source,
            name,
            state.vars.get(name).map(ToString::to_string).unwrap_or_default()
        );
        for seq in state.sequencers.iter_mut() {
            if seq.config.schedule_depends_on(name) {
                seq.needs_rebuild = true;
            }
        }
    }
    any
}

fn coerce_slot(name: &str, value: &Value) -> Option<Value> {
    if is_float_array(name) {
        value.coerce_f64().map(Value::Float)
    } else {
        value.coerce_i64().map(Value::Int)
    }
}

fn set_array_value(state: &mut EngineState, entry: &SetVarEntry, site: &BlockSite<'_>, ctx: &EvalContext) {
    let channel_array = entry.name.starts_with("ch_");
    let (sequencer, index, value) = {
        let scope = state.scope(ctx, site.sequencer, site.source);
        let sequencer = match &entry.sequencer_index {
            Some(cfg) => scope
                .evaluate(cfg)
                .coerce_i64()
                .and_then(|i| usize::try_from(i).ok())
                .filter(|i| *i < state.sequencers.len()),
            None => site.sequencer,
        };
        let scope = state.scope(ctx, sequencer.or(site.sequencer), site.source);
        (
            sequencer,
            scope.evaluate(&entry.index).coerce_i64(),
            scope.resolve_exact(Some(&entry.value), Value::Null),
        )
    };
    let Some(index) = index.and_then(|i| usize::try_from(i).ok()) else {
        log::debug!(target: "output", "[{}] set_var {}: index out of range", site.source, entry.name);
        return;
    };
    let Some(value) = coerce_slot(&entry.name, &value) else {
        log::warn!(target: "output", "[{}] set_var {}: value {} is not a number", site.source, entry.name, value);
        return;
    };

    if channel_array {
        if state.channel_arrays.set(&entry.name, index, value.clone()) {
            log::debug!(target: "output", "[{}] SET CH:{}[{}] = {}", site.source, entry.name, index, value);
        }
        return;
    }
    let Some(seq) = sequencer.and_then(|i| state.sequencers.get_mut(i)) else {
        log::debug!(target: "output", "[{}] set_var {}: no target sequencer", site.source, entry.name);
        return;
    };
    let steps = seq.step_total;
    let array = seq
        .arrays
        .entry(entry.name.clone())
        .or_insert_with(|| vec![Value::Int(0); steps]);
    let Some(slot) = array.get_mut(index) else {
        return;
    };
    *slot = value;
    log::debug!(target: "output", "[{}] SET {}:{}[{}] = {}", site.source, seq.label, entry.name, index, slot);
    if matches!(entry.name.as_str(), "shift_array" | "swing_array") {
        seq.needs_rebuild = true;
    }
}

fn route_to_arpeggiator(
    state: &mut EngineState,
    block: &OutputBlock,
    id_cfg: &ConfigValue,
    site: &BlockSite<'_>,
    ctx: &EvalContext,
) {
    let (id, updates) = {
        let scope = state.scope(ctx, site.sequencer, site.source);
        let id = scope.resolve_int(Some(id_cfg), -1);
        let updates: Vec<(String, ConfigValue)> = block
            .entries
            .iter()
            .filter_map(|(key, cfg)| match scope.resolve_exact(Some(cfg), Value::Null) {
                Value::Null => None,
                value => Some((key.clone(), ConfigValue::from(value))),
            })
            .collect();
        (id, updates)
    };
    if id == -1 {
        return;
    }
    let touched = state.arps.update_template(id, updates, &state.settings);
    for key in touched {
        arpeggiator::recompute(state, key);
    }

    let Some(event) = ctx.event_type().filter(EventType::is_note) else {
        return;
    };
    let template = state.arps.template(id, &state.settings).clone();
    let (key, notes, velocity, latch) = {
        let scope = state.scope(ctx, site.sequencer, site.source);
        let inherited = ctx.channel().unwrap_or(0) + 1;
        let channel = (scope.resolve_int(template.get("channel_out"), inherited) - 1).clamp(0, 15) as u8;
        let played = Value::Int(ctx.value1().unwrap_or(0));
        let notes: Vec<i64> = match scope.resolve_opt(block.get("value_1_out"), played) {
            Value::List(items) => items.iter().filter_map(Value::coerce_i64).collect(),
            other => other.coerce_i64().into_iter().collect(),
        };
        let velocity = scope.resolve_int(block.get("value_2_out"), ctx.value2().unwrap_or(0));
        let latch = scope.resolve_bool(template.get("arp_latch"), false);
        ((id, channel), notes, velocity, latch)
    };

    let inst = state.arps.instances.entry(key).or_insert_with(|| {
        log::info!(target: "arp", "new instance ARP[{},{}]", key.0, key.1);
        ArpInstance::new(key, template.clone())
    });
    inst.params.extend(template);
    inst.update_held(&notes, velocity, event, latch);
    arpeggiator::recompute(state, key);
    let running = state.transport_running;
    if let Some(inst) = state.arps.instances.get_mut(&key) {
        inst.sync_play(running);
        if inst.play == PlayState::Stopped && !inst.held.is_empty() && !running {
            log::debug!(target: "arp", "{} holding notes until the transport starts", inst.label);
        }
    }
}

fn synthesize(
    state: &EngineState,
    env: &Env<'_>,
    block: &OutputBlock,
    site: &BlockSite<'_>,
    ctx: &EvalContext,
) -> Vec<OutgoingMessage> {
    let Some(device) = block
        .get("device_out")
        .and_then(ConfigValue::as_str)
        .or(site.device_out)
    else {
        return Vec::new();
    };
    let scope = state.scope(ctx, site.sequencer, site.source);
    let in_sequencer = site.sequencer.is_some();

    let channel = match block.get("channel_out").or(site.channel_out) {
        Some(cfg) => scope.resolve_int(Some(cfg), 1) - 1,
        None => ctx.channel().unwrap_or(0),
    };

    let (event_cfg, value1_cfg, value2_cfg) = match &block.shortcut {
        Some(shortcut) => (None, Some(&shortcut.value1), Some(&shortcut.value2)),
        None => (block.get("event_out"), block.get("value_1_out"), block.get("value_2_out")),
    };
    let event = match &block.shortcut {
        Some(shortcut) => Some(shortcut.event),
        None => {
            let default = if in_sequencer {
                EventType::NoteOn.name()
            } else {
                ctx.get(crate::eval::EVENT_IN)
                    .and_then(Value::as_str)
                    .unwrap_or(EventType::NoteOn.name())
            };
            match scope.resolve_opt(event_cfg, Value::from(default)) {
                Value::Str(name) => EventType::parse(&name),
                _ => None,
            }
        }
    };
    let Some(event) = event else {
        log::warn!(target: "output", "[{}] unknown event_out", site.source);
        return Vec::new();
    };

    let from_ctx = |key: &str| ctx.get(key).cloned().unwrap_or(Value::Int(0));
    let (default1, default2) = match (in_sequencer, event) {
        (true, EventType::NoteOn | EventType::NoteOff) => (from_ctx("note_out"), from_ctx("velocity_out")),
        (true, EventType::ControlChange) => (from_ctx("cc_number_out"), from_ctx("cc_value_out")),
        _ => (
            from_ctx(crate::eval::VALUE_1_IN),
            from_ctx(crate::eval::VALUE_2_IN),
        ),
    };
    let values1: Vec<i64> = match scope.resolve_opt(value1_cfg, default1) {
        Value::List(items) => items.iter().map(|v| v.coerce_i64().unwrap_or(0)).collect(),
        other => vec![other.coerce_i64().unwrap_or(0)],
    };
    let value2 = scope
        .resolve_opt(value2_cfg, default2)
        .coerce_i64()
        .unwrap_or(0);
    let transpose = if event.is_note() {
        state.vars.global_transpose()
    } else {
        0
    };

    let Some(port) = env.ports.find_output(env.rules.resolve_alias(device)) else {
        log::trace!(target: "output", "[{}] no open port for '{}'", site.source, device);
        return Vec::new();
    };
    values1
        .into_iter()
        .map(|value1| OutgoingMessage {
            message: MidiMessage::build(event, channel, value1.saturating_add(transpose), value2),
            port,
            alias: device.to_string(),
            source: site.source.to_string(),
            event_type: event,
        })
        .collect()
}
