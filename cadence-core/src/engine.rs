//! The cycle driver.
//!
//! One call to [`Engine::run_cycle`] consumes every event collected since the
//! previous cycle. Clock and transport messages are counted first, then live
//! MIDI and OSC are matched against the filters, then a requested version
//! change is applied, then sequencers and arpeggiators advance, and finally
//! armed modules are checked against their launch grid.

use std::sync::Arc;

use cadence_types::music::{DEFAULT_PPQN, DEFAULT_STEP_DURATION};
use cadence_types::{InboundEvent, MidiMessage, OutgoingMessage, TransportKind, Value};

use crate::arpeggiator;
use crate::eval::{EvalContext, CC_TYPE_IN, CC_VALUE_SAVED, DELTA_IN, VALUE_2_IN};
use crate::filter;
use crate::launch;
use crate::output::{self, BlockSite};
use crate::ports::{name_matches, PortDirectory};
use crate::rules::{RuleConfig, RuleDefaults, RuleSet, Trigger};
use crate::sequencer::{self, SequencerState};
use crate::state::{CycleOutput, EngineState, Env};

/// Engine-wide defaults and the RNG seed.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub default_ppqn: i64,
    pub default_step_duration: String,
    pub seed: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            default_ppqn: DEFAULT_PPQN,
            default_step_duration: DEFAULT_STEP_DURATION.to_string(),
            seed: 1,
        }
    }
}

impl EngineSettings {
    pub fn rule_defaults(&self) -> RuleDefaults {
        RuleDefaults {
            ppqn: self.default_ppqn,
            step_duration: self.default_step_duration.clone(),
        }
    }
}

pub struct Engine {
    rules: RuleSet,
    state: EngineState,
    ports: Box<dyn PortDirectory>,
}

impl Engine {
    pub fn new(rules: RuleSet, ports: Box<dyn PortDirectory>, settings: EngineSettings) -> Self {
        let mut state = EngineState::new(&rules, settings);
        for config in &rules.sequencers {
            let seq = {
                let ctx = state.version_context();
                let scope = state.scope(&ctx, None, "init");
                SequencerState::new(Arc::clone(config), &scope, &state.settings)
            };
            log::info!(
                target: "seq",
                "{} ready: {} steps, clock '{}'",
                seq.label,
                seq.step_total,
                seq.config.clock_in.as_deref().unwrap_or("-")
            );
            state.sequencers.push(seq);
        }
        log::info!(target: "engine", "versions available: {:?}", state.available_versions);
        Engine { rules, state, ports }
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut EngineState {
        &mut self.state
    }

    pub fn version(&self) -> i64 {
        self.state.version
    }

    /// Runs one cycle over `events`, in the order they arrived within each phase.
    pub fn run_cycle(&mut self, events: Vec<InboundEvent>) -> CycleOutput {
        let Engine { rules, state, ports } = self;
        let env = Env {
            rules,
            ports: ports.as_ref(),
        };
        let mut out = CycleOutput::default();

        for event in events.iter().filter(|e| e.is_transport()) {
            handle_transport(state, &env, event, &mut out);
        }

        let mut version_request = None;
        for event in &events {
            match event {
                InboundEvent::Midi { port, message } => {
                    handle_midi(state, &env, port, message, &mut version_request, &mut out)
                }
                InboundEvent::Osc { address, args } => {
                    handle_osc(state, &env, address, args, &mut version_request, &mut out)
                }
                InboundEvent::Clock { .. } | InboundEvent::Transport { .. } => {}
            }
        }

        if let Some(request) = version_request {
            apply_version_request(state, &env, &request, &mut out);
        }

        for index in 0..state.sequencers.len() {
            sequencer::advance(state, &env, index, &mut out);
        }
        for key in state.arps.keys() {
            arpeggiator::advance(state, &env, key, &mut out);
        }
        state.arps.sweep();

        launch::scan(state, &env);

        for sent in &out.messages {
            if let MidiMessage::ControlChange { channel, control, value } = sent.message {
                state.smoother.record_sent(channel, control, value);
            }
        }
        out
    }

    /// Applies a version request outside a cycle: an integer version or
    /// `cycle`, `cycle_next` or `cycle_previous`.
    pub fn select_version(&mut self, request: &Value) -> CycleOutput {
        let Engine { rules, state, ports } = self;
        let env = Env {
            rules,
            ports: ports.as_ref(),
        };
        let mut out = CycleOutput::default();
        apply_version_request(state, &env, request, &mut out);
        out
    }

    /// Stops every module and returns the note-offs still pending.
    pub fn shutdown(&mut self) -> Vec<OutgoingMessage> {
        let mut offs = Vec::new();
        for seq in self.state.sequencers.iter_mut() {
            offs.extend(seq.silence());
        }
        for inst in self.state.arps.instances.values_mut() {
            offs.extend(inst.silence());
        }
        offs
    }
}

fn clock_bound(alias: Option<&str>, env: &Env<'_>, port: &str) -> bool {
    alias.map_or(false, |alias| name_matches(port, env.rules.resolve_alias(alias)))
}

fn handle_transport(state: &mut EngineState, env: &Env<'_>, event: &InboundEvent, out: &mut CycleOutput) {
    match event {
        InboundEvent::Clock { port } => {
            if state.transport_running {
                *state.clock_ticks.entry(port.clone()).or_insert(0) += 1;
            }
            for seq in state.sequencers.iter_mut() {
                if clock_bound(seq.config.clock_in.as_deref(), env, port) {
                    seq.count_tick();
                }
            }
            for inst in state.arps.instances.values_mut() {
                if clock_bound(inst.timing.clock_in.as_deref(), env, port) {
                    inst.count_tick();
                }
            }
        }
        InboundEvent::Transport { port, kind } => {
            log::info!(target: "engine", "transport {:?} from '{}'", kind, port);
            match kind {
                TransportKind::Start => {
                    state.transport_running = true;
                    state.clock_ticks.insert(port.clone(), 0);
                }
                TransportKind::Continue => state.transport_running = true,
                TransportKind::Stop | TransportKind::Reset => state.transport_running = false,
            }
            for seq in state.sequencers.iter_mut() {
                if !clock_bound(seq.config.clock_in.as_deref(), env, port) {
                    continue;
                }
                match kind {
                    TransportKind::Start => out.messages.extend(seq.transport_start()),
                    TransportKind::Continue => seq.transport_continue(),
                    TransportKind::Stop | TransportKind::Reset => out.messages.extend(seq.silence()),
                }
            }
            for inst in state.arps.instances.values_mut() {
                if !clock_bound(inst.timing.clock_in.as_deref(), env, port) {
                    continue;
                }
                match kind {
                    TransportKind::Start => out.messages.extend(inst.transport_start()),
                    TransportKind::Continue if !inst.held.is_empty() => inst.transport_continue(),
                    TransportKind::Continue => {}
                    TransportKind::Stop | TransportKind::Reset => out.messages.extend(inst.silence()),
                }
            }
        }
        InboundEvent::Midi { .. } | InboundEvent::Osc { .. } => {}
    }
}

fn handle_midi(
    state: &mut EngineState,
    env: &Env<'_>,
    port: &str,
    message: &MidiMessage,
    version_request: &mut Option<Value>,
    out: &mut CycleOutput,
) {
    let message = message.normalized();
    log::info!(target: "engine", "IN [{}] {}", port, message);
    for rule in &env.rules.midi_filters {
        if !filter::version_admits(rule, state.version) || !filter::device_admits(rule, env.rules, port) {
            continue;
        }
        let mut ctx = EvalContext::from_message(&message);
        let matched = {
            let scope = state.scope(&ctx, None, &rule.id);
            filter::conditions_hold(rule, &scope, &message)
        };
        if !matched {
            continue;
        }
        if let MidiMessage::ControlChange { channel, control, value } = message {
            ctx.set(CC_TYPE_IN, Value::from(rule.cc_mode.name()));
            if let Some(saved) = state.smoother.last_sent(channel, control) {
                ctx.set(CC_VALUE_SAVED, Value::from(saved));
            }
            let Some(smoothed) = state.smoother.process(
                &rule.id,
                rule.cc_mode,
                rule.threshold,
                channel,
                control,
                value,
            ) else {
                continue;
            };
            ctx.set(VALUE_2_IN, Value::Int(smoothed.value));
            ctx.set(DELTA_IN, Value::Int(smoothed.delta));
        }
        run_rule(state, env, rule, &ctx, version_request, out);
    }
}

fn handle_osc(
    state: &mut EngineState,
    env: &Env<'_>,
    address: &str,
    args: &[Value],
    version_request: &mut Option<Value>,
    out: &mut CycleOutput,
) {
    log::info!(target: "engine", "IN OSC '{}' {:?}", address, args);
    for rule in &env.rules.osc_filters {
        let Trigger::Osc { address: wanted } = &rule.trigger else {
            continue;
        };
        if wanted != address || !filter::version_admits(rule, state.version) {
            continue;
        }
        let mut ctx = state.version_context();
        ctx.set("address", Value::from(address));
        ctx.set("args", Value::List(args.to_vec()));
        run_rule(state, env, rule, &ctx, version_request, out);
    }
}

/// Runs a matched rule: guard, top-level assignments, version request, outputs.
fn run_rule(
    state: &mut EngineState,
    env: &Env<'_>,
    rule: &RuleConfig,
    ctx: &EvalContext,
    version_request: &mut Option<Value>,
    out: &mut CycleOutput,
) {
    if let Some(guard) = &rule.guard {
        if !state.scope(ctx, None, &rule.id).resolve_bool(Some(guard), false) {
            return;
        }
    }
    let site = BlockSite {
        source: &rule.id,
        sequencer: None,
        channel_out: rule.channel_out.as_ref(),
        device_out: rule.device_out.as_deref(),
    };
    output::run_assignments(state, &rule.extra, &site, ctx);

    if let Some(cfg) = &rule.set_version {
        if version_request.is_none() {
            let request = state
                .scope(ctx, None, &rule.id)
                .resolve_exact(Some(cfg), Value::Null);
            if !request.is_null() {
                *version_request = Some(request);
            }
        }
    }

    for block in &rule.outputs {
        let messages = output::run_block(state, env, block, &site, ctx, out);
        for sent in &messages {
            log::info!(target: "engine", "[{}] OUT {} -> {}", rule.id, sent.message, sent.alias);
        }
        out.messages.extend(messages);
    }
}

/// Target of a version request, or `None` when it names nothing usable.
pub fn requested_version(request: &Value, current: i64, available: &[i64]) -> Option<i64> {
    if available.is_empty() {
        return None;
    }
    let position = available.iter().position(|v| *v == current).unwrap_or(0);
    match request {
        Value::Str(word) => match word.trim() {
            "cycle" | "cycle_next" => Some(available[(position + 1) % available.len()]),
            "cycle_previous" => Some(available[(position + available.len() - 1) % available.len()]),
            _ => None,
        },
        other => other.coerce_i64().filter(|v| available.contains(v)),
    }
}

fn apply_version_request(state: &mut EngineState, env: &Env<'_>, request: &Value, out: &mut CycleOutput) {
    let Some(target) = requested_version(request, state.version, &state.available_versions) else {
        log::warn!(
            target: "engine",
            "version request {} ignored, available {:?}",
            request,
            state.available_versions
        );
        return;
    };
    if target == state.version {
        return;
    }
    state.version = target;
    out.version_change = Some(target);
    log::info!(target: "engine", "version -> {}", target);

    // Activation rules may not chain further version changes.
    let mut ignored = None;
    let ctx = state.version_context();
    for rule in &env.rules.midi_filters {
        if rule.device_in().is_none() && filter::version_admits(rule, target) {
            run_rule(state, env, rule, &ctx, &mut ignored, out);
        }
    }
}
