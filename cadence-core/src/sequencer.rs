//! Step sequencer: per-step arrays, a tick schedule with swing and shift, and
//! the Stopped / Armed / Playing lifecycle.
//!
//! Array slots hold either literal numbers or expression text. Text is
//! evaluated when the step fires, so `"60 + step"` tracks the step index.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use cadence_types::music::parse_step_duration;
use cadence_types::{ConfigValue, EventType, MidiMessage, OutgoingMessage, Value};

use crate::engine::EngineSettings;
use crate::eval::{EvalContext, Scope};
use crate::launch::Launchable;
use crate::output::{run_block, BlockSite};
use crate::rules::SequencerConfig;
use crate::state::{CycleOutput, Env, EngineState};

pub const DEFAULT_STEP_TOTAL: i64 = 16;

enum Seed {
    Int(i64),
    Float(f64),
}

const ARRAY_SEEDS: &[(&str, Seed)] = &[
    ("seq_transpose", Seed::Int(0)),
    ("seq_root_note", Seed::Int(48)),
    ("seq_active", Seed::Int(1)),
    ("seq_gate", Seed::Int(1)),
    ("seq_mute", Seed::Int(0)),
    ("seq_velocity", Seed::Int(100)),
    ("seq_probability", Seed::Float(1.0)),
    ("seq_note_length", Seed::Float(0.9)),
    ("seq_step_direction", Seed::Int(1)),
    ("seq_note", Seed::Int(60)),
    ("seq_cc_number", Seed::Int(0)),
    ("seq_cc_value", Seed::Int(0)),
    ("shift_array", Seed::Float(0.0)),
];

impl Seed {
    fn value(&self) -> Value {
        match self {
            Seed::Int(i) => Value::Int(*i),
            Seed::Float(f) => Value::Float(*f),
        }
    }
}

/// Arrays whose slots are fractional. Everything else stores integers.
pub fn is_float_array(name: &str) -> bool {
    ["prob", "factor", "length", "shift"]
        .iter()
        .any(|part| name.contains(part))
}

/// Context key a per-step array is exposed under: `seq_note` → `note_out`.
pub fn step_key(name: &str) -> String {
    format!("{}_out", name.strip_prefix("seq_").unwrap_or(name))
}

/// Extends with the last element (zero when empty) or truncates to `len`.
pub fn resize_array(array: &mut Vec<Value>, len: usize) {
    if array.len() > len {
        array.truncate(len);
        return;
    }
    let fill = array.last().cloned().unwrap_or(Value::Int(0));
    array.resize(len, fill);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayState {
    #[default]
    Stopped,
    Armed,
    Playing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleEntry {
    pub step: usize,
    pub fire_at: i64,
}

/// A note-off waiting for its tick.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingNoteOff {
    pub fire_at: i64,
    pub message: OutgoingMessage,
}

impl PendingNoteOff {
    /// Note-off matching a sent note-on.
    pub fn for_note(sent: &OutgoingMessage, fire_at: i64) -> Self {
        let message = MidiMessage::NoteOff {
            channel: sent.message.channel(),
            note: sent.message.value1(),
            velocity: 0,
        };
        PendingNoteOff {
            fire_at,
            message: OutgoingMessage {
                message,
                event_type: EventType::NoteOff,
                ..sent.clone()
            },
        }
    }
}

/// Removes and returns the note-offs due at or before `tick`.
pub fn take_due(pending: &mut Vec<PendingNoteOff>, tick: i64) -> Vec<OutgoingMessage> {
    let (due, keep): (Vec<_>, Vec<_>) = pending.drain(..).partition(|off| off.fire_at <= tick);
    *pending = keep;
    due.into_iter().map(|off| off.message).collect()
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScheduleError {
    NoSteps(i64),
    NoTicksPerStep { duration: String, ppqn: i64 },
}

impl fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleError::NoSteps(n) => write!(f, "step_total must be positive, got {}", n),
            ScheduleError::NoTicksPerStep { duration, ppqn } => {
                write!(f, "step_duration '{}' gives no ticks at ppqn {}", duration, ppqn)
            }
        }
    }
}

impl std::error::Error for ScheduleError {}

/// Schedule-shaping parameters, resolved once per rebuild.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleParams {
    pub step_total: usize,
    pub ppqn: i64,
    pub ticks_per_step: i64,
    pub swing: f64,
    pub shift_global: f64,
}

pub fn resolve_schedule(
    scope: &Scope<'_>,
    config: &SequencerConfig,
    settings: &EngineSettings,
) -> Result<ScheduleParams, ScheduleError> {
    let step_total = scope.resolve_int(config.get("step_total"), DEFAULT_STEP_TOTAL);
    if step_total <= 0 {
        return Err(ScheduleError::NoSteps(step_total));
    }
    let ppqn = scope.resolve_int(config.get("ppqn"), settings.default_ppqn);
    let duration = scope.resolve_exact(
        config.get("step_duration"),
        Value::from(settings.default_step_duration.as_str()),
    );
    let ticks_per_step = parse_step_duration(&duration, ppqn);
    if ticks_per_step <= 0 {
        return Err(ScheduleError::NoTicksPerStep {
            duration: duration.to_string(),
            ppqn,
        });
    }
    Ok(ScheduleParams {
        step_total: step_total as usize,
        ppqn,
        ticks_per_step,
        swing: scope.resolve_float(config.get("swing"), 0.0),
        shift_global: scope.resolve_float(config.get("shift_global"), 0.0),
    })
}

/// Fire ticks for every step, sorted ascending.
///
/// `fire_at = step * tps + round((shift_global + shift[step]) * tps)`, plus
/// `round(tps / 2 * swing)` on odd steps.
pub fn compute_schedule(
    step_total: usize,
    ticks_per_step: i64,
    swing: f64,
    shift_global: f64,
    shifts: &[f64],
) -> Vec<ScheduleEntry> {
    let tps = ticks_per_step as f64;
    let mut entries: Vec<ScheduleEntry> = (0..step_total)
        .map(|step| {
            let shift = shift_global + shifts.get(step).copied().unwrap_or(0.0);
            let mut fire_at = step as i64 * ticks_per_step + (shift * tps).round() as i64;
            if step % 2 == 1 {
                fire_at += (tps / 2.0 * swing).round() as i64;
            }
            ScheduleEntry { step, fire_at }
        })
        .collect();
    entries.sort_by_key(|entry| entry.fire_at);
    entries
}

/// Runtime state of one configured sequencer.
#[derive(Debug, Clone)]
pub struct SequencerState {
    pub config: Arc<SequencerConfig>,
    pub label: String,
    pub arrays: BTreeMap<String, Vec<Value>>,
    pub play: PlayState,
    pub tick_counter: i64,
    pub active_step: usize,
    pub last_known_tick: i64,
    /// Clock ticks counted this cycle and not yet stepped through.
    pub pending_ticks: i64,
    pub schedule: Vec<ScheduleEntry>,
    pub step_total: usize,
    pub ticks_per_step: i64,
    pub cycle_ticks: i64,
    pub ppqn: i64,
    pub needs_rebuild: bool,
    pub pending_offs: Vec<PendingNoteOff>,
}

impl SequencerState {
    /// Seeds the step arrays. The schedule is built on the first tick.
    pub fn new(config: Arc<SequencerConfig>, scope: &Scope<'_>, settings: &EngineSettings) -> Self {
        let steps = scope
            .resolve_int(config.get("step_total"), DEFAULT_STEP_TOTAL)
            .max(0) as usize;
        let mut arrays: BTreeMap<String, Vec<Value>> = ARRAY_SEEDS
            .iter()
            .map(|(name, seed)| (name.to_string(), vec![seed.value(); steps]))
            .collect();
        if config.get("seq_root_note").is_none() {
            if let Some(root) = scope.vars.get("global_root_note") {
                arrays.insert("seq_root_note".into(), vec![root.clone(); steps]);
            }
        }
        for (name, cfg) in &config.params {
            let Some(array) = arrays.get_mut(name) else {
                continue;
            };
            match cfg.to_value() {
                Value::Null => {}
                Value::List(items) if items.is_empty() => {}
                Value::List(mut items) => {
                    resize_array(&mut items, steps);
                    *array = items;
                }
                scalar => *array = vec![scalar; steps],
            }
        }

        SequencerState {
            label: format!("SEQ[{}]", config.index),
            ppqn: scope.resolve_int(config.get("ppqn"), settings.default_ppqn),
            config,
            arrays,
            play: PlayState::Stopped,
            tick_counter: 0,
            active_step: 0,
            last_known_tick: -1,
            pending_ticks: 0,
            schedule: Vec::new(),
            step_total: steps,
            ticks_per_step: 0,
            cycle_ticks: 0,
            needs_rebuild: true,
            pending_offs: Vec::new(),
        }
    }

    /// Resizes arrays and recomputes the schedule, keeping the cycle phase.
    pub fn apply_schedule(&mut self, params: &ScheduleParams) {
        for array in self.arrays.values_mut() {
            resize_array(array, params.step_total);
        }
        let old_cycle = self.cycle_ticks;
        let cycle = params.ticks_per_step * params.step_total as i64;
        if old_cycle > 0 && cycle != old_cycle && self.tick_counter > 0 {
            let ratio = cycle as f64 / old_cycle as f64;
            self.tick_counter = (self.tick_counter as f64 * ratio).round() as i64;
            self.last_known_tick = self.tick_counter;
            for off in &mut self.pending_offs {
                off.fire_at = (off.fire_at as f64 * ratio).round() as i64;
            }
        }

        let shifts: Vec<f64> = self
            .arrays
            .get("shift_array")
            .map(|values| values.iter().map(|v| v.coerce_f64().unwrap_or(0.0)).collect())
            .unwrap_or_default();
        self.schedule = compute_schedule(
            params.step_total,
            params.ticks_per_step,
            params.swing,
            params.shift_global,
            &shifts,
        );
        self.step_total = params.step_total;
        self.ticks_per_step = params.ticks_per_step;
        self.cycle_ticks = cycle;
        self.ppqn = params.ppqn;
        self.needs_rebuild = false;
        log::debug!(
            target: "seq",
            "{} schedule: {} steps x {} ticks, fire at {:?}",
            self.label,
            self.step_total,
            self.ticks_per_step,
            self.schedule.iter().map(|e| e.fire_at).collect::<Vec<_>>()
        );
    }

    /// Playing from step 0 on the next tick.
    pub fn play_now(&mut self) {
        self.play = PlayState::Playing;
        self.tick_counter = 0;
        self.active_step = 0;
        self.last_known_tick = -1;
        self.pending_ticks = 0;
        self.needs_rebuild = true;
        log::info!(target: "seq", "{} playing", self.label);
    }

    /// Start request: arm when a quantize grid is configured.
    pub fn request_start(&mut self) {
        match (self.play, &self.config.quantize_start) {
            (PlayState::Stopped, Some(_)) => {
                self.play = PlayState::Armed;
                log::info!(target: "seq", "{} armed", self.label);
            }
            (PlayState::Playing, _) | (PlayState::Armed, _) => {}
            (PlayState::Stopped, None) => self.play_now(),
        }
    }

    /// Stops and returns every pending note-off so nothing hangs.
    pub fn silence(&mut self) -> Vec<OutgoingMessage> {
        if self.play != PlayState::Stopped {
            log::info!(target: "seq", "{} stopped", self.label);
        }
        self.play = PlayState::Stopped;
        self.pending_offs.drain(..).map(|off| off.message).collect()
    }

    /// Transport Start on the bound clock. Quantized sequencers only arm.
    pub fn transport_start(&mut self) -> Vec<OutgoingMessage> {
        if self.config.quantize_start.is_some() {
            if self.play == PlayState::Stopped {
                self.play = PlayState::Armed;
                log::info!(target: "seq", "{} armed by transport", self.label);
            }
            return Vec::new();
        }
        let offs = self.silence();
        self.play_now();
        offs
    }

    pub fn transport_continue(&mut self) {
        if self.play != PlayState::Playing {
            self.play = PlayState::Playing;
            log::info!(target: "seq", "{} continue", self.label);
        }
    }

    /// Counts one tick of the bound clock.
    pub fn count_tick(&mut self) {
        if self.play == PlayState::Playing {
            self.pending_ticks += 1;
        }
    }

    fn wrap(&mut self) {
        let cycle = self.cycle_ticks;
        self.tick_counter -= cycle;
        self.last_known_tick -= cycle;
        for off in &mut self.pending_offs {
            off.fire_at -= cycle;
        }
        self.needs_rebuild = true;
    }

    fn due_entries(&self) -> Vec<ScheduleEntry> {
        self.schedule
            .iter()
            .filter(|e| e.fire_at > self.last_known_tick && e.fire_at <= self.tick_counter)
            .copied()
            .collect()
    }
}

impl Launchable for SequencerState {
    fn label(&self) -> &str {
        &self.label
    }

    fn is_armed(&self) -> bool {
        self.play == PlayState::Armed
    }

    fn clock_alias(&self) -> Option<&str> {
        self.config.clock_in.as_deref()
    }

    fn grid(&self) -> Option<&Value> {
        self.config.quantize_start.as_ref()
    }

    fn grid_ppqn(&self) -> i64 {
        self.ppqn
    }

    fn launch(&mut self) {
        self.play_now();
    }

    fn disarm(&mut self) {
        self.play = PlayState::Stopped;
    }
}

/// Re-resolves the schedule parameters. On failure the last good schedule stays.
pub fn rebuild(state: &mut EngineState, index: usize) {
    let result = {
        let Some(seq) = state.sequencers.get(index) else {
            return;
        };
        let ctx = state.version_context();
        let scope = state.scope(&ctx, Some(index), &seq.label);
        resolve_schedule(&scope, &seq.config, &state.settings)
    };
    let seq = &mut state.sequencers[index];
    match result {
        Ok(params) => seq.apply_schedule(&params),
        Err(e) => {
            log::warn!(target: "seq", "{} keeps its schedule: {}", seq.label, e);
            seq.needs_rebuild = false;
        }
    }
}

/// Context for one step: step index, version, scalar parameters and every
/// array value under its `_out` key.
pub fn step_context(state: &EngineState, index: usize, step: usize) -> EvalContext {
    let seq = &state.sequencers[index];
    let mut ctx = state.version_context();
    ctx.set("step", Value::Int(step as i64));

    let scalars: Vec<(String, Value)> = {
        let scope = state.scope(&ctx, Some(index), &seq.label);
        seq.config
            .params
            .iter()
            .filter(|(key, cfg)| cfg.is_scalar() && !seq.arrays.contains_key(*key))
            .map(|(key, cfg)| (key.clone(), scope.evaluate_exact(cfg)))
            .collect()
    };
    for (key, value) in scalars {
        ctx.set(key, value);
    }

    let per_step: Vec<(String, Value)> = {
        let scope = state.scope(&ctx, Some(index), &seq.label);
        seq.arrays
            .iter()
            .filter_map(|(name, values)| {
                let value = match values.get(step)? {
                    Value::Str(text) => scope.evaluate_str(text),
                    other => other.clone(),
                };
                Some((step_key(name), value))
            })
            .collect()
    };
    for (key, value) in per_step {
        ctx.set(key, value);
    }
    ctx
}

/// Steps through every clock tick counted since the last cycle, firing the
/// note-offs and steps that come due on each.
pub fn advance(state: &mut EngineState, env: &Env<'_>, index: usize, out: &mut CycleOutput) {
    let Some(seq) = state.sequencers.get_mut(index) else {
        return;
    };
    if seq.play != PlayState::Playing {
        seq.pending_ticks = 0;
        return;
    }
    let ticks = std::mem::take(&mut seq.pending_ticks);
    fire_due(state, env, index, out);
    for _ in 0..ticks {
        let seq = &mut state.sequencers[index];
        if seq.play != PlayState::Playing {
            break;
        }
        seq.tick_counter += 1;
        fire_due(state, env, index, out);
    }
}

fn fire_due(state: &mut EngineState, env: &Env<'_>, index: usize, out: &mut CycleOutput) {
    if state.sequencers[index].needs_rebuild {
        rebuild(state, index);
    }
    let seq = &mut state.sequencers[index];
    if seq.cycle_ticks > 0 && seq.tick_counter >= seq.cycle_ticks {
        seq.wrap();
        rebuild(state, index);
    }

    let seq = &mut state.sequencers[index];
    let tick = seq.tick_counter;
    out.messages.extend(take_due(&mut seq.pending_offs, tick));
    let due = seq.due_entries();
    seq.last_known_tick = tick;
    for entry in due {
        fire_step(state, env, index, entry, out);
    }
}

fn fire_step(
    state: &mut EngineState,
    env: &Env<'_>,
    index: usize,
    entry: ScheduleEntry,
    out: &mut CycleOutput,
) {
    state.sequencers[index].active_step = entry.step;
    let ctx = step_context(state, index, entry.step);

    let field = |key: &str, default: Value| ctx.get(key).cloned().unwrap_or(default);
    if !field("active_out", Value::Int(1)).is_truthy()
        || !field("gate_out", Value::Int(1)).is_truthy()
        || field("mute_out", Value::Int(0)).is_truthy()
    {
        return;
    }
    let probability = field("probability_out", Value::Float(1.0))
        .coerce_f64()
        .unwrap_or(1.0);
    if probability < 1.0 && state.rng.next_f64() >= probability {
        log::trace!(target: "seq", "step {} skipped by probability {}", entry.step, probability);
        return;
    }

    let (config, label, ticks_per_step) = {
        let seq = &state.sequencers[index];
        (Arc::clone(&seq.config), seq.label.clone(), seq.ticks_per_step)
    };
    let site = BlockSite {
        source: &label,
        sequencer: Some(index),
        channel_out: config.channel_out.as_ref(),
        device_out: config.device_out.as_deref(),
    };
    for block in &config.outputs {
        if out_muted(state, index, block.seq_out_id.as_ref(), &ctx, &label) {
            continue;
        }
        let messages = run_block(state, env, block, &site, &ctx, out);
        if messages.is_empty() {
            continue;
        }
        let length = {
            let scope = state.scope(&ctx, Some(index), &label);
            let default = field("note_length_out", Value::Float(0.9))
                .coerce_f64()
                .unwrap_or(0.9);
            scope.resolve_float(block.get("note_length_out"), default)
        };
        let seq = &mut state.sequencers[index];
        for sent in &messages {
            let is_sounding = matches!(sent.message, MidiMessage::NoteOn { velocity, .. } if velocity > 0);
            if is_sounding && length != -1.0 {
                let fire_at = entry.fire_at + (ticks_per_step as f64 * length).round() as i64;
                seq.pending_offs.push(PendingNoteOff::for_note(sent, fire_at));
            }
            log::info!(
                target: "seq",
                "{} ({}/{}) OUT {} -> {}",
                label,
                entry.step + 1,
                seq.step_total,
                sent.message,
                sent.alias
            );
        }
        out.messages.extend(messages);
    }
}

/// `seq_out_id` blocks are skipped while `seq_out_mute[id]` is set.
fn out_muted(
    state: &EngineState,
    index: usize,
    id: Option<&ConfigValue>,
    ctx: &EvalContext,
    label: &str,
) -> bool {
    let Some(id) = id else {
        return false;
    };
    let scope = state.scope(ctx, Some(index), label);
    let id = scope.resolve_int(Some(id), -1);
    if id < 0 {
        return false;
    }
    state.sequencers[index]
        .arrays
        .get("seq_out_mute")
        .and_then(|mutes| mutes.get(id as usize))
        .map_or(false, |v| v.coerce_i64() == Some(1))
}

#[cfg(test)]
mod tests {
    use cadence_types::PortHandle;
    use serde_json::json;

    use crate::rules::RuleSet;

    use super::*;

    fn sequencer(config: serde_json::Value) -> (RuleSet, EngineState) {
        let rules = RuleSet::from_json(&json!({ "sequencer": [config] })).unwrap();
        let mut state = EngineState::new(&rules, EngineSettings::default());
        let seq = {
            let ctx = state.version_context();
            let scope = state.scope(&ctx, None, "test");
            SequencerState::new(Arc::clone(&rules.sequencers[0]), &scope, &state.settings)
        };
        state.sequencers.push(seq);
        (rules, state)
    }

    fn fire_ticks(state: &EngineState) -> Vec<i64> {
        state.sequencers[0].schedule.iter().map(|e| e.fire_at).collect()
    }

    #[test]
    fn test_schedule_straight() {
        let (_, mut state) = sequencer(json!({"step_total": 4, "ppqn": 96, "step_duration": "1/16"}));
        rebuild(&mut state, 0);
        assert_eq!(fire_ticks(&state), vec![0, 24, 48, 72]);
        assert_eq!(state.sequencers[0].cycle_ticks, 96);
    }

    #[test]
    fn test_schedule_shift_global() {
        let (_, mut state) = sequencer(json!({
            "step_total": 4, "ppqn": 96, "step_duration": "1/16", "shift_global": 0.25
        }));
        rebuild(&mut state, 0);
        assert_eq!(fire_ticks(&state), vec![6, 30, 54, 78]);
    }

    #[test]
    fn test_swing_delays_odd_steps() {
        assert_eq!(
            compute_schedule(4, 24, 0.5, 0.0, &[]).iter().map(|e| e.fire_at).collect::<Vec<_>>(),
            vec![0, 30, 48, 78]
        );
    }

    #[test]
    fn test_shift_array_reorders() {
        let entries = compute_schedule(2, 24, 0.0, 0.0, &[1.5, 0.0]);
        assert_eq!(entries[0], ScheduleEntry { step: 1, fire_at: 24 });
        assert_eq!(entries[1], ScheduleEntry { step: 0, fire_at: 36 });
    }

    #[test]
    fn test_arrays_seeded_and_padded() {
        let (_, state) = sequencer(json!({"step_total": 4, "seq_note": [60, 62], "seq_velocity": 90}));
        let arrays = &state.sequencers[0].arrays;
        assert_eq!(
            arrays["seq_note"],
            vec![Value::Int(60), Value::Int(62), Value::Int(62), Value::Int(62)]
        );
        assert_eq!(arrays["seq_velocity"], vec![Value::Int(90); 4]);
        assert_eq!(arrays["seq_gate"], vec![Value::Int(1); 4]);
        assert_eq!(arrays["seq_probability"], vec![Value::Float(1.0); 4]);
    }

    #[test]
    fn test_resize_to_current_total_is_noop() {
        let (_, mut state) = sequencer(json!({"step_total": 3, "seq_note": [60, 62, 64]}));
        rebuild(&mut state, 0);
        let before = state.sequencers[0].arrays.clone();
        rebuild(&mut state, 0);
        assert_eq!(state.sequencers[0].arrays, before);
    }

    #[test]
    fn test_resize_array_extends_with_last() {
        let mut values = vec![Value::Int(1), Value::Int(2)];
        resize_array(&mut values, 4);
        assert_eq!(values, vec![Value::Int(1), Value::Int(2), Value::Int(2), Value::Int(2)]);
        resize_array(&mut values, 1);
        assert_eq!(values, vec![Value::Int(1)]);
    }

    #[test]
    fn test_rebuild_failure_keeps_schedule() {
        let (_, mut state) = sequencer(json!({"step_total": "steps", "ppqn": 96}));
        state.vars.insert("steps", Value::Int(4));
        rebuild(&mut state, 0);
        assert_eq!(state.sequencers[0].schedule.len(), 4);
        state.vars.insert("steps", Value::Int(0));
        state.sequencers[0].needs_rebuild = true;
        rebuild(&mut state, 0);
        assert_eq!(state.sequencers[0].schedule.len(), 4);
        assert!(!state.sequencers[0].needs_rebuild);
    }

    #[test]
    fn test_step_context_evaluates_text_slots() {
        let (_, state) = sequencer(json!({"step_total": 4, "seq_note": "60 + step", "swing": 0.25}));
        let ctx = step_context(&state, 0, 2);
        assert_eq!(ctx.get("note_out"), Some(&Value::Int(62)));
        assert_eq!(ctx.get("velocity_out"), Some(&Value::Int(100)));
        assert_eq!(ctx.get("swing"), Some(&Value::Float(0.25)));
        assert_eq!(ctx.get("step"), Some(&Value::Int(2)));
    }

    #[test]
    fn test_request_start_arms_with_grid() {
        let (_, mut state) = sequencer(json!({"quantize_start": "1/4"}));
        state.sequencers[0].request_start();
        assert_eq!(state.sequencers[0].play, PlayState::Armed);
        let (_, mut free) = sequencer(json!({}));
        free.sequencers[0].request_start();
        assert_eq!(free.sequencers[0].play, PlayState::Playing);
    }

    #[test]
    fn test_take_due() {
        let sent = OutgoingMessage {
            message: MidiMessage::NoteOn { channel: 0, note: 60, velocity: 100 },
            port: PortHandle(0),
            alias: "synth".into(),
            source: "SEQ[0]".into(),
            event_type: EventType::NoteOn,
        };
        let mut pending = vec![PendingNoteOff::for_note(&sent, 5), PendingNoteOff::for_note(&sent, 9)];
        let due = take_due(&mut pending, 6);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].message, MidiMessage::NoteOff { channel: 0, note: 60, velocity: 0 });
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn test_float_array_names() {
        assert!(is_float_array("seq_probability"));
        assert!(is_float_array("shift_array"));
        assert!(!is_float_array("seq_note"));
        assert_eq!(step_key("seq_note"), "note_out");
        assert_eq!(step_key("shift_array"), "shift_array_out");
    }
}
