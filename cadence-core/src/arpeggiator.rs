//! Arpeggiator templates and per-(id, channel) instances.
//!
//! Templates come from the rule file and are updated by `arp_id` output
//! blocks. An instance is created the first time a note reaches a template on
//! a channel, and is swept once it is stopped with nothing held and nothing
//! left to release.

use std::collections::BTreeMap;

use serde_json::Map;

use cadence_types::music::{parse_step_duration, wrap_index};
use cadence_types::{
    ArpDirection, ArpMode, ConfigValue, EventType, MidiMessage, OctaveMode, OutgoingMessage, Value,
};

use crate::engine::EngineSettings;
use crate::eval::{EvalContext, Scope};
use crate::launch::Launchable;
use crate::rng::Rng;
use crate::rules::{arp_template_from_json, ArpParams};
use crate::sequencer::{take_due, PendingNoteOff, PlayState};
use crate::state::{CycleOutput, EngineState, Env};

/// Template id and 0-based output channel.
pub type ArpKey = (i64, u8);

/// Pattern-shaping parameters resolved from a template.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PatternParams {
    pub mode: ArpMode,
    pub direction: ArpDirection,
    pub octaves: i64,
    pub octave_mode: OctaveMode,
    /// `arp_pattern`: indices into the base note list, `-1` for a rest.
    pub manual: Option<Vec<i64>>,
}

/// Notes to play, one slot per step. `None` is a rest.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Pattern {
    pub notes: Vec<Option<i64>>,
    pub velocities: Vec<i64>,
}

impl Pattern {
    fn push(&mut self, note: Option<i64>, velocity: i64) {
        self.notes.push(note);
        self.velocities.push(velocity);
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }
}

/// How the step index moves after each step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Stepping {
    #[default]
    Forward,
    Jump,
    Walk,
}

impl Stepping {
    fn for_params(params: &PatternParams) -> Self {
        match (params.mode, params.direction) {
            (ArpMode::Random2, _) | (_, ArpDirection::RandomJump) => Stepping::Jump,
            (_, ArpDirection::RandomWalk) => Stepping::Walk,
            _ => Stepping::Forward,
        }
    }

    fn next(self, current: usize, len: usize, rng: &Rng) -> usize {
        if len == 0 {
            return 0;
        }
        match self {
            Stepping::Forward => (current + 1) % len,
            Stepping::Jump => rng.below(len),
            Stepping::Walk => {
                let delta = if rng.below(2) == 0 { 1 } else { -1 };
                wrap_index(current as i64 + delta, len)
            }
        }
    }
}

/// Builds the step pattern from held `(note, velocity)` pairs.
pub fn build_pattern(held: &[(i64, i64)], params: &PatternParams, rng: &Rng) -> Pattern {
    if held.is_empty() {
        return Pattern::default();
    }
    let mut sorted = held.to_vec();
    sorted.sort_by_key(|(note, _)| *note);
    let base: &[(i64, i64)] = if params.mode.uses_played_order() {
        held
    } else {
        &sorted
    };

    let mut pattern = Pattern::default();
    if let Some(indices) = &params.manual {
        for &index in indices {
            if index == -1 {
                pattern.push(None, 0);
            } else {
                let (note, velocity) = base[wrap_index(index, base.len())];
                pattern.push(Some(note), velocity);
            }
        }
        return expand_octaves(pattern, params.octaves, params.octave_mode);
    }

    let mut walk = base.to_vec();
    if params.direction == ArpDirection::Down {
        walk.reverse();
    }
    if walk.len() > 1 {
        match params.direction {
            ArpDirection::UpDown => {
                let back: Vec<_> = walk.iter().rev().skip(1).take(walk.len() - 2).copied().collect();
                walk.extend(back);
            }
            ArpDirection::UpDownInclusive => {
                let back: Vec<_> = walk.iter().rev().copied().collect();
                walk.extend(back);
            }
            _ => {}
        }
    }
    let mut walk = match params.mode {
        ArpMode::Stutter(count) => walk
            .iter()
            .flat_map(|pair| std::iter::repeat(*pair).take(count))
            .collect(),
        ArpMode::OutsideIn => outside_in(&sorted),
        ArpMode::FirstNoteRepeat => first_note_repeat(&walk),
        _ => walk,
    };
    if params.mode == ArpMode::Random1 {
        rng.shuffle(&mut walk);
    }
    for (note, velocity) in walk {
        pattern.push(Some(note), velocity);
    }
    expand_octaves(pattern, params.octaves, params.octave_mode)
}

fn outside_in(sorted: &[(i64, i64)]) -> Vec<(i64, i64)> {
    let mut out = Vec::with_capacity(sorted.len());
    let (mut lo, mut hi) = (0, sorted.len());
    while lo < hi {
        out.push(sorted[lo]);
        lo += 1;
        if lo < hi {
            hi -= 1;
            out.push(sorted[hi]);
        }
    }
    out
}

fn first_note_repeat(notes: &[(i64, i64)]) -> Vec<(i64, i64)> {
    let Some((first, rest)) = notes.split_first() else {
        return Vec::new();
    };
    if rest.is_empty() {
        return vec![*first];
    }
    rest.iter().flat_map(|pair| [*first, *pair]).collect()
}

fn expand_octaves(pattern: Pattern, octaves: i64, mode: OctaveMode) -> Pattern {
    if octaves <= 1 {
        return pattern;
    }
    let mut out = Pattern::default();
    let slots = pattern.notes.iter().zip(&pattern.velocities);
    match mode {
        OctaveMode::Alternate => {
            for (note, velocity) in slots {
                for octave in 0..octaves {
                    match note {
                        Some(n) => out.push(Some(n + 12 * octave), *velocity),
                        None => out.push(None, 0),
                    }
                }
            }
        }
        OctaveMode::Up => {
            let slots: Vec<_> = slots.collect();
            for octave in 0..octaves {
                for (note, velocity) in &slots {
                    out.push(note.map(|n| n + 12 * octave), **velocity);
                }
            }
        }
    }
    out
}

fn resolve_name(scope: &Scope<'_>, cfg: Option<&ConfigValue>, default: &str) -> String {
    match scope.resolve_opt(cfg, Value::from(default)) {
        Value::Str(name) => name,
        _ => default.to_string(),
    }
}

pub fn resolve_pattern_params(scope: &Scope<'_>, params: &ArpParams) -> PatternParams {
    let mode = match scope.resolve_opt(params.get("arp_mode"), Value::from("sorted")) {
        Value::Int(index) => ArpMode::parse(&scope.library.arp_mode_at(index)),
        Value::Str(name) => ArpMode::parse(&name),
        _ => ArpMode::Sorted,
    };
    let manual = match params.get("arp_pattern") {
        Some(cfg @ (ConfigValue::List(_) | ConfigValue::Str(_))) => match scope.evaluate(cfg) {
            Value::List(items) if !items.is_empty() => {
                Some(items.iter().filter_map(Value::coerce_i64).collect())
            }
            _ => None,
        },
        _ => None,
    };
    PatternParams {
        mode,
        direction: ArpDirection::parse(&resolve_name(scope, params.get("arp_step_direction"), "up")),
        octaves: scope.resolve_int(params.get("arp_octaves"), 1),
        octave_mode: OctaveMode::parse(&resolve_name(scope, params.get("arp_octave_mode"), "up")),
        manual,
    }
}

/// Clock binding and step length.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ArpTiming {
    pub ppqn: i64,
    pub step_ticks: i64,
    pub clock_in: Option<String>,
    pub quantize: Option<Value>,
}

pub fn resolve_timing(scope: &Scope<'_>, params: &ArpParams, settings: &EngineSettings) -> ArpTiming {
    let ppqn = scope.resolve_int(params.get("ppqn"), settings.default_ppqn);
    let duration = scope.resolve_exact(
        params.get("step_duration"),
        Value::from(settings.default_step_duration.as_str()),
    );
    let quantize = match params.get("quantize_start") {
        Some(ConfigValue::Str(grid)) => Some(Value::from(grid.as_str())),
        Some(ConfigValue::Int(1)) => Some(Value::from(settings.default_step_duration.as_str())),
        Some(ConfigValue::Int(ticks)) if *ticks > 1 => Some(Value::Int(*ticks)),
        _ => None,
    };
    ArpTiming {
        ppqn,
        step_ticks: parse_step_duration(&duration, ppqn),
        clock_in: params
            .get("clock_in")
            .or_else(|| params.get("device_in"))
            .and_then(ConfigValue::as_str)
            .map(str::to_string),
        quantize,
    }
}

#[derive(Debug, Clone)]
pub struct ArpInstance {
    pub key: ArpKey,
    pub label: String,
    pub params: ArpParams,
    /// Held `(note, velocity)` pairs in arrival order.
    pub held: Vec<(i64, i64)>,
    pub pattern: Pattern,
    pub stepping: Stepping,
    pub timing: ArpTiming,
    pub play: PlayState,
    pub tick_counter: i64,
    pub active_step: usize,
    /// Ticks seen on the bound clock since creation. Note-offs are scheduled against it.
    pub elapsed: i64,
    pub pending_offs: Vec<PendingNoteOff>,
}

impl ArpInstance {
    pub fn new(key: ArpKey, params: ArpParams) -> Self {
        ArpInstance {
            key,
            label: format!("ARP[{},{}]", key.0, key.1),
            params,
            held: Vec::new(),
            pattern: Pattern::default(),
            stepping: Stepping::Forward,
            timing: ArpTiming::default(),
            play: PlayState::Stopped,
            tick_counter: 0,
            active_step: 0,
            elapsed: 0,
            pending_offs: Vec::new(),
        }
    }

    /// Note-on adds notes not already held; note-off removes them unless latched.
    pub fn update_held(&mut self, notes: &[i64], velocity: i64, event: EventType, latch: bool) {
        match event {
            EventType::NoteOn => {
                for &note in notes {
                    if !self.held.iter().any(|(n, _)| *n == note) {
                        self.held.push((note, velocity));
                    }
                }
            }
            EventType::NoteOff if !latch => {
                self.held.retain(|(n, _)| !notes.contains(n));
            }
            _ => {}
        }
    }

    /// Starts or arms once notes are held under a running transport, stops
    /// when the last note is released.
    pub fn sync_play(&mut self, transport_running: bool) {
        if self.held.is_empty() {
            if self.play != PlayState::Stopped {
                self.play = PlayState::Stopped;
                log::info!(target: "arp", "{} stopped, no notes held", self.label);
            }
            return;
        }
        if !transport_running {
            return;
        }
        match (self.play, self.timing.quantize.is_some()) {
            (PlayState::Stopped, true) => {
                self.play = PlayState::Armed;
                log::info!(target: "arp", "{} armed", self.label);
            }
            (PlayState::Stopped, false) | (PlayState::Armed, false) => self.play_now(),
            _ => {}
        }
    }

    pub fn play_now(&mut self) {
        self.play = PlayState::Playing;
        self.tick_counter = 0;
        self.active_step = 0;
        log::info!(target: "arp", "{} playing", self.label);
    }

    pub fn silence(&mut self) -> Vec<OutgoingMessage> {
        self.play = PlayState::Stopped;
        self.pending_offs.drain(..).map(|off| off.message).collect()
    }

    pub fn transport_start(&mut self) -> Vec<OutgoingMessage> {
        if self.timing.quantize.is_some() {
            if self.play == PlayState::Stopped && !self.held.is_empty() {
                self.play = PlayState::Armed;
            }
            return Vec::new();
        }
        let offs = self.pending_offs.drain(..).map(|off| off.message).collect();
        self.play_now();
        offs
    }

    pub fn transport_continue(&mut self) {
        self.play = PlayState::Playing;
    }

    pub fn count_tick(&mut self) {
        self.elapsed += 1;
        if self.play == PlayState::Playing {
            self.tick_counter += 1;
        }
    }

    fn apply(&mut self, pattern: Pattern, stepping: Stepping, timing: ArpTiming) {
        self.active_step = if pattern.is_empty() {
            0
        } else {
            self.active_step % pattern.len()
        };
        log::debug!(
            target: "arp",
            "{} pattern {:?}",
            self.label,
            pattern.notes.iter().flatten().collect::<Vec<_>>()
        );
        self.pattern = pattern;
        self.stepping = stepping;
        self.timing = timing;
    }
}

impl Launchable for ArpInstance {
    fn label(&self) -> &str {
        &self.label
    }

    fn is_armed(&self) -> bool {
        self.play == PlayState::Armed
    }

    fn clock_alias(&self) -> Option<&str> {
        self.timing.clock_in.as_deref()
    }

    fn grid(&self) -> Option<&Value> {
        self.timing.quantize.as_ref()
    }

    fn grid_ppqn(&self) -> i64 {
        self.timing.ppqn
    }

    fn launch(&mut self) {
        self.play_now();
    }

    fn disarm(&mut self) {
        self.play = PlayState::Stopped;
    }
}

/// Templates by id plus the live instances.
#[derive(Debug, Clone, Default)]
pub struct ArpArena {
    pub templates: BTreeMap<i64, ArpParams>,
    pub instances: BTreeMap<ArpKey, ArpInstance>,
}

impl ArpArena {
    pub fn new(templates: BTreeMap<i64, ArpParams>) -> Self {
        ArpArena {
            templates,
            instances: BTreeMap::new(),
        }
    }

    /// Template for `id`; unknown ids start from the defaults.
    pub fn template(&mut self, id: i64, settings: &EngineSettings) -> &mut ArpParams {
        self.templates.entry(id).or_insert_with(|| {
            arp_template_from_json(
                &Map::new(),
                settings.default_ppqn,
                &settings.default_step_duration,
            )
        })
    }

    /// Writes resolved parameters into template `id` and every instance of it.
    /// Returns the keys of the instances touched.
    pub fn update_template(
        &mut self,
        id: i64,
        updates: Vec<(String, ConfigValue)>,
        settings: &EngineSettings,
    ) -> Vec<ArpKey> {
        let template = self.template(id, settings);
        template.extend(updates);
        let template = template.clone();
        self.instances
            .iter_mut()
            .filter(|(key, _)| key.0 == id)
            .map(|(key, inst)| {
                inst.params.extend(template.clone());
                *key
            })
            .collect()
    }

    /// Stops every instance of `id`, returning their pending note-offs.
    pub fn silence(&mut self, id: i64) -> Vec<OutgoingMessage> {
        self.instances
            .iter_mut()
            .filter(|(key, _)| key.0 == id)
            .flat_map(|(_, inst)| {
                log::info!(target: "arp", "{} silenced", inst.label);
                inst.silence()
            })
            .collect()
    }

    pub fn keys(&self) -> Vec<ArpKey> {
        self.instances.keys().copied().collect()
    }

    /// Drops instances that are stopped with nothing held or pending.
    pub fn sweep(&mut self) {
        self.instances.retain(|_, inst| {
            let keep = inst.play != PlayState::Stopped
                || !inst.held.is_empty()
                || !inst.pending_offs.is_empty();
            if !keep {
                log::debug!(target: "arp", "{} removed", inst.label);
            }
            keep
        });
    }
}

fn arp_context(version: i64, step: usize) -> EvalContext {
    let mut ctx = EvalContext::new();
    ctx.set("version", Value::Int(version));
    ctx.set("step", Value::Int(step as i64));
    ctx
}

/// Re-resolves the template and rebuilds the pattern of instance `key`.
pub fn recompute(state: &mut EngineState, key: ArpKey) {
    let Some(inst) = state.arps.instances.get(&key) else {
        return;
    };
    let ctx = arp_context(state.version, inst.active_step);
    let (pattern, stepping, timing) = {
        let scope = state.scope(&ctx, None, &inst.label);
        let params = resolve_pattern_params(&scope, &inst.params);
        let timing = resolve_timing(&scope, &inst.params, &state.settings);
        (
            build_pattern(&inst.held, &params, &state.rng),
            Stepping::for_params(&params),
            timing,
        )
    };
    if let Some(inst) = state.arps.instances.get_mut(&key) {
        inst.apply(pattern, stepping, timing);
    }
}

/// Flushes due note-offs and plays every step that came due.
pub fn advance(state: &mut EngineState, env: &Env<'_>, key: ArpKey, out: &mut CycleOutput) {
    let Some(inst) = state.arps.instances.get_mut(&key) else {
        return;
    };
    out.messages.extend(take_due(&mut inst.pending_offs, inst.elapsed));
    if inst.play != PlayState::Playing || inst.timing.step_ticks <= 0 {
        return;
    }
    if inst.pattern.is_empty() {
        inst.tick_counter = 0;
        return;
    }
    loop {
        let Some(inst) = state.arps.instances.get_mut(&key) else {
            return;
        };
        if inst.pattern.is_empty() || inst.tick_counter < inst.timing.step_ticks {
            return;
        }
        inst.tick_counter -= inst.timing.step_ticks;
        fire_step(state, env, key, out);
        if let Some(inst) = state.arps.instances.get_mut(&key) {
            inst.active_step = inst.stepping.next(inst.active_step, inst.pattern.len(), &state.rng);
        }
    }
}

struct StepPlan {
    note: i64,
    velocity: i64,
    probability: f64,
    length: f64,
    device: Option<String>,
}

fn plan_step(state: &EngineState, inst: &ArpInstance) -> Option<StepPlan> {
    let step = inst.active_step;
    let ctx = arp_context(state.version, step);
    let scope = state.scope(&ctx, None, &inst.label);
    let param = |name: &str| inst.params.get(name);
    if scope.resolve_int(param("arp_gate"), 1) == 0 || scope.resolve_int(param("arp_mute"), 0) == 1 {
        return None;
    }
    let note = inst.pattern.notes.get(step).copied().flatten()?;
    let velocity = match inst.pattern.velocities.get(step) {
        Some(v) => *v,
        None => scope.resolve_int(param("arp_velocity"), 100),
    };
    Some(StepPlan {
        note,
        velocity,
        probability: scope.resolve_float(param("arp_probability"), 1.0),
        length: scope.resolve_float(param("arp_note_length"), 0.9),
        device: param("device_out").and_then(ConfigValue::as_str).map(str::to_string),
    })
}

fn fire_step(state: &mut EngineState, env: &Env<'_>, key: ArpKey, out: &mut CycleOutput) {
    let Some(inst) = state.arps.instances.get(&key) else {
        return;
    };
    let Some(plan) = plan_step(state, inst) else {
        return;
    };
    if plan.probability < 1.0 && state.rng.next_f64() >= plan.probability {
        log::trace!(target: "arp", "step skipped by probability {}", plan.probability);
        return;
    }
    let note = plan.note.clamp(0, 127);
    let velocity = plan.velocity.clamp(0, 127);
    if velocity == 0 {
        return;
    }
    let Some(device) = plan.device else {
        return;
    };
    let Some(port) = env.ports.find_output(env.rules.resolve_alias(&device)) else {
        log::trace!(target: "arp", "{} has no open port for '{}'", inst.label, device);
        return;
    };

    let Some(inst) = state.arps.instances.get_mut(&key) else {
        return;
    };
    let sent = OutgoingMessage {
        message: MidiMessage::build(EventType::NoteOn, i64::from(key.1), note, velocity),
        port,
        alias: device,
        source: inst.label.clone(),
        event_type: EventType::NoteOn,
    };
    if plan.length != -1.0 {
        let fire_at = inst.elapsed + (inst.timing.step_ticks as f64 * plan.length).round() as i64;
        inst.pending_offs.push(PendingNoteOff::for_note(&sent, fire_at));
    }
    log::info!(
        target: "arp",
        "{} ({}/{}) OUT {} -> {}",
        inst.label,
        inst.active_step + 1,
        inst.pattern.len(),
        sent.message,
        sent.alias
    );
    out.messages.push(sent);
}
