use std::collections::BTreeMap;

use cadence_types::{MusicLibrary, OutgoingMessage, Value};

use crate::arpeggiator::ArpArena;
use crate::cc_smoothing::CcSmoother;
use crate::engine::EngineSettings;
use crate::eval::{ArraySource, EvalContext, Scope};
use crate::osc::OscRequest;
use crate::ports::PortDirectory;
use crate::rng::Rng;
use crate::rules::RuleSet;
use crate::sequencer::SequencerState;
use crate::variables::{ChannelArrays, UserVariables};

/// Read-only collaborators shared by every stage of a cycle.
pub struct Env<'a> {
    pub rules: &'a RuleSet,
    pub ports: &'a dyn PortDirectory,
}

/// Everything one cycle produced.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CycleOutput {
    pub messages: Vec<OutgoingMessage>,
    pub osc: Vec<OscRequest>,
    /// The version that became current during this cycle, if any.
    pub version_change: Option<i64>,
}

/// All mutable engine state.
pub struct EngineState {
    pub vars: UserVariables,
    pub channel_arrays: ChannelArrays,
    pub library: MusicLibrary,
    pub rng: Rng,
    pub version: i64,
    pub available_versions: Vec<i64>,
    pub sequencers: Vec<SequencerState>,
    pub arps: ArpArena,
    pub smoother: CcSmoother,
    /// Set by transport Start/Continue, cleared by Stop/Reset.
    pub transport_running: bool,
    /// Clock ticks seen per input port since its last Start.
    pub clock_ticks: BTreeMap<String, i64>,
    pub settings: EngineSettings,
}

impl EngineState {
    pub fn new(rules: &RuleSet, settings: EngineSettings) -> Self {
        let mut vars = UserVariables::default();
        for (name, value) in &rules.user_variables {
            vars.insert(name, value.clone());
        }
        EngineState {
            vars,
            channel_arrays: ChannelArrays::default(),
            library: rules.library.clone(),
            rng: Rng::new(settings.seed),
            version: 0,
            available_versions: rules.available_versions(),
            sequencers: Vec::new(),
            arps: ArpArena::new(rules.arpeggiators.clone()),
            smoother: CcSmoother::default(),
            transport_running: false,
            clock_ticks: BTreeMap::new(),
            settings,
        }
    }

    pub fn scope<'s>(
        &'s self,
        ctx: &'s EvalContext,
        current_sequencer: Option<usize>,
        source: &'s str,
    ) -> Scope<'s> {
        Scope {
            ctx,
            vars: &self.vars,
            library: &self.library,
            arrays: self,
            rng: &self.rng,
            current_sequencer,
            source,
        }
    }

    /// Context holding only the current version, for module-level parameters.
    pub fn version_context(&self) -> EvalContext {
        let mut ctx = EvalContext::new();
        ctx.set("version", Value::Int(self.version));
        ctx
    }
}

impl ArraySource for EngineState {
    fn sequencer_value(&self, sequencer: usize, name: &str, index: usize) -> Option<Value> {
        self.sequencers
            .get(sequencer)
            .and_then(|seq| seq.arrays.get(name))
            .and_then(|array| array.get(index))
            .cloned()
    }

    fn channel_value(&self, name: &str, index: usize) -> Option<Value> {
        self.channel_arrays.get(name, index).cloned()
    }
}
