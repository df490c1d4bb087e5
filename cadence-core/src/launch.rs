//! Quantized launch: armed modules start on the first clock tick that lands
//! on their grid.

use std::collections::BTreeMap;

use cadence_types::music::parse_step_duration;
use cadence_types::Value;

use crate::ports::name_matches;
use crate::state::{EngineState, Env};

/// A module that can wait on a grid before it starts playing.
pub trait Launchable {
    fn label(&self) -> &str;

    fn is_armed(&self) -> bool;

    /// Input alias whose clock drives the module.
    fn clock_alias(&self) -> Option<&str>;

    /// Launch grid, as a duration string or a tick count.
    fn grid(&self) -> Option<&Value>;

    fn grid_ppqn(&self) -> i64;

    /// Start playing from step 0.
    fn launch(&mut self);

    fn disarm(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchDecision {
    Wait,
    Launch,
    Disarm,
}

/// Tick count of the clock behind `alias`. Ports that are open but have not
/// ticked since their last Start count as 0.
pub fn clock_position(
    alias: &str,
    env: &Env<'_>,
    clock_ticks: &BTreeMap<String, i64>,
) -> Option<i64> {
    let substring = env.rules.resolve_alias(alias);
    clock_ticks
        .iter()
        .find(|(port, _)| name_matches(port, substring))
        .map(|(_, ticks)| *ticks)
        .or_else(|| env.ports.find_input(substring).map(|_| 0))
}

pub fn decide(
    module: &dyn Launchable,
    env: &Env<'_>,
    clock_ticks: &BTreeMap<String, i64>,
) -> LaunchDecision {
    let Some(grid) = module.grid() else {
        return LaunchDecision::Disarm;
    };
    let Some(position) = module
        .clock_alias()
        .and_then(|alias| clock_position(alias, env, clock_ticks))
    else {
        return LaunchDecision::Disarm;
    };
    let grid_ticks = parse_step_duration(grid, module.grid_ppqn());
    if grid_ticks <= 0 {
        return LaunchDecision::Disarm;
    }
    if position % grid_ticks == 0 {
        LaunchDecision::Launch
    } else {
        LaunchDecision::Wait
    }
}

fn apply(module: &mut dyn Launchable, env: &Env<'_>, clock_ticks: &BTreeMap<String, i64>) {
    if !module.is_armed() {
        return;
    }
    match decide(module, env, clock_ticks) {
        LaunchDecision::Wait => {}
        LaunchDecision::Launch => {
            log::info!(target: "launch", "{} launched on grid", module.label());
            module.launch();
        }
        LaunchDecision::Disarm => {
            log::warn!(target: "launch", "{} cannot launch: no grid or clock, disarming", module.label());
            module.disarm();
        }
    }
}

/// Checks every armed sequencer and arpeggiator instance.
pub fn scan(state: &mut EngineState, env: &Env<'_>) {
    let EngineState {
        sequencers,
        arps,
        clock_ticks,
        ..
    } = state;
    for seq in sequencers.iter_mut() {
        apply(seq, env, clock_ticks);
    }
    for inst in arps.instances.values_mut() {
        apply(inst, env, clock_ticks);
    }
}
