//! # cadence-core
//!
//! A real-time MIDI rule engine. Inbound MIDI, OSC and clock events are
//! matched against a rule file; matches emit transformed MIDI, OSC requests,
//! variable writes and control of tick-driven sequencers and arpeggiators.
//! The core is synchronous: a front end collects events and hands them to
//! [`engine::Engine::run_cycle`] in batches.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use cadence_core::engine::{Engine, EngineSettings};
//! use cadence_core::ports::StaticPortDirectory;
//! use cadence_core::rules::RuleSet;
//!
//! let settings = EngineSettings::default();
//! let rules = RuleSet::load(path, &settings.rule_defaults())?;
//! let ports = StaticPortDirectory::new(vec!["Synth".into()], vec!["Keys".into()]);
//! let mut engine = Engine::new(rules, Box::new(ports), settings);
//!
//! let out = engine.run_cycle(events);
//! for sent in out.messages {
//!     // write sent.message.to_bytes() to sent.port
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`eval`]: expression language over the event context and user variables
//! - [`resolve`]: parameter resolution with range scaling and scale snapping
//! - [`rules`]: rule file decoding into typed, immutable configuration
//! - [`filter`]: version, device and field gates for filters
//! - [`output`]: output block actions and MIDI synthesis
//! - [`sequencer`], [`arpeggiator`], [`launch`]: tick-driven modules and quantized starts
//! - [`engine`]: the cycle driver
//! - [`config`]: TOML configuration (embedded defaults + user override)

pub mod arpeggiator;
pub mod cc_smoothing;
pub mod config;
pub mod engine;
pub mod eval;
pub mod filter;
pub mod launch;
pub mod osc;
pub mod output;
pub mod ports;
pub mod resolve;
pub mod rng;
pub mod rules;
pub mod sequencer;
pub mod state;
pub mod variables;

pub use engine::{Engine, EngineSettings};
pub use state::CycleOutput;
