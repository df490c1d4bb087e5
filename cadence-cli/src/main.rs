mod midi_io;
mod osc_io;

use std::collections::BTreeSet;
use std::fs::File;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};

use cadence_core::config::Config;
use cadence_core::osc::OscRequest;
use cadence_core::ports::StaticPortDirectory;
use cadence_core::rules::RuleSet;
use cadence_core::{CycleOutput, Engine};
use cadence_types::{InboundEvent, Value};

use midi_io::{MidiInputs, MidiOutputs};

const USAGE: &str = "usage: cadence [-v] [--monitor] [--list] <rules.json>";

#[derive(Debug, Default, PartialEq)]
struct Args {
    rules: Option<PathBuf>,
    verbose: bool,
    monitor: bool,
    list: bool,
}

fn parse_args(args: impl Iterator<Item = String>) -> Result<Args, String> {
    let mut parsed = Args::default();
    for arg in args {
        match arg.as_str() {
            "-v" | "--verbose" => parsed.verbose = true,
            "--monitor" => parsed.monitor = true,
            "--list" => parsed.list = true,
            flag if flag.starts_with('-') => return Err(format!("unknown flag '{}'", flag)),
            path if parsed.rules.is_none() => parsed.rules = Some(PathBuf::from(path)),
            extra => return Err(format!("unexpected argument '{}'", extra)),
        }
    }
    Ok(parsed)
}

fn init_logging(verbose: bool, monitor: bool) {
    use simplelog::*;

    let level = if verbose { LevelFilter::Debug } else { LevelFilter::Info };
    let log_dir = dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("cadence");
    let _ = std::fs::create_dir_all(&log_dir);
    let log_path = log_dir.join("cadence.log");
    let log_file = File::create(&log_path)
        .unwrap_or_else(|_| File::create("/tmp/cadence.log").expect("Cannot create log file"));

    let mut loggers: Vec<Box<dyn SharedLogger>> =
        vec![WriteLogger::new(level, simplelog::Config::default(), log_file)];
    if monitor {
        loggers.push(TermLogger::new(
            level,
            simplelog::Config::default(),
            TerminalMode::Stderr,
            ColorChoice::Auto,
        ));
    }
    CombinedLogger::init(loggers).expect("Failed to initialize logger");
}

/// Port name substrings the rules refer to, as (inputs, outputs).
fn port_substrings(rules: &RuleSet) -> (Vec<String>, Vec<String>) {
    let mut inputs = BTreeSet::new();
    let mut outputs = BTreeSet::new();
    let add = |set: &mut BTreeSet<String>, alias: &str| {
        set.insert(rules.resolve_alias(alias).to_string());
    };

    for rule in &rules.midi_filters {
        if let Some(alias) = rule.device_in() {
            add(&mut inputs, alias);
        }
    }
    for rule in rules.midi_filters.iter().chain(&rules.osc_filters) {
        if let Some(alias) = &rule.device_out {
            add(&mut outputs, alias);
        }
        for block in &rule.outputs {
            if let Some(alias) = block.get("device_out").and_then(|v| v.as_str()) {
                add(&mut outputs, alias);
            }
        }
    }
    for seq in &rules.sequencers {
        if let Some(alias) = &seq.clock_in {
            add(&mut inputs, alias);
        }
        if let Some(alias) = &seq.device_out {
            add(&mut outputs, alias);
        }
        for block in &seq.outputs {
            if let Some(alias) = block.get("device_out").and_then(|v| v.as_str()) {
                add(&mut outputs, alias);
            }
        }
    }
    for params in rules.arpeggiators.values() {
        for key in ["clock_in", "device_in"] {
            if let Some(alias) = params.get(key).and_then(|v| v.as_str()) {
                add(&mut inputs, alias);
            }
        }
        if let Some(alias) = params.get("device_out").and_then(|v| v.as_str()) {
            add(&mut outputs, alias);
        }
    }
    (inputs.into_iter().collect(), outputs.into_iter().collect())
}

enum Command {
    Quit,
    Version(Value),
}

fn parse_command(line: &str) -> Option<Command> {
    match line.trim() {
        "q" | "quit" => Some(Command::Quit),
        "n" | "next" => Some(Command::Version(Value::from("cycle_next"))),
        "p" | "prev" => Some(Command::Version(Value::from("cycle_previous"))),
        other => other.parse::<i64>().ok().map(|v| Command::Version(Value::Int(v))),
    }
}

fn spawn_console(tx: Sender<Command>) -> std::io::Result<thread::JoinHandle<()>> {
    thread::Builder::new().name("console".into()).spawn(move || {
        for line in std::io::stdin().lines() {
            let Ok(line) = line else {
                break;
            };
            match parse_command(&line) {
                Some(command) => {
                    if tx.send(command).is_err() {
                        break;
                    }
                }
                None => eprintln!("commands: <version>, n, p, q"),
            }
        }
    })
}

fn deliver(out: CycleOutput, outputs: &mut MidiOutputs, osc_tx: &Sender<OscRequest>) {
    for sent in &out.messages {
        outputs.send(sent);
    }
    for request in out.osc {
        if osc_tx.try_send(request).is_err() {
            log::warn!(target: "osc", "send queue full, dropping request");
        }
    }
    if let Some(version) = out.version_change {
        log::info!(target: "engine", "now at version {}", version);
    }
}

fn run(
    engine: &mut Engine,
    events: Receiver<InboundEvent>,
    commands: Receiver<Command>,
    outputs: &mut MidiOutputs,
    osc_tx: &Sender<OscRequest>,
    sleep: Duration,
) {
    loop {
        for command in commands.try_iter() {
            match command {
                Command::Quit => return,
                Command::Version(request) => deliver(engine.select_version(&request), outputs, osc_tx),
            }
        }
        let batch: Vec<InboundEvent> = events.try_iter().collect();
        let out = engine.run_cycle(batch);
        deliver(out, outputs, osc_tx);
        thread::sleep(sleep);
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = match parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{}\n{}", e, USAGE);
            std::process::exit(2);
        }
    };

    if args.list {
        let (inputs, outputs) = midi_io::list_ports()?;
        println!("inputs:");
        for name in inputs {
            println!("  {}", name);
        }
        println!("outputs:");
        for name in outputs {
            println!("  {}", name);
        }
        return Ok(());
    }

    let Some(rules_path) = args.rules else {
        eprintln!("{}", USAGE);
        std::process::exit(2);
    };

    let config = Config::load();
    init_logging(args.verbose, args.monitor || config.monitor());
    config.report_warnings();
    let settings = config.engine_settings();

    let rules = RuleSet::load(&rules_path, &settings.rule_defaults())?;
    let (input_wanted, output_wanted) = port_substrings(&rules);

    let (event_tx, event_rx) = crossbeam_channel::unbounded::<InboundEvent>();
    let inputs = MidiInputs::open(&input_wanted, &event_tx)?;
    let mut outputs = MidiOutputs::open(&output_wanted)?;

    if let Some(endpoint) = &rules.osc.receive {
        osc_io::spawn_receiver(endpoint, event_tx.clone())?;
    }
    let (osc_tx, _osc_sender) = osc_io::spawn_sender()?;

    let (command_tx, command_rx) = crossbeam_channel::unbounded::<Command>();
    spawn_console(command_tx)?;

    let ports = StaticPortDirectory::new(outputs.names(), inputs.names());
    let mut engine = Engine::new(rules, Box::new(ports), settings);
    log::info!(target: "engine", "running at version {}", engine.version());

    run(
        &mut engine,
        event_rx,
        command_rx,
        &mut outputs,
        &osc_tx,
        Duration::from_micros(config.cycle_sleep_us()),
    );

    for sent in engine.shutdown() {
        outputs.send(&sent);
    }
    log::info!(target: "engine", "stopped");
    Ok(())
}
