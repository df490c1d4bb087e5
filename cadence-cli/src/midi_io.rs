use crossbeam_channel::Sender;
use midir::{Ignore, InitError, MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};

use cadence_core::ports::name_matches;
use cadence_types::{parse_midi_message, InboundEvent, OutgoingMessage};

const CLIENT_NAME: &str = "cadence";

fn wanted(name: &str, substrings: &[String]) -> bool {
    substrings.iter().any(|s| name_matches(name, s))
}

/// Names of every MIDI input and output currently visible, in that order.
pub fn list_ports() -> Result<(Vec<String>, Vec<String>), InitError> {
    let midi_in = MidiInput::new(CLIENT_NAME)?;
    let midi_out = MidiOutput::new(CLIENT_NAME)?;
    let inputs = midi_in
        .ports()
        .iter()
        .filter_map(|p| midi_in.port_name(p).ok())
        .collect();
    let outputs = midi_out
        .ports()
        .iter()
        .filter_map(|p| midi_out.port_name(p).ok())
        .collect();
    Ok((inputs, outputs))
}

/// Open output connections. A message's `PortHandle` is an index into this list.
pub struct MidiOutputs {
    connections: Vec<(String, MidiOutputConnection)>,
}

impl MidiOutputs {
    /// Connects to every output whose name contains one of `substrings`.
    pub fn open(substrings: &[String]) -> Result<Self, InitError> {
        let scanner = MidiOutput::new(CLIENT_NAME)?;
        let mut connections = Vec::new();
        for port in scanner.ports() {
            let Ok(name) = scanner.port_name(&port) else {
                continue;
            };
            if !wanted(&name, substrings) {
                continue;
            }
            let midi_out = MidiOutput::new(CLIENT_NAME)?;
            match midi_out.connect(&port, "cadence-out") {
                Ok(conn) => {
                    log::info!(target: "midi", "opened output '{}'", name);
                    connections.push((name, conn));
                }
                Err(e) => log::warn!(target: "midi", "could not open output '{}': {}", name, e),
            }
        }
        Ok(Self { connections })
    }

    pub fn names(&self) -> Vec<String> {
        self.connections.iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn send(&mut self, sent: &OutgoingMessage) {
        match self.connections.get_mut(sent.port.0) {
            Some((name, conn)) => {
                if let Err(e) = conn.send(&sent.message.to_bytes()) {
                    log::warn!(target: "midi", "send to '{}' failed: {}", name, e);
                }
            }
            None => log::warn!(target: "midi", "no open output for {:?}", sent.port),
        }
    }
}

/// Open input connections, each forwarding parsed events to the cycle loop.
pub struct MidiInputs {
    names: Vec<String>,
    _connections: Vec<MidiInputConnection<()>>,
}

impl MidiInputs {
    pub fn open(substrings: &[String], tx: &Sender<InboundEvent>) -> Result<Self, InitError> {
        let scanner = MidiInput::new(CLIENT_NAME)?;
        let mut names = Vec::new();
        let mut connections = Vec::new();
        for port in scanner.ports() {
            let Ok(name) = scanner.port_name(&port) else {
                continue;
            };
            if !wanted(&name, substrings) {
                continue;
            }
            let mut midi_in = MidiInput::new(CLIENT_NAME)?;
            // Clock bytes must come through.
            midi_in.ignore(Ignore::SysexAndActiveSense);
            let tx = tx.clone();
            let port_name = name.clone();
            let result = midi_in.connect(
                &port,
                "cadence-in",
                move |_stamp, bytes, _| {
                    if let Some(raw) = parse_midi_message(bytes) {
                        let _ = tx.send(InboundEvent::from_raw(port_name.as_str(), raw));
                    }
                },
                (),
            );
            match result {
                Ok(conn) => {
                    log::info!(target: "midi", "opened input '{}'", name);
                    names.push(name);
                    connections.push(conn);
                }
                Err(e) => log::warn!(target: "midi", "could not open input '{}': {}", name, e),
            }
        }
        Ok(Self {
            names,
            _connections: connections,
        })
    }

    pub fn names(&self) -> Vec<String> {
        self.names.clone()
    }
}
