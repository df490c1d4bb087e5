use std::net::UdpSocket;
use std::thread::{self, JoinHandle};

use crossbeam_channel::Sender;

use cadence_core::osc::{self, OscRequest};
use cadence_core::rules::OscEndpoint;
use cadence_types::InboundEvent;

const SEND_QUEUE_CAPACITY: usize = 1024;
const MAX_DATAGRAM: usize = 8192;

/// Listens on `endpoint` and forwards every decoded message to the cycle loop.
pub fn spawn_receiver(endpoint: &OscEndpoint, tx: Sender<InboundEvent>) -> std::io::Result<JoinHandle<()>> {
    let socket = UdpSocket::bind((endpoint.ip.as_str(), endpoint.port))?;
    log::info!(target: "osc", "listening on {}:{}", endpoint.ip, endpoint.port);
    thread::Builder::new()
        .name("osc-receiver".into())
        .spawn(move || {
            let mut buf = [0u8; MAX_DATAGRAM];
            loop {
                let len = match socket.recv(&mut buf) {
                    Ok(len) => len,
                    Err(e) => {
                        log::warn!(target: "osc", "receive failed: {}", e);
                        return;
                    }
                };
                for (address, args) in osc::decode(&buf[..len]) {
                    if tx.send(InboundEvent::Osc { address, args }).is_err() {
                        return;
                    }
                }
            }
        })
}

/// Starts the sender thread. Requests queued on the returned channel are
/// encoded and sent in order.
pub fn spawn_sender() -> std::io::Result<(Sender<OscRequest>, JoinHandle<()>)> {
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    let (tx, rx) = crossbeam_channel::bounded::<OscRequest>(SEND_QUEUE_CAPACITY);
    let handle = thread::Builder::new()
        .name("osc-sender".into())
        .spawn(move || {
            while let Ok(request) = rx.recv() {
                let bytes = match osc::encode(&request) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        log::warn!(target: "osc", "[{}] {}", request.target, e);
                        continue;
                    }
                };
                if let Err(e) = socket.send_to(&bytes, request.destination()) {
                    log::warn!(target: "osc", "[{}] send to {} failed: {}", request.target, request.destination(), e);
                }
            }
        })?;
    Ok((tx, handle))
}
