//! OSC requests produced by rules, and the wire codec for them.

use std::fmt;

use rosc::{OscMessage, OscPacket, OscType};

use cadence_types::Value;

/// One resolved `send_osc` action.
#[derive(Debug, Clone, PartialEq)]
pub struct OscRequest {
    pub target: String,
    pub ip: String,
    pub port: u16,
    pub address: String,
    pub args: Vec<Value>,
}

impl OscRequest {
    pub fn destination(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

#[derive(Debug)]
pub struct OscEncodeError(String);

impl fmt::Display for OscEncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "could not encode OSC message: {}", self.0)
    }
}

impl std::error::Error for OscEncodeError {}

fn to_osc(value: &Value) -> OscType {
    match value {
        Value::Int(i) => match i32::try_from(*i) {
            Ok(small) => OscType::Int(small),
            Err(_) => OscType::Long(*i),
        },
        Value::Float(f) => OscType::Float(*f as f32),
        Value::Str(s) => OscType::String(s.clone()),
        Value::List(items) => OscType::Array(rosc::OscArray {
            content: items.iter().map(to_osc).collect(),
        }),
        Value::Null => OscType::Nil,
    }
}

fn from_osc(arg: &OscType) -> Value {
    match arg {
        OscType::Int(i) => Value::Int(i64::from(*i)),
        OscType::Long(i) => Value::Int(*i),
        OscType::Float(f) => Value::Float(f64::from(*f)),
        OscType::Double(f) => Value::Float(*f),
        OscType::String(s) => Value::Str(s.clone()),
        OscType::Bool(b) => Value::Int(i64::from(*b)),
        OscType::Char(c) => Value::Str(c.to_string()),
        OscType::Array(array) => Value::List(array.content.iter().map(from_osc).collect()),
        _ => Value::Null,
    }
}

pub fn encode(request: &OscRequest) -> Result<Vec<u8>, OscEncodeError> {
    let packet = OscPacket::Message(OscMessage {
        addr: request.address.clone(),
        args: request.args.iter().map(to_osc).collect(),
    });
    rosc::encoder::encode(&packet).map_err(|e| OscEncodeError(e.to_string()))
}

/// Flattens a received datagram into `(address, args)` pairs. Bundles are
/// unpacked in order; undecodable datagrams yield nothing.
pub fn decode(datagram: &[u8]) -> Vec<(String, Vec<Value>)> {
    let packet = match rosc::decoder::decode_udp(datagram) {
        Ok((_, packet)) => packet,
        Err(e) => {
            log::warn!(target: "osc", "dropping undecodable datagram: {}", e);
            return Vec::new();
        }
    };
    let mut out = Vec::new();
    flatten(packet, &mut out);
    out
}

fn flatten(packet: OscPacket, out: &mut Vec<(String, Vec<Value>)>) {
    match packet {
        OscPacket::Message(msg) => {
            let args = msg.args.iter().map(from_osc).collect();
            out.push((msg.addr, args));
        }
        OscPacket::Bundle(bundle) => {
            for inner in bundle.content {
                flatten(inner, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoded_message_decodes() {
        let request = OscRequest {
            target: "mixer".into(),
            ip: "127.0.0.1".into(),
            port: 9001,
            address: "/fader/1".into(),
            args: vec![Value::Int(64), Value::Float(0.5), Value::from("on")],
        };
        let bytes = encode(&request).unwrap();
        let decoded = decode(&bytes);
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].0, "/fader/1");
        assert_eq!(decoded[0].1, request.args);
        assert_eq!(request.destination(), "127.0.0.1:9001");
    }

    #[test]
    fn test_garbage_is_dropped() {
        assert!(decode(&[1, 2, 3]).is_empty());
    }
}
