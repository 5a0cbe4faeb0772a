//! Socket.IO v4 / Engine.IO v4 text frame codec
//!
//! Every WebSocket text frame is one Engine.IO packet:
//! ```text
//! [ 1 char: engine type ][ payload ]
//! ```
//! Engine.IO `message` packets (type `4`) wrap a Socket.IO packet:
//! ```text
//! [ 1 char: socket type ][ "/nsp," ]?[ ack id ]?[ JSON ]?
//! ```
//!
//! Only the default namespace and text (non-binary) packets are used by the
//! device, but namespaced frames decode cleanly so they can be logged.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::{protocol, Command};

/// Errors that can occur during encoding/decoding
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Empty frame")]
    Empty,

    #[error("Unknown engine packet type: {0:?}")]
    UnknownEngineType(char),

    #[error("Unknown socket packet type: {0:?}")]
    UnknownSocketType(char),

    #[error("Event packet without an event name")]
    MissingEventName,

    #[error("Envelope has no string payload field {:?}", protocol::ENVELOPE_PAYLOAD_FIELD)]
    MissingPayload,

    #[error("Command has no string tag field {:?}", protocol::COMMAND_TAG_FIELD)]
    MissingTag,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Parameters announced by the server in the Engine.IO `open` packet
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OpenHandshake {
    pub sid: String,
    pub upgrades: Vec<String>,
    pub ping_interval: u64,
    pub ping_timeout: u64,
    pub max_payload: u64,
}

/// Engine.IO transport packet
#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    Open(OpenHandshake),
    Close,
    Ping(Option<String>),
    Pong(Option<String>),
    Message(SocketPacket),
    Upgrade,
    Noop,
}

/// Socket.IO packet carried inside an Engine.IO message
#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect(Option<Value>),
    Disconnect,
    Event {
        name: String,
        args: Vec<Value>,
        ack_id: Option<u64>,
    },
    Ack {
        ack_id: u64,
        args: Vec<Value>,
    },
    ConnectError(Value),
}

impl EnginePacket {
    /// Encode into the text frame sent over the WebSocket
    pub fn encode(&self) -> String {
        match self {
            EnginePacket::Open(_) => "0".into(),
            EnginePacket::Close => "1".into(),
            EnginePacket::Ping(probe) => format!("2{}", probe.as_deref().unwrap_or("")),
            EnginePacket::Pong(probe) => format!("3{}", probe.as_deref().unwrap_or("")),
            EnginePacket::Message(packet) => format!("4{}", packet.encode()),
            EnginePacket::Upgrade => "5".into(),
            EnginePacket::Noop => "6".into(),
        }
    }

    /// Decode a text frame received over the WebSocket
    pub fn decode(frame: &str) -> Result<Self, CodecError> {
        let mut chars = frame.chars();
        let kind = chars.next().ok_or(CodecError::Empty)?;
        let rest = chars.as_str();

        let probe = || (!rest.is_empty()).then(|| rest.to_string());

        match kind {
            '0' => Ok(EnginePacket::Open(serde_json::from_str(rest)?)),
            '1' => Ok(EnginePacket::Close),
            '2' => Ok(EnginePacket::Ping(probe())),
            '3' => Ok(EnginePacket::Pong(probe())),
            '4' => Ok(EnginePacket::Message(SocketPacket::decode(rest)?)),
            '5' => Ok(EnginePacket::Upgrade),
            '6' => Ok(EnginePacket::Noop),
            other => Err(CodecError::UnknownEngineType(other)),
        }
    }
}

impl SocketPacket {
    /// Event packet on the default namespace
    pub fn event(name: &str, data: Option<Value>) -> Self {
        let mut args = Vec::with_capacity(1);
        if let Some(data) = data {
            args.push(data);
        }
        SocketPacket::Event {
            name: name.to_string(),
            args,
            ack_id: None,
        }
    }

    pub fn encode(&self) -> String {
        match self {
            SocketPacket::Connect(None) => "0".into(),
            SocketPacket::Connect(Some(auth)) => format!("0{}", auth),
            SocketPacket::Disconnect => "1".into(),
            SocketPacket::Event { name, args, ack_id } => {
                let mut items = Vec::with_capacity(args.len() + 1);
                items.push(Value::String(name.clone()));
                items.extend(args.iter().cloned());
                let id = ack_id.map(|id| id.to_string()).unwrap_or_default();
                format!("2{}{}", id, Value::Array(items))
            }
            SocketPacket::Ack { ack_id, args } => {
                format!("3{}{}", ack_id, Value::Array(args.clone()))
            }
            SocketPacket::ConnectError(data) => format!("4{}", data),
        }
    }

    pub fn decode(body: &str) -> Result<Self, CodecError> {
        let mut chars = body.chars();
        let kind = chars.next().ok_or(CodecError::Empty)?;
        let mut rest = chars.as_str();

        // Namespace prefix ("/admin,") is skipped
        if rest.starts_with('/') {
            rest = match rest.find(',') {
                Some(pos) => &rest[pos + 1..],
                None => "",
            };
        }

        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        let ack_id = rest[..digits].parse::<u64>().ok();
        let json = &rest[digits..];

        match kind {
            '0' => {
                let data = if json.is_empty() {
                    None
                } else {
                    Some(serde_json::from_str(json)?)
                };
                Ok(SocketPacket::Connect(data))
            }
            '1' => Ok(SocketPacket::Disconnect),
            '2' | '5' => {
                let mut items: Vec<Value> = serde_json::from_str(json)?;
                if items.is_empty() {
                    return Err(CodecError::MissingEventName);
                }
                let name = match items.remove(0) {
                    Value::String(name) => name,
                    _ => return Err(CodecError::MissingEventName),
                };
                Ok(SocketPacket::Event {
                    name,
                    args: items,
                    ack_id,
                })
            }
            '3' | '6' => Ok(SocketPacket::Ack {
                ack_id: ack_id.unwrap_or_default(),
                args: serde_json::from_str(json)?,
            }),
            '4' => {
                let data = if json.is_empty() {
                    Value::Null
                } else {
                    serde_json::from_str(json)?
                };
                Ok(SocketPacket::ConnectError(data))
            }
            other => Err(CodecError::UnknownSocketType(other)),
        }
    }
}

/// Text frame for an event on the default namespace
pub fn event_frame(name: &str, data: Option<Value>) -> String {
    EnginePacket::Message(SocketPacket::event(name, data)).encode()
}

/// Extract the remote command from an inbound message envelope
///
/// The envelope's payload field normally holds the command as JSON text;
/// an already-embedded JSON object is accepted as well.
pub fn decode_command(envelope: &Value) -> Result<Command, CodecError> {
    let payload = match envelope.get(protocol::ENVELOPE_PAYLOAD_FIELD) {
        Some(Value::String(text)) => serde_json::from_str::<Value>(text)?,
        Some(object @ Value::Object(_)) => object.clone(),
        _ => return Err(CodecError::MissingPayload),
    };

    let tag = payload
        .get(protocol::COMMAND_TAG_FIELD)
        .and_then(Value::as_str)
        .ok_or(CodecError::MissingTag)?
        .to_string();

    Ok(Command { tag, payload })
}
