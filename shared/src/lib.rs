//! SimIoT Shared Types
//!
//! This crate provides the data model, protocol constants, frame codec and
//! connection state machine shared by the SimIoT device runtime.

pub mod codec;
pub mod state_machine;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Timing and fault parameters for the device runtime
pub mod timing {
    /// Heartbeat interval in milliseconds
    pub const HEARTBEAT_INTERVAL_MS: u64 = 5000;

    /// Rate of the Poisson failure model once armed
    pub const FAULT_LAMBDA: f64 = 5.0;

    /// A Poisson draw at or below this count is a simulated failure
    pub const FAULT_FAILURE_THRESHOLD: u32 = 2;

    /// Persistent connection setup timeout in milliseconds
    pub const CONNECT_TIMEOUT_MS: u64 = 20_000;

    /// HTTP request timeout (handshake, upload) in milliseconds
    pub const REQUEST_TIMEOUT_MS: u64 = 30_000;
}

/// Wire-level names used on the persistent connection
pub mod protocol {
    /// Outbound registration event
    pub const EVENT_REGISTER: &str = "r";
    /// Inbound command envelope event
    pub const EVENT_MESSAGE: &str = "m";
    /// Outbound heartbeat event
    pub const EVENT_PING: &str = "ping";
    /// Inbound heartbeat reply event
    pub const EVENT_PONG: &str = "pong";
    /// Role announced in the registration message
    pub const DEVICE_ROLE: &str = "dev";
    /// Envelope field carrying the command JSON
    pub const ENVELOPE_PAYLOAD_FIELD: &str = "t";
    /// Command field carrying the tag
    pub const COMMAND_TAG_FIELD: &str = "f";
    /// Cookie name carrying the session id
    pub const SESSION_COOKIE: &str = "S";
}

/// Static description of the simulated device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub serial_no: String,
    pub serial_no_hw: String,
    pub short_code: String,
    pub firmware: String,
    pub oper_mode: String,
    pub model_id: String,
    pub site_id: String,
}

impl Default for DeviceIdentity {
    fn default() -> Self {
        Self {
            serial_no: "251306200097".into(),
            serial_no_hw: "724564889999".into(),
            short_code: "SAMPLE_DEVICE".into(),
            firmware: "SAMPLE_DEVICE".into(),
            oper_mode: "Prod".into(),
            model_id: "9100200".into(),
            site_id: "9100200".into(),
        }
    }
}

/// Persisted credential exchanged for a [`Session`] during the handshake
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken(String);

impl SessionToken {
    /// Trim the raw value; `None` when nothing is left
    pub fn parse(raw: &str) -> Option<Self> {
        let token = raw.trim();
        if token.is_empty() {
            None
        } else {
            Some(Self(token.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionToken(<redacted>)")
    }
}

/// Server-issued credential set for this process run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub session_id: String,
    pub organization_id: Option<String>,
    pub location_id: Option<String>,
    pub device_id: Option<String>,
}

impl Session {
    /// Create a session carrying only the mandatory id
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            organization_id: None,
            location_id: None,
            device_id: None,
        }
    }

    /// Cookie value presented on the socket and upload requests
    pub fn cookie(&self) -> String {
        format!("{}={}", protocol::SESSION_COOKIE, self.session_id)
    }
}

/// Registration message sent right after the connection comes up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    #[serde(rename = "n")]
    pub id: String,
    #[serde(rename = "r")]
    pub role: String,
}

impl Registration {
    pub fn device(session: &Session) -> Self {
        Self {
            id: session.session_id.clone(),
            role: protocol::DEVICE_ROLE.into(),
        }
    }
}

/// Severity of a captured log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    #[serde(rename = "LOG")]
    Log,
    #[serde(rename = "WARN")]
    Warn,
    #[serde(rename = "ERR")]
    Err,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Log => write!(f, "LOG"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Err => write!(f, "ERR"),
        }
    }
}

/// One captured log record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub level: LogLevel,
    pub message: String,
}

/// Known remote command tags
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandKind {
    SendMessageLog,
    Reboot,
    PowerOff,
    GetParameters,
    ChangedParameters,
    GetItems,
    SendLogs,
    Unknown(String),
}

impl CommandKind {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "send_msg_log" => CommandKind::SendMessageLog,
            "reboot" => CommandKind::Reboot,
            "Power_Off" => CommandKind::PowerOff,
            "get_d_parameters" => CommandKind::GetParameters,
            "changed_parameters" => CommandKind::ChangedParameters,
            "get_d_items" => CommandKind::GetItems,
            "send_logs" => CommandKind::SendLogs,
            other => CommandKind::Unknown(other.to_string()),
        }
    }
}

/// A remote command decoded from an inbound message
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub tag: String,
    pub payload: Value,
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        CommandKind::from_tag(&self.tag)
    }

    /// Command-specific string field, `None` when absent or not a string
    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.payload.get(name).and_then(Value::as_str)
    }
}
