//! Transport trait abstraction for the persistent connection

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use simiot_shared::Session;

/// What a live link reports to its owner
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// The server accepted the connection
    Connected { sid: Option<String> },
    /// Application event on the default namespace
    Event { name: String, args: Vec<Value> },
    /// The server refused the connection
    ConnectError(Value),
    /// The link is gone; no further events follow
    Disconnected { reason: String },
}

/// One established bidirectional connection
#[async_trait]
pub trait Link: Send {
    /// Send an application event
    async fn emit(&mut self, event: &str, data: Option<Value>) -> Result<()>;

    /// Next application-level event
    ///
    /// Must be cancel-safe at frame boundaries; callers race it in `select!`.
    async fn recv(&mut self) -> LinkEvent;

    /// Close the link gracefully
    async fn close(&mut self) -> Result<()>;
}

/// Factory for creating links
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a link authenticated with the session cookie
    async fn connect(&self, session: &Session) -> Result<Box<dyn Link>>;

    /// Human-readable name for this transport
    fn name(&self) -> &'static str;
}
