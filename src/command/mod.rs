//! Remote command handling for the device
//!
//! This module handles:
//! - Mapping decoded command tags onto handlers
//! - Local effects (log messages, epoch reset, fault arming)
//! - Telling the connection controller what to do next

mod dispatcher;
pub mod handlers;

pub use dispatcher::CommandDispatcher;

/// What the controller should do after a command was handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    /// Nothing beyond the handler's local effect
    Continue,
    /// Ship the captured log in the background
    Upload,
    /// Tear the connection down and reconnect with the same session
    Reboot,
    /// Tear the connection down and terminate
    PowerOff,
}
