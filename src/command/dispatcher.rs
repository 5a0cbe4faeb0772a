//! Command dispatcher - routes decoded commands to their handlers

use super::handlers::{self, HandlerContext};
use super::Directive;
use crate::fault::FaultSimulator;
use crate::logging::LogCapture;
use crate::session::NetworkProbe;
use simiot_shared::{Command, CommandKind, DeviceIdentity, Session};
use std::sync::Arc;
use tracing::{debug, info};

/// Interprets inbound remote commands
///
/// Dispatch is synchronous; a handler finishes before the next event is
/// looked at.
pub struct CommandDispatcher {
    session: Arc<Session>,
    identity: DeviceIdentity,
    capture: Arc<LogCapture>,
    network: Arc<dyn NetworkProbe>,
}

impl CommandDispatcher {
    pub fn new(
        session: Arc<Session>,
        identity: DeviceIdentity,
        capture: Arc<LogCapture>,
        network: Arc<dyn NetworkProbe>,
    ) -> Self {
        Self {
            session,
            identity,
            capture,
            network,
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// Run the handler for `command` and report the follow-up
    pub fn dispatch(&self, command: &Command, fault: &mut FaultSimulator) -> Directive {
        debug!("Dispatching command: {}", command.tag);

        let ctx = HandlerContext {
            session: &self.session,
            identity: &self.identity,
            capture: &self.capture,
            network: self.network.as_ref(),
        };

        match command.kind() {
            CommandKind::SendMessageLog => handlers::handle_send_msg_log(command),
            CommandKind::Reboot => handlers::handle_reboot(),
            CommandKind::PowerOff => handlers::handle_power_off(),
            CommandKind::GetParameters => handlers::handle_get_parameters(&ctx),
            CommandKind::ChangedParameters => handlers::handle_changed_parameters(fault),
            CommandKind::GetItems => handlers::handle_get_items(&ctx),
            CommandKind::SendLogs => handlers::handle_send_logs(),
            CommandKind::Unknown(tag) => {
                info!("Unhandled function: {}", tag);
                Directive::Continue
            }
        }
    }
}
