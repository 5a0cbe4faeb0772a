//! Message and parameter report handlers

use super::HandlerContext;
use crate::command::Directive;
use simiot_shared::Command;
use tracing::{info, warn};

/// Handle `send_msg_log`: echo the operator's message into the log
pub fn handle_send_msg_log(command: &Command) -> Directive {
    match command.field_str("msg") {
        Some(msg) => info!("MESSAGE: {}", msg),
        None => match command.payload.get("msg") {
            Some(other) => info!("MESSAGE: {}", other),
            None => warn!("MESSAGE: <none>"),
        },
    }
    Directive::Continue
}

/// Handle `get_d_parameters`
///
/// Network info is resolved again here since interfaces may have changed
/// since the handshake.
pub fn handle_get_parameters(ctx: &HandlerContext) -> Directive {
    let network = ctx.network.resolve();
    let session = ctx.session;

    info!("Parameters:");
    info!("Serial No: {}", ctx.identity.serial_no);
    info!("Organization ID: {}", session.organization_id.as_deref().unwrap_or("-"));
    info!("Location ID: {}", session.location_id.as_deref().unwrap_or("-"));
    info!("MAC: {} IP: {}", network.mac, network.ip);

    Directive::Continue
}
