//! Command handlers, one file per concern

mod diagnostics;
mod fault;
mod lifecycle;
mod records;

pub use diagnostics::{handle_get_parameters, handle_send_msg_log};
pub use fault::handle_changed_parameters;
pub use lifecycle::{handle_power_off, handle_reboot};
pub use records::{handle_get_items, handle_send_logs};

use crate::logging::LogCapture;
use crate::session::NetworkProbe;
use simiot_shared::{DeviceIdentity, Session};

/// Context passed to command handlers
pub struct HandlerContext<'a> {
    pub session: &'a Session,
    pub identity: &'a DeviceIdentity,
    pub capture: &'a LogCapture,
    pub network: &'a dyn NetworkProbe,
}
