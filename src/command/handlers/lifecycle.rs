//! Reboot and power-off handlers

use crate::command::Directive;
use tracing::warn;

/// Handle `reboot`: drop the link and reconnect with the same session
pub fn handle_reboot() -> Directive {
    warn!("Reboot command received, restarting client");
    Directive::Reboot
}

/// Handle `Power_Off`
pub fn handle_power_off() -> Directive {
    warn!("System power-off requested");
    Directive::PowerOff
}
