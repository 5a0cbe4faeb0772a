//! Fault arming handler

use crate::command::Directive;
use crate::fault::FaultSimulator;
use tracing::warn;

/// Handle `changed_parameters`: arm the failure model
pub fn handle_changed_parameters(fault: &mut FaultSimulator) -> Directive {
    warn!("Error simulation activated");
    fault.arm();
    Directive::Continue
}
