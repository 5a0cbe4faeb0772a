//! Log record handlers

use super::HandlerContext;
use crate::command::Directive;
use tracing::{error, info};

/// Handle `get_d_items`: start a fresh recording epoch
pub fn handle_get_items(ctx: &HandlerContext) -> Directive {
    info!("#Log Record initialized");
    if let Err(e) = ctx.capture.begin_epoch() {
        error!("Could not reset log file {}: {}", ctx.capture.path().display(), e);
    }
    Directive::Continue
}

/// Handle `send_logs`; the controller runs the upload in the background
pub fn handle_send_logs() -> Directive {
    info!("Log upload requested");
    Directive::Upload
}
