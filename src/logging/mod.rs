//! Logging for the device runtime
//!
//! Two sinks are composed on one tracing registry:
//! - the console `fmt` layer
//! - [`CaptureLayer`], which appends this workspace's events to the
//!   JSON-array log file that the upload pipeline ships

mod capture;
mod layer;

pub use capture::LogCapture;
pub use layer::{capture_level, CaptureLayer};

use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Crates whose events end up in the captured log
const CAPTURED_TARGETS: [&str; 2] = ["simiot_device", "simiot_shared"];

/// Install the global subscriber
pub fn init(capture: Arc<LogCapture>) {
    let targets = CAPTURED_TARGETS
        .iter()
        .fold(Targets::new(), |targets, name| {
            targets.with_target(*name, Level::INFO)
        });

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(CaptureLayer::new(capture).with_filter(targets))
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();
}
