//! Tracing layer feeding events into the log capture

use super::capture::LogCapture;
use simiot_shared::LogLevel;
use std::fmt::{self, Write as _};
use std::sync::Arc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

/// Appends every event it sees to a [`LogCapture`]
#[derive(Clone)]
pub struct CaptureLayer {
    capture: Arc<LogCapture>,
}

impl CaptureLayer {
    pub fn new(capture: Arc<LogCapture>) -> Self {
        Self { capture }
    }
}

/// Map tracing severities onto the three captured levels
pub fn capture_level(level: &Level) -> LogLevel {
    match *level {
        Level::ERROR => LogLevel::Err,
        Level::WARN => LogLevel::Warn,
        _ => LogLevel::Log,
    }
}

impl<S: Subscriber> Layer<S> for CaptureLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let level = capture_level(event.metadata().level());
        // Must not re-enter tracing from inside a layer
        if let Err(e) = self.capture.record(level, &visitor.finish()) {
            eprintln!("log capture write failed: {}", e);
        }
    }
}

/// Flattens the `message` field plus any extra fields into one line
#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl MessageVisitor {
    fn finish(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else if self.message.is_empty() {
            self.fields.trim_start().to_string()
        } else {
            format!("{}{}", self.message, self.fields)
        }
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{:?}", value);
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}
