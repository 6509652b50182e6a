//! Forwarding of `tracing` events to a host-provided log.
//!
//! Hosts usually own a single text log. [`HostLogLayer`] formats each event
//! at or above a threshold as one `LEVEL target: message key=value` line and
//! hands it to a [`HostLog`] sink.

use std::fmt::Write as _;
use std::sync::{Arc, Mutex};

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

/// A host log sink.
pub trait HostLog: Send + Sync + 'static {
    fn log(&self, level: Level, line: &str);
}

/// `tracing` layer writing formatted events into a [`HostLog`].
#[derive(Debug, Clone)]
pub struct HostLogLayer<L> {
    sink: Arc<L>,
    threshold: Level,
}

impl<L: HostLog> HostLogLayer<L> {
    /// Forward events at `threshold` or more severe.
    pub fn new(sink: Arc<L>, threshold: Level) -> Self {
        Self { sink, threshold }
    }
}

impl<S: Subscriber, L: HostLog> Layer<S> for HostLogLayer<L> {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let level = *metadata.level();
        // More verbose levels compare greater.
        if level > self.threshold {
            return;
        }

        let mut visitor = LineVisitor::default();
        event.record(&mut visitor);

        let mut line = format!("{level} {}: {}", metadata.target(), visitor.message);
        if !visitor.fields.is_empty() {
            line.push(' ');
            line.push_str(&visitor.fields);
        }
        self.sink.log(level, &line);
    }
}

/// Collects the `message` field and renders the rest as `key=value`.
#[derive(Default)]
struct LineVisitor {
    message: String,
    fields: String,
}

impl LineVisitor {
    fn push_field(&mut self, name: &str, value: std::fmt::Arguments<'_>) {
        if !self.fields.is_empty() {
            self.fields.push(' ');
        }
        let _ = write!(self.fields, "{name}={value}");
    }
}

impl Visit for LineVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.push_field(field.name(), format_args!("{value:?}"));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.push_field(field.name(), format_args!("{value}"));
        }
    }
}

/// In-memory [`HostLog`] that keeps every line, for hosts without a log
/// and for tests.
#[derive(Debug, Default)]
pub struct MemoryLog {
    lines: Mutex<Vec<(Level, String)>>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<(Level, String)> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }
}

impl HostLog for MemoryLog {
    fn log(&self, level: Level, line: &str) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push((level, line.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    #[test]
    fn test_threshold_filters_events() {
        let sink = Arc::new(MemoryLog::new());
        let layer = HostLogLayer::new(Arc::clone(&sink), Level::INFO);
        let _guard = tracing_subscriber::registry().with(layer).set_default();

        tracing::debug!("too chatty");
        tracing::info!("kept");
        tracing::warn!("also kept");

        let lines = sink.lines();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].0, Level::INFO);
        assert_eq!(lines[1].0, Level::WARN);
    }

    #[test]
    fn test_line_format_includes_fields() {
        let sink = Arc::new(MemoryLog::new());
        let layer = HostLogLayer::new(Arc::clone(&sink), Level::TRACE);
        let _guard = tracing_subscriber::registry().with(layer).set_default();

        tracing::info!(target: "gazeshim::ipc", connection = 3, endpoint = "tcp://x", "Connected");

        let lines = sink.lines();
        assert_eq!(
            lines[0].1,
            "INFO gazeshim::ipc: Connected connection=3 endpoint=tcp://x"
        );
    }
}
