//! Event sink trait and implementations.

use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, info, Level};

/// Receives lifecycle events from the executor.
///
/// Sinks must never fail the run: anything that goes wrong while handling
/// an event is the sink's own business. `emit` is called inline on the
/// executor's task and must not block.
pub trait EventSink: Send + Sync + std::fmt::Debug {
    /// Emits an event.
    ///
    /// # Arguments
    ///
    /// * `event_type` - The type of event (e.g., "step.started")
    /// * `data` - Optional event data
    fn emit(&self, event_type: &str, data: Option<Value>);
}

/// Discards every event. The default sink.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

impl EventSink for NoOpEventSink {
    fn emit(&self, _event_type: &str, _data: Option<Value>) {}
}

/// Forwards events to `tracing`.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Creates a sink logging at `level`. Anything other than DEBUG logs at INFO.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    fn log_event(&self, event_type: &str, data: Option<&Value>) {
        let step = data.and_then(|d| d.get("step")).and_then(Value::as_str).unwrap_or("-");
        if self.level == Level::DEBUG {
            debug!(event_type, step, event_data = ?data, "pipeline event");
        } else {
            info!(event_type, step, event_data = ?data, "pipeline event");
        }
    }
}

impl EventSink for LoggingEventSink {
    fn emit(&self, event_type: &str, data: Option<Value>) {
        self.log_event(event_type, data.as_ref());
    }
}

/// Records events in memory; used by tests to observe execution.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: RwLock<Vec<(String, Option<Value>)>>,
}

impl CollectingEventSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<(String, Option<Value>)> {
        self.events.read().clone()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if no events have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Clears all collected events.
    pub fn clear(&self) {
        self.events.write().clear();
    }

    /// Returns the event types recorded for `step`, in emission order.
    #[must_use]
    pub fn types_for_step(&self, step: &str) -> Vec<String> {
        self.events
            .read()
            .iter()
            .filter(|(_, data)| {
                data.as_ref()
                    .and_then(|d| d.get("step"))
                    .and_then(Value::as_str)
                    == Some(step)
            })
            .map(|(t, _)| t.clone())
            .collect()
    }

    /// Counts events of exactly `event_type`.
    #[must_use]
    pub fn count(&self, event_type: &str) -> usize {
        self.events.read().iter().filter(|(t, _)| t == event_type).count()
    }
}

impl EventSink for CollectingEventSink {
    fn emit(&self, event_type: &str, data: Option<Value>) {
        self.events.write().push((event_type.to_string(), data));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_noop_and_logging_sinks_accept_events() {
        NoOpEventSink.emit("step.started", None);
        LoggingEventSink::debug().emit("step.completed", Some(json!({"step": "loader"})));
        LoggingEventSink::default().emit("step.failed", None);
    }

    #[test]
    fn test_collecting_sink_filters() {
        let sink = CollectingEventSink::new();
        sink.emit("step.started", Some(json!({"step": "loader"})));
        sink.emit("step.started", Some(json!({"step": "unet"})));
        sink.emit("step.completed", Some(json!({"step": "loader"})));

        assert_eq!(sink.len(), 3);
        assert_eq!(sink.count("step.started"), 2);
        assert_eq!(sink.types_for_step("loader"), vec!["step.started", "step.completed"]);

        sink.clear();
        assert!(sink.is_empty());
    }
}
