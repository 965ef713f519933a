//! Event sink trait and implementations.

use async_trait::async_trait;
use tracing::{debug, info, warn, Level};

/// Trait for sinks receiving stage diagnostics.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emits an event asynchronously.
    ///
    /// # Arguments
    ///
    /// * `event_type` - The type of event (e.g., "stage.completed")
    /// * `data` - Optional event data
    async fn emit(&self, event_type: &str, data: Option<serde_json::Value>);

    /// Emits an event without blocking.
    ///
    /// Must never fail; stages call this from their terminal paths.
    fn try_emit(&self, event_type: &str, data: Option<serde_json::Value>);
}

/// A no-op event sink that discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _event_type: &str, _data: Option<serde_json::Value>) {}

    fn try_emit(&self, _event_type: &str, _data: Option<serde_json::Value>) {}
}

/// An event sink that logs events using the tracing framework.
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
    /// Creates a new logging event sink with the specified level.
    #[must_use]
    pub const fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging sink.
    #[must_use]
    pub const fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    fn log_event(&self, event_type: &str, data: Option<&serde_json::Value>) {
        match self.level {
            Level::TRACE | Level::DEBUG => {
                debug!(event_type = %event_type, event_data = ?data, "Event: {}", event_type);
            }
            Level::WARN | Level::ERROR => {
                warn!(event_type = %event_type, event_data = ?data, "Event: {}", event_type);
            }
            _ => {
                info!(event_type = %event_type, event_data = ?data, "Event: {}", event_type);
            }
        }
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        self.log_event(event_type, data.as_ref());
    }

    fn try_emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        self.log_event(event_type, data.as_ref());
    }
}

/// A collecting event sink for tests and post-run inspection.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: parking_lot::RwLock<Vec<(String, Option<serde_json::Value>)>>,
}

impl CollectingEventSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<(String, Option<serde_json::Value>)> {
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

    /// Returns events of exactly this type.
    #[must_use]
    pub fn events_of_type(&self, event_type: &str) -> Vec<Option<serde_json::Value>> {
        self.events
            .read()
            .iter()
            .filter(|(t, _)| t == event_type)
            .map(|(_, data)| data.clone())
            .collect()
    }

    /// Returns the payloads of events emitted by `stage`.
    #[must_use]
    pub fn events_for_stage(&self, stage: &str) -> Vec<(String, Option<serde_json::Value>)> {
        self.events
            .read()
            .iter()
            .filter(|(_, data)| stage_of(data.as_ref()) == Some(stage))
            .cloned()
            .collect()
    }
}

fn stage_of(data: Option<&serde_json::Value>) -> Option<&str> {
    data?.get("stage")?.as_str()
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        self.events.write().push((event_type.to_string(), data));
    }

    fn try_emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        self.events.write().push((event_type.to_string(), data));
    }
}
