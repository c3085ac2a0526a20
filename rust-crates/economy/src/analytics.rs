use serde::{
    Deserialize,
    Serialize,
};
use serde_json::Value;
use std::sync::{
    Arc,
    Mutex,
};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsEvent {
    pub event_type: String,
    pub payload: Value,
}

impl AnalyticsEvent {
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
        }
    }

    /// The `type` discriminator most payloads carry.
    pub fn kind(&self) -> Option<&str> {
        self.payload.get("type").and_then(Value::as_str)
    }
}

/// Fire-and-forget event collector. Implementations must never fail the caller.
pub trait Analytics {
    fn report(&self, event: AnalyticsEvent);
}

/// Keeps every event in memory; used by tests and dry runs.
#[derive(Clone, Debug, Default)]
pub struct RecordingAnalytics {
    events: Arc<Mutex<Vec<AnalyticsEvent>>>,
}

impl RecordingAnalytics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AnalyticsEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn kinds(&self, event_type: &str) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|event| event.event_type == event_type)
            .filter_map(|event| event.kind().map(str::to_string))
            .collect()
    }
}

impl Analytics for RecordingAnalytics {
    fn report(&self, event: AnalyticsEvent) {
        self.events.lock().unwrap().push(event);
    }
}
