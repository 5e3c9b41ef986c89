//! Telemetry sinks for scheduler lifecycle events.
//!
//! Tracking is fire-and-forget: sinks return nothing, and the scheduler
//! calls them through [`track_guarded`] so a misbehaving sink cannot
//! disturb playback.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{Map, Value};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{info, warn};

pub type Attributes = Map<String, Value>;

pub const SPEAK_START: &str = "speak_start";
pub const SPEAK_FINISH: &str = "speak_finish";
pub const SPEAK_FAILED: &str = "speak_failed";
pub const QUEUED: &str = "queued";
pub const STOPPED: &str = "stopped";
pub const INIT_FAILED: &str = "init_failed";

pub trait Telemetry: Send + Sync {
    fn track(&self, event: &str, attributes: Option<&Attributes>);
}

/// Discards every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTelemetry;

impl Telemetry for NoopTelemetry {
    fn track(&self, _event: &str, _attributes: Option<&Attributes>) {}
}

/// Logs every event through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTelemetry;

impl Telemetry for TracingTelemetry {
    fn track(&self, event: &str, attributes: Option<&Attributes>) {
        match attributes {
            Some(attrs) => {
                let attrs = Value::Object(attrs.clone());
                info!(target: "telemetry", event = %event, attributes = %attrs, "tracked");
            }
            None => info!(target: "telemetry", event = %event, "tracked"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TelemetryRecord {
    pub name: String,
    pub attributes: Option<Attributes>,
    pub recorded_at: DateTime<Utc>,
}

/// Keeps every event in memory, in arrival order
#[derive(Debug, Clone, Default)]
pub struct RecordingTelemetry {
    records: Arc<RwLock<Vec<TelemetryRecord>>>,
}

impl RecordingTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<TelemetryRecord> {
        self.records.read().clone()
    }

    /// Event names only, handy for assertions
    pub fn names(&self) -> Vec<String> {
        self.records.read().iter().map(|r| r.name.clone()).collect()
    }

    pub fn count(&self, event: &str) -> usize {
        self.records.read().iter().filter(|r| r.name == event).count()
    }

    pub fn clear(&self) {
        self.records.write().clear();
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl Telemetry for RecordingTelemetry {
    fn track(&self, event: &str, attributes: Option<&Attributes>) {
        self.records.write().push(TelemetryRecord {
            name: event.to_string(),
            attributes: attributes.cloned(),
            recorded_at: Utc::now(),
        });
    }
}

/// Build an attribute map from key/value pairs
pub fn attributes<I, K>(pairs: I) -> Attributes
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

/// Call a sink, swallowing any panic it raises
pub fn track_guarded(telemetry: &dyn Telemetry, event: &str, attributes: Option<&Attributes>) {
    let result = panic::catch_unwind(AssertUnwindSafe(|| telemetry.track(event, attributes)));
    if result.is_err() {
        warn!("Telemetry sink panicked while tracking '{}'", event);
    }
}
