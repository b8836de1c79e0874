use crate::adapters::coerce::{first_confidence, first_timestamp, identifier, is_present};
use crate::adapters::SourceAdapter;
use crate::events::{Event, EventType};
use chrono::Utc;
use log::debug;
use serde_json::{Map, Value};

pub const FRIGATE_SOURCE: &str = "frigate";

/// Normalizes Frigate `frigate/events` messages.
///
/// Frigate publishes a change record with `before` and `after` snapshots of
/// the tracked object. The most current snapshot wins; a flat object is
/// accepted as the record itself.
#[derive(Debug, Clone)]
pub struct FrigateAdapter {
    source: String,
}

impl FrigateAdapter {
    pub fn new() -> Self {
        Self::with_source(FRIGATE_SOURCE)
    }

    /// Adapter for a Frigate instance reporting under another name
    pub fn with_source(source: impl Into<String>) -> Self {
        Self { source: source.into() }
    }
}

impl Default for FrigateAdapter {
    fn default() -> Self {
        Self::new()
    }
}

/// `after`, then `before`, then the payload itself
fn extract_record(payload: &Value) -> Option<&Map<String, Value>> {
    let root = payload.as_object()?;
    root.get("after")
        .and_then(Value::as_object)
        .or_else(|| root.get("before").and_then(Value::as_object))
        .or(Some(root))
}

fn snapshot_url(record: &Map<String, Value>) -> Option<String> {
    ["snapshot", "thumbnail"]
        .iter()
        .filter_map(|field| record.get(*field))
        .find_map(|value| value.as_str().filter(|s| !s.is_empty()).map(str::to_string))
}

impl SourceAdapter for FrigateAdapter {
    fn source(&self) -> &str {
        &self.source
    }

    fn normalize(&self, payload: &Value) -> Option<Event> {
        let record = extract_record(payload)?;

        let camera_id = record
            .get("camera")
            .and_then(identifier)
            .or_else(|| record.get("camera_id").and_then(identifier))?;
        let label = record
            .get("label")
            .and_then(Value::as_str)
            .filter(|label| !label.trim().is_empty())?;

        let (event_type, object_label) = EventType::from_label(label);

        let ts = first_timestamp([
            record.get("frame_time"),
            record.get("start_time"),
            record.get("end_time"),
            payload.get("timestamp"),
            payload.get("time"),
        ])
        .unwrap_or_else(|| {
            debug!("No usable timestamp in {} event for {}, using receive time", self.source, camera_id);
            Utc::now()
        });

        let confidence = first_confidence([
            record.get("top_score"),
            record.get("score"),
            payload.get("confidence"),
        ]);

        let mut event = Event::new(self.source.clone(), camera_id, event_type, ts)
            .with_confidence(confidence)
            .with_snapshot_url(snapshot_url(record));

        if let Some(label) = object_label {
            event = event.with_meta("label", label);
        }
        if let Some(id) = record.get("id").filter(|id| !id.is_null()) {
            event = event.with_meta("event_id", id.clone());
        }
        if let Some(sub_label) = record.get("sub_label").filter(|v| is_present(v)) {
            event = event.with_meta("sub_label", sub_label.clone());
        }

        Some(event)
    }
}
