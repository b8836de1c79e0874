use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

/// Canonical detection categories
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    PersonDetected,
    VehicleDetected,
    /// Anything else; the detector's label is kept in `meta["label"]`
    ObjectDetected,
}

impl EventType {
    /// Map a free-text detector label onto a category.
    ///
    /// Returns the lowercased label alongside `ObjectDetected` so callers can
    /// keep it as metadata.
    pub fn from_label(label: &str) -> (Self, Option<String>) {
        let normalized = label.trim().to_lowercase();
        match normalized.as_str() {
            "person" => (Self::PersonDetected, None),
            "car" | "truck" | "bus" | "motorcycle" => (Self::VehicleDetected, None),
            _ => (Self::ObjectDetected, Some(normalized)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PersonDetected => "person_detected",
            Self::VehicleDetected => "vehicle_detected",
            Self::ObjectDetected => "object_detected",
        }
    }
}

impl Display for EventType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Normalized detection produced by every source adapter
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    /// Detector that produced the event
    pub source: String,
    /// Originating camera or zone
    pub camera_id: String,
    pub event_type: EventType,
    /// Time of the underlying detection
    pub ts: DateTime<Utc>,
    /// Score in the detector's own scale
    pub confidence: Option<f64>,
    pub snapshot_url: Option<String>,
    /// Lower-priority descriptive fields
    pub meta: BTreeMap<String, serde_json::Value>,
}

impl Event {
    /// Create an event with no optional fields set
    pub fn new(
        source: impl Into<String>,
        camera_id: impl Into<String>,
        event_type: EventType,
        ts: DateTime<Utc>,
    ) -> Self {
        Self {
            source: source.into(),
            camera_id: camera_id.into(),
            event_type,
            ts,
            confidence: None,
            snapshot_url: None,
            meta: BTreeMap::new(),
        }
    }

    pub fn with_confidence(mut self, confidence: Option<f64>) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_snapshot_url(mut self, snapshot_url: Option<String>) -> Self {
        self.snapshot_url = snapshot_url;
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    /// Aggregation identity: camera and category, never source or time
    pub fn key(&self) -> (String, EventType) {
        (self.camera_id.clone(), self.event_type)
    }

    /// Compact record handed to notification sinks
    pub fn summary(&self) -> EventSummary {
        EventSummary {
            camera_id: self.camera_id.clone(),
            event_type: self.event_type,
            chosen_source: self.source.clone(),
            confidence: self.confidence,
            ts: self.ts.to_rfc3339_opts(SecondsFormat::AutoSi, false),
        }
    }
}

/// Incident notification payload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventSummary {
    pub camera_id: String,
    pub event_type: EventType,
    pub chosen_source: String,
    pub confidence: Option<f64>,
    /// ISO-8601 timestamp
    pub ts: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn label_mapping_is_case_insensitive() {
        assert_eq!(EventType::from_label("Person"), (EventType::PersonDetected, None));
        assert_eq!(EventType::from_label("TRUCK"), (EventType::VehicleDetected, None));
        assert_eq!(EventType::from_label("motorcycle"), (EventType::VehicleDetected, None));
        assert_eq!(
            EventType::from_label("Dog"),
            (EventType::ObjectDetected, Some("dog".to_string()))
        );
    }

    #[test]
    fn event_type_serializes_snake_case() {
        let json = serde_json::to_string(&EventType::VehicleDetected).unwrap();
        assert_eq!(json, "\"vehicle_detected\"");
        assert_eq!(EventType::ObjectDetected.to_string(), "object_detected");
    }

    #[test]
    fn summary_carries_chosen_source_and_iso_timestamp() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        let event = Event::new("frigate", "gate", EventType::PersonDetected, ts)
            .with_confidence(Some(0.91))
            .with_meta("event_id", "1714566600.0-abc");

        let summary = event.summary();
        assert_eq!(summary.camera_id, "gate");
        assert_eq!(summary.chosen_source, "frigate");
        assert_eq!(summary.confidence, Some(0.91));
        assert_eq!(summary.ts, "2024-05-01T12:30:00+00:00");

        let value = serde_json::to_value(&summary).unwrap();
        assert_eq!(value["event_type"], "person_detected");
    }
}
