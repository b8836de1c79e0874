use crate::adapters::coerce::{first_timestamp, identifier};
use crate::adapters::SourceAdapter;
use crate::events::{Event, EventType};
use chrono::Utc;
use serde_json::{Map, Value};

pub const REOLINK_SOURCE: &str = "reolink";

const STATE_BLOCKS: &[&str] = &["state", "SmartDetect", "AIState", "AI"];

/// Detection counts reported by a Reolink camera
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AiCounts {
    pub people: i64,
    pub vehicle: i64,
    pub motion: i64,
}

/// Normalizes Reolink AI-state polls published by the camera poller.
///
/// Accepts the poller's flat record (`people`/`vehicle`/`motion` counts) or
/// the camera's raw `GetAiState`/`GetSmartDetect` response under `response`.
/// Motion without a person or vehicle is not an event.
#[derive(Debug, Clone)]
pub struct ReolinkAdapter {
    source: String,
    default_camera: Option<String>,
}

impl ReolinkAdapter {
    pub fn new(default_camera: Option<String>) -> Self {
        Self {
            source: REOLINK_SOURCE.to_string(),
            default_camera,
        }
    }
}

/// Count stored either as a bare integer or as `{"alarm_state": n}`
fn count(block: &Map<String, Value>, names: &[&str]) -> Option<i64> {
    names.iter().filter_map(|name| block.get(*name)).find_map(|value| match value {
        Value::Number(n) => n.as_i64(),
        Value::Object(inner) => inner.get("alarm_state").and_then(Value::as_i64),
        _ => None,
    })
}

fn counts_in(block: &Map<String, Value>) -> Option<AiCounts> {
    let people = count(block, &["people", "human"])?;
    let vehicle = count(block, &["vehicle", "car"])?;
    let motion = count(block, &["motion", "md"]).unwrap_or(0);
    Some(AiCounts { people, vehicle, motion })
}

/// Counts from a camera API response: `[{"code": 0, "value": {...}}]`
pub fn extract_api_counts(response: &Value) -> Option<AiCounts> {
    let entry = response.as_array()?.first()?.as_object()?;
    if entry.get("code").and_then(Value::as_i64) != Some(0) {
        return None;
    }
    let value = entry.get("value")?.as_object()?;

    STATE_BLOCKS
        .iter()
        .filter_map(|key| value.get(*key).and_then(Value::as_object))
        .find_map(counts_in)
        .or_else(|| counts_in(value))
}

fn extract_counts(payload: &Value) -> Option<AiCounts> {
    if payload.is_array() {
        return extract_api_counts(payload);
    }
    let root = payload.as_object()?;
    match root.get("response") {
        Some(response) => extract_api_counts(response),
        None => counts_in(root),
    }
}

impl SourceAdapter for ReolinkAdapter {
    fn source(&self) -> &str {
        &self.source
    }

    fn normalize(&self, payload: &Value) -> Option<Event> {
        let counts = extract_counts(payload)?;

        let event_type = if counts.people > 0 {
            EventType::PersonDetected
        } else if counts.vehicle > 0 {
            EventType::VehicleDetected
        } else {
            return None;
        };

        let camera_id = payload
            .get("camera")
            .and_then(identifier)
            .or_else(|| payload.get("camera_id").and_then(identifier))
            .or_else(|| self.default_camera.clone())?;

        let ts = first_timestamp([payload.get("ts"), payload.get("timestamp")]).unwrap_or_else(Utc::now);

        let mut event = Event::new(self.source.clone(), camera_id, event_type, ts);
        for field in ["host", "channel", "cmd"] {
            if let Some(value) = payload.get(field).filter(|v| !v.is_null()) {
                event = event.with_meta(field, value.clone());
            }
        }
        Some(event)
    }
}
