//! Source adapters: raw detector payloads in, canonical [`Event`]s out.
//!
//! An adapter never fails. Anything it cannot turn into an event is logged
//! and dropped.

pub mod coerce;
pub mod frigate;
pub mod reolink;

use crate::events::Event;
use log::{debug, warn};
use serde_json::Value;

pub use frigate::FrigateAdapter;
pub use reolink::ReolinkAdapter;

/// Converts one detector's payloads into events
pub trait SourceAdapter: Send + Sync {
    /// Name stamped on every event this adapter produces
    fn source(&self) -> &str;

    /// Produce zero or one event from an already-decoded payload
    fn normalize(&self, payload: &Value) -> Option<Event>;

    /// Decode a raw broker message and normalize it
    fn handle_message(&self, topic: &str, raw: &[u8]) -> Option<Event> {
        let payload = decode_payload(topic, raw)?;
        let event = self.normalize(&payload);
        if event.is_none() {
            debug!("Ignoring unrecognized {} payload on {}: {}", self.source(), topic, payload);
        }
        event
    }
}

/// Decode UTF-8 JSON, logging and discarding anything else
pub fn decode_payload(topic: &str, raw: &[u8]) -> Option<Value> {
    let text = match std::str::from_utf8(raw) {
        Ok(text) => text,
        Err(e) => {
            warn!("Ignoring message with undecodable payload on {}: {}", topic, e);
            return None;
        }
    };

    match serde_json::from_str::<Value>(text) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Ignoring non-JSON payload on {}: {} ({})", topic, text, e);
            None
        }
    }
}
