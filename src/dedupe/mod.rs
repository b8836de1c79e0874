//! Windowed aggregation of detector events into confirmed incidents.
//!
//! Events are grouped by `(camera_id, event_type)`. Only the authoritative
//! detector can cause an emission; every other detector is corroborating
//! signal that may open or refine an incident but never emits on its own.

use crate::error::Error;
use crate::events::{Event, EventType};
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use log::{debug, info};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

type IncidentKey = (String, EventType);

#[derive(Debug, Clone)]
struct Incident {
    best_event: Event,
    first_seen: DateTime<Utc>,
    last_updated: DateTime<Utc>,
    /// Set once an authoritative event has been folded in
    confirmed: bool,
}

/// Stateful dedupe engine. Single writer; see [`SharedAggregator`].
#[derive(Debug)]
pub struct DedupeAggregator {
    window: Duration,
    authoritative: String,
    incidents: HashMap<IncidentKey, Incident>,
}

impl DedupeAggregator {
    /// Create an engine with the given window and authoritative detector
    pub fn new(window: Duration, authoritative_source: impl Into<String>) -> Self {
        Self {
            window,
            authoritative: authoritative_source.into(),
            incidents: HashMap::new(),
        }
    }

    /// Create an engine from a window expressed in seconds
    pub fn with_window_seconds(window_seconds: i64, authoritative_source: impl Into<String>) -> Result<Self> {
        let window = Duration::try_seconds(window_seconds)
            .filter(|window| *window > Duration::zero())
            .ok_or_else(|| Error::Config(format!("Invalid dedupe window: {}s", window_seconds)))?;
        Ok(Self::new(window, authoritative_source))
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn authoritative_source(&self) -> &str {
        &self.authoritative
    }

    /// Number of live incidents
    pub fn len(&self) -> usize {
        self.incidents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.incidents.is_empty()
    }

    fn is_authoritative(&self, event: &Event) -> bool {
        event.source == self.authoritative
    }

    /// Fold an event into its incident and decide whether to emit.
    ///
    /// Returns the incident's preferred event when `event` comes from the
    /// authoritative source, every time, including repeat confirmations.
    pub fn process(&mut self, event: Event) -> Option<Event> {
        let now = event.ts;
        self.purge(now);

        let authoritative = self.is_authoritative(&event);
        let key = event.key();
        let window = self.window;

        let live = self
            .incidents
            .get(&key)
            .map_or(false, |incident| now - incident.last_updated <= window);

        if live {
            if let Some(incident) = self.incidents.get_mut(&key) {
                incident.last_updated = now;
                if Self::is_preferred(&self.authoritative, &event, &incident.best_event) {
                    incident.best_event = event;
                }
                if authoritative {
                    incident.confirmed = true;
                }
            }
        } else {
            debug!("Opening incident for {}/{} from {}", key.0, key.1, event.source);
            self.incidents.insert(
                key.clone(),
                Incident {
                    best_event: event,
                    first_seen: now,
                    last_updated: now,
                    confirmed: authoritative,
                },
            );
        }

        if !authoritative {
            return None;
        }

        let best = self.incidents.get(&key).map(|incident| incident.best_event.clone());
        if let Some(best) = &best {
            debug!("Emitting incident for {}/{} (best source: {})", key.0, key.1, best.source);
        }
        best
    }

    /// Drop stale incidents as of `now`, returning how many were removed.
    ///
    /// An incident is stale when it has been inactive for longer than the
    /// window, or when it has gone a full window since opening without an
    /// authoritative confirmation.
    pub fn purge(&mut self, now: DateTime<Utc>) -> usize {
        let window = self.window;
        let before = self.incidents.len();

        self.incidents.retain(|(camera_id, event_type), incident| {
            if now - incident.last_updated > window {
                debug!("Purging inactive incident for {}/{}", camera_id, event_type);
                return false;
            }
            if !incident.confirmed && now - incident.first_seen >= window {
                info!(
                    "Dropping unconfirmed incident for {}/{}: {} signal without confirmation since {}",
                    camera_id,
                    event_type,
                    incident.best_event.source,
                    incident.first_seen.to_rfc3339()
                );
                return false;
            }
            true
        });

        before - self.incidents.len()
    }

    /// Whether `candidate` should replace `current` as the representative
    fn is_preferred(authoritative: &str, candidate: &Event, current: &Event) -> bool {
        if candidate.source == current.source {
            return candidate.ts >= current.ts;
        }
        if candidate.source == authoritative {
            return true;
        }
        if current.source == authoritative {
            return false;
        }
        candidate.ts >= current.ts
    }
}

/// Cloneable handle that serializes access to one [`DedupeAggregator`].
///
/// The lock covers the whole decide-and-mutate step of each call.
#[derive(Debug, Clone)]
pub struct SharedAggregator {
    inner: Arc<Mutex<DedupeAggregator>>,
}

impl SharedAggregator {
    pub fn new(aggregator: DedupeAggregator) -> Self {
        Self {
            inner: Arc::new(Mutex::new(aggregator)),
        }
    }

    pub fn process(&self, event: Event) -> Option<Event> {
        let mut aggregator = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        aggregator.process(event)
    }

    /// Number of live incidents
    pub fn len(&self) -> usize {
        match self.inner.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
