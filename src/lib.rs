pub mod adapters;
pub mod config;
pub mod dedupe;
pub mod error;
pub mod events;
pub mod messaging;
pub mod notify;
pub mod orchestrator;

// Re-export main components for easier use
pub use adapters::{FrigateAdapter, ReolinkAdapter, SourceAdapter};
pub use dedupe::{DedupeAggregator, SharedAggregator};
pub use error::Error;
pub use events::{Event, EventSummary, EventType};
pub use orchestrator::{Orchestrator, Route};
