pub mod event;

pub use event::{Event, EventSummary, EventType};
