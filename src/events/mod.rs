// Event system: persisted per-item history records plus an in-process
// broadcast channel for lifecycle observability.

pub mod publisher;
pub mod record;

pub use publisher::{EventPublisher, PublishedEvent};
pub use record::{next_event_id, paths, Event, Viewpoint};
