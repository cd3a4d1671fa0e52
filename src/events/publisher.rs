use serde_json::Value;
use tokio::sync::broadcast;

/// Lifecycle event names published by the engine
pub mod lifecycle {
    pub const TRANSITION_COMMITTED: &str = "transition.committed";
    pub const TRANSITION_FAILED: &str = "transition.failed";
    pub const JOBS_PUSHED: &str = "jobs.pushed";
}

/// In-process publisher for lifecycle events
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<PublishedEvent>,
}

/// Event that has been published
#[derive(Debug, Clone)]
pub struct PublishedEvent {
    pub name: String,
    pub context: Value,
    pub published_at: chrono::DateTime<chrono::Utc>,
}

impl EventPublisher {
    /// Create a new event publisher with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event with the given name and context
    ///
    /// Publishing with no subscribers is acceptable and not an error.
    pub fn publish(&self, event_name: impl Into<String>, context: Value) {
        let event = PublishedEvent {
            name: event_name.into(),
            context,
            published_at: chrono::Utc::now(),
        };
        let _ = self.sender.send(event);
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(1000)
    }
}
