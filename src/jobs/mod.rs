// Job computation and delivery: ephemeral "agent A may fire transition T on
// step S of item I" values derived from live workflow state on demand. Jobs
// are never the source of truth; the workflow graph is.

pub mod calculator;
pub mod pusher;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::graph::VertexKind;
use crate::models::{Attachment, ItemId, PropertyMap};

pub use calculator::{calculate_all_jobs, calculate_jobs};
pub use pusher::JobPusher;

/// One executable transition for one agent, computed on demand
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub item: ItemId,
    pub step_path: String,
    pub step_name: String,
    pub step_kind: VertexKind,
    pub transition_id: i32,
    pub transition_name: String,
    /// Role the agent would perform the transition under
    pub role: String,
    /// Snapshot of the step's properties at computation time
    pub properties: PropertyMap,
    pub created_at: DateTime<Utc>,
    /// Outcome an agent attached before submitting the job back, if any
    #[serde(default)]
    pub outcome: Option<serde_json::Value>,
    #[serde(default)]
    pub attachment: Option<Attachment>,
}

impl Job {
    /// Short human-readable description for logs and deliveries
    pub fn describe(&self) -> String {
        format!(
            "{}:{} on {}",
            self.transition_name, self.transition_id, self.step_path
        )
    }
}
