//! # Persisted History Records
//!
//! Every committed transition appends one [`Event`] to the item's history.
//! Outcomes, attachments, and viewpoints reference the event id, so the
//! event is always written first within the transaction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::collaborators::{Persistence, PersistenceError};
use crate::graph::VertexKind;
use crate::models::{AgentId, ItemId, TransactionKey};

/// Logical storage paths for the per-item records
pub mod paths {
    /// The serialized workflow graph, one unit per item
    pub const WORKFLOW: &str = "workflow";
    /// Next history sequence number
    pub const HISTORY_NEXT: &str = "history/next";

    pub fn history(event_id: u64) -> String {
        format!("history/{event_id}")
    }

    pub fn outcome(schema: &str, version: u32, event_id: u64) -> String {
        format!("outcome/{schema}/{version}/{event_id}")
    }

    pub fn attachment(schema: &str, version: u32, event_id: u64) -> String {
        format!("attachment/{schema}/{version}/{event_id}")
    }

    pub fn viewpoint(schema: &str, view: &str) -> String {
        format!("viewpoint/{schema}/{view}")
    }

    pub fn property(name: &str) -> String {
        format!("property/{name}")
    }
}

/// One committed transition in an item's history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: u64,
    pub item: ItemId,
    pub step_path: String,
    pub step_name: String,
    pub step_kind: VertexKind,
    pub transition_id: i32,
    pub transition_name: String,
    pub machine_name: String,
    pub machine_version: u32,
    pub origin_state: String,
    pub target_state: String,
    pub agent: AgentId,
    pub agent_name: String,
    pub role: String,
    /// View the outcome was filed under, when one was carried
    pub view: Option<String>,
    pub schema: Option<String>,
    pub schema_version: Option<u32>,
    pub has_attachment: bool,
    pub timestamp: DateTime<Utc>,
}

/// Named pointer to the latest qualifying outcome of a schema
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Viewpoint {
    pub schema: String,
    pub view: String,
    pub event_id: u64,
    pub updated_at: DateTime<Utc>,
}

/// Claim the next history sequence number for the item
///
/// Read-modify-write under the open transaction, so concurrent items never
/// contend and a single item is serialized by the dispatcher lock.
pub async fn next_event_id(
    store: &dyn Persistence,
    item: ItemId,
    txn: &TransactionKey,
) -> Result<u64, PersistenceError> {
    let next = store
        .get(item, paths::HISTORY_NEXT, Some(txn))
        .await?
        .and_then(|v| v.as_u64())
        .unwrap_or(0);
    store
        .put(item, paths::HISTORY_NEXT, serde_json::json!(next + 1), txn)
        .await?;
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::memory::MemoryStore;

    #[test]
    fn test_path_shapes() {
        assert_eq!(paths::history(4), "history/4");
        assert_eq!(paths::outcome("Report", 1, 4), "outcome/Report/1/4");
        assert_eq!(paths::viewpoint("Report", "last"), "viewpoint/Report/last");
        assert_eq!(paths::property("status"), "property/status");
    }

    #[tokio::test]
    async fn test_event_ids_are_sequential_within_a_transaction() {
        let store = MemoryStore::new();
        let item = ItemId::new();
        let txn = TransactionKey::new();
        store.begin(&txn).await.unwrap();

        assert_eq!(next_event_id(&store, item, &txn).await.unwrap(), 0);
        assert_eq!(next_event_id(&store, item, &txn).await.unwrap(), 1);
        store.commit(&txn).await.unwrap();

        let txn2 = TransactionKey::new();
        store.begin(&txn2).await.unwrap();
        assert_eq!(next_event_id(&store, item, &txn2).await.unwrap(), 2);
    }
}
