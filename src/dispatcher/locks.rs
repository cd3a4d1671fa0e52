//! Item-scoped advisory locks.
//!
//! One lock per item, shared through a registry; every engine instance of a
//! deployment must share the registry for the single-writer guarantee to
//! hold. Acquisition is bounded and fails closed.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::timeout;

use crate::error::{EngineError, Result};
use crate::models::ItemId;

/// Registry of per-item exclusive locks
#[derive(Debug, Default, Clone)]
pub struct LockRegistry {
    locks: Arc<DashMap<ItemId, Arc<Mutex<()>>>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the item's lock within the bound, failing closed on timeout
    pub async fn acquire(&self, item: ItemId, bound: Duration) -> Result<OwnedMutexGuard<()>> {
        let lock = {
            let entry = self
                .locks
                .entry(item)
                .or_insert_with(|| Arc::new(Mutex::new(())));
            Arc::clone(entry.value())
        };
        timeout(bound, lock.lock_owned())
            .await
            .map_err(|_| EngineError::LockTimeout {
                item,
                timeout_ms: bound.as_millis() as u64,
            })
    }
}
