//! # In-Memory Collaborators
//!
//! Reference implementations of every collaborator trait, backed by process
//! memory. They carry the engine's test suites and make embedded use
//! possible without any infrastructure; production deployments swap in their
//! own implementations trait by trait.

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use super::{
    DeliveryError, Directory, MarshalError, Marshaller, OutcomeValidator, Persistence,
    PersistenceError, ScriptError, ScriptEvaluator, SecurityError, SecurityEvaluator,
    ValidationError,
};
use crate::jobs::Job;
use crate::models::{AgentId, AgentProfile, ItemId, PropertyMap, TransactionKey};

#[derive(Debug, Clone)]
struct StagedWrite {
    item: ItemId,
    path: String,
    value: Value,
}

/// Transactional in-memory store with read-your-own-writes
#[derive(Default)]
pub struct MemoryStore {
    committed: RwLock<HashMap<ItemId, BTreeMap<String, Value>>>,
    staged: DashMap<TransactionKey, Vec<StagedWrite>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed value at a path, ignoring any open transactions
    pub fn committed_value(&self, item: ItemId, path: &str) -> Option<Value> {
        self.committed
            .read()
            .get(&item)
            .and_then(|records| records.get(path).cloned())
    }

    /// Committed paths of an item below a prefix, for assertions
    pub fn committed_paths_under(&self, item: ItemId, prefix: &str) -> Vec<String> {
        self.committed
            .read()
            .get(&item)
            .map(|records| {
                records
                    .keys()
                    .filter(|k| k.starts_with(prefix))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn open_transaction_count(&self) -> usize {
        self.staged.len()
    }
}

#[async_trait]
impl Persistence for MemoryStore {
    async fn get(
        &self,
        item: ItemId,
        path: &str,
        txn: Option<&TransactionKey>,
    ) -> Result<Option<Value>, PersistenceError> {
        if let Some(key) = txn {
            let staged = self
                .staged
                .get(key)
                .ok_or(PersistenceError::TransactionUnknown { key: *key })?;
            if let Some(write) = staged
                .iter()
                .rev()
                .find(|w| w.item == item && w.path == path)
            {
                return Ok(Some(write.value.clone()));
            }
        }
        Ok(self
            .committed
            .read()
            .get(&item)
            .and_then(|records| records.get(path).cloned()))
    }

    async fn put(
        &self,
        item: ItemId,
        path: &str,
        value: Value,
        txn: &TransactionKey,
    ) -> Result<(), PersistenceError> {
        let mut staged = self
            .staged
            .get_mut(txn)
            .ok_or(PersistenceError::TransactionUnknown { key: *txn })?;
        staged.push(StagedWrite {
            item,
            path: path.to_string(),
            value,
        });
        Ok(())
    }

    async fn begin(&self, txn: &TransactionKey) -> Result<(), PersistenceError> {
        if self.staged.contains_key(txn) {
            return Err(PersistenceError::TransactionAlreadyOpen { key: *txn });
        }
        self.staged.insert(*txn, Vec::new());
        Ok(())
    }

    async fn commit(&self, txn: &TransactionKey) -> Result<(), PersistenceError> {
        let (_, writes) = self
            .staged
            .remove(txn)
            .ok_or(PersistenceError::TransactionUnknown { key: *txn })?;
        let mut committed = self.committed.write();
        for write in writes {
            committed
                .entry(write.item)
                .or_default()
                .insert(write.path, write.value);
        }
        Ok(())
    }

    async fn abort(&self, txn: &TransactionKey) -> Result<(), PersistenceError> {
        self.staged
            .remove(txn)
            .ok_or(PersistenceError::TransactionUnknown { key: *txn })?;
        Ok(())
    }

    async fn clear_cache(&self, _item: ItemId, _prefix: Option<&str>) {
        // Nothing cached beyond the committed map itself
    }
}

/// Security evaluator honoring the step's `AgentRole` property, with an
/// optional per-step deny list for exercising permission failures
#[derive(Default)]
pub struct RoleTableSecurity {
    denied_steps: DashSet<String>,
}

impl RoleTableSecurity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deny_step(&self, step_path: impl Into<String>) {
        self.denied_steps.insert(step_path.into());
    }
}

#[async_trait]
impl SecurityEvaluator for RoleTableSecurity {
    async fn check_permissions(
        &self,
        _agent: &AgentProfile,
        step_path: &str,
        _item: ItemId,
        _txn: Option<&TransactionKey>,
    ) -> Result<bool, SecurityError> {
        Ok(!self.denied_steps.contains(step_path))
    }

    async fn performing_role(
        &self,
        properties: &PropertyMap,
        agent: &AgentProfile,
    ) -> Result<String, SecurityError> {
        match crate::models::prop_str(properties, "AgentRole") {
            Some(role) => {
                if agent.holds_role(role) {
                    Ok(role.to_string())
                } else {
                    Err(SecurityError::RoleNotHeld {
                        agent: agent.name.clone(),
                        role: role.to_string(),
                    })
                }
            }
            None => Ok(agent
                .roles
                .first()
                .cloned()
                .unwrap_or_else(|| agent.name.clone())),
        }
    }
}

/// Outcome validator backed by a table of required top-level fields
#[derive(Default)]
pub struct SchemaTableValidator {
    schemas: DashMap<(String, u32), Vec<String>>,
    permissive: bool,
}

impl SchemaTableValidator {
    /// Unknown schemas fail validation
    pub fn new() -> Self {
        Self::default()
    }

    /// Unknown schemas pass validation
    pub fn permissive() -> Self {
        Self {
            schemas: DashMap::new(),
            permissive: true,
        }
    }

    pub fn register(
        &self,
        schema: impl Into<String>,
        version: u32,
        required_fields: Vec<String>,
    ) {
        self.schemas.insert((schema.into(), version), required_fields);
    }
}

#[async_trait]
impl OutcomeValidator for SchemaTableValidator {
    async fn validate_and_check(
        &self,
        schema: &str,
        version: u32,
        outcome: &Value,
    ) -> Result<(), ValidationError> {
        let Some(required) = self.schemas.get(&(schema.to_string(), version)) else {
            if self.permissive {
                return Ok(());
            }
            return Err(ValidationError::SchemaUnknown {
                schema: schema.to_string(),
                version,
            });
        };
        let Some(object) = outcome.as_object() else {
            return Err(ValidationError::SchemaViolation {
                schema: schema.to_string(),
                reason: "outcome is not an object".to_string(),
            });
        };
        for field in required.iter() {
            if !object.contains_key(field) || object[field].is_null() {
                return Err(ValidationError::SchemaViolation {
                    schema: schema.to_string(),
                    reason: format!("missing required field '{field}'"),
                });
            }
        }
        Ok(())
    }
}

/// Signature of a registered script closure
pub type ScriptFn =
    Arc<dyn Fn(ItemId, &PropertyMap) -> Result<Value, ScriptError> + Send + Sync>;

/// Script evaluator holding named closures; contexts of the form
/// `literal:<text>` evaluate to the text without a registered script
#[derive(Default, Clone)]
pub struct ScriptHost {
    scripts: DashMap<String, ScriptFn>,
}

impl ScriptHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, name: impl Into<String>, script: F)
    where
        F: Fn(ItemId, &PropertyMap) -> Result<Value, ScriptError> + Send + Sync + 'static,
    {
        self.scripts.insert(name.into(), Arc::new(script));
    }
}

#[async_trait]
impl ScriptEvaluator for ScriptHost {
    async fn evaluate(
        &self,
        item: ItemId,
        properties: &PropertyMap,
        context: &str,
        _txn: Option<&TransactionKey>,
    ) -> Result<Value, ScriptError> {
        if let Some(literal) = context.strip_prefix("literal:") {
            return Ok(Value::String(literal.to_string()));
        }
        let script = self
            .scripts
            .get(context)
            .ok_or_else(|| ScriptError::Unknown {
                name: context.to_string(),
            })?;
        script(item, properties)
    }
}

/// JSON text marshaller
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonMarshaller;

impl Marshaller for JsonMarshaller {
    fn marshal(&self, value: &Value) -> Result<String, MarshalError> {
        serde_json::to_string(value).map_err(|e| MarshalError::Failed {
            message: e.to_string(),
        })
    }

    fn unmarshal(&self, text: &str) -> Result<Value, MarshalError> {
        serde_json::from_str(text).map_err(|e| MarshalError::Failed {
            message: e.to_string(),
        })
    }
}

/// Agent directory with per-agent job inboxes
#[derive(Default)]
pub struct MemoryDirectory {
    agents: DashMap<String, AgentProfile>,
    inboxes: DashMap<AgentId, Vec<Vec<Job>>>,
    failing: DashSet<String>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent and return its stored profile
    pub fn register(&self, profile: AgentProfile) -> AgentProfile {
        self.agents.insert(profile.name.clone(), profile.clone());
        profile
    }

    /// Make future deliveries to the named agent fail
    pub fn fail_delivery_for(&self, name: impl Into<String>) {
        self.failing.insert(name.into());
    }

    /// Job lists delivered to an agent so far, oldest first
    pub fn deliveries(&self, agent: AgentId) -> Vec<Vec<Job>> {
        self.inboxes
            .get(&agent)
            .map(|lists| lists.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Directory for MemoryDirectory {
    async fn agent_by_name(&self, name: &str) -> Result<AgentProfile, DeliveryError> {
        self.agents
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| DeliveryError::UnknownAgent {
                agent: name.to_string(),
            })
    }

    async fn agent_by_id(&self, id: AgentId) -> Result<AgentProfile, DeliveryError> {
        self.agents
            .iter()
            .find(|entry| entry.value().id == id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| DeliveryError::UnknownAgent {
                agent: id.to_string(),
            })
    }

    async fn agents_holding_role(&self, role: &str) -> Result<Vec<AgentProfile>, DeliveryError> {
        Ok(self
            .agents
            .iter()
            .filter(|entry| entry.value().holds_role(role))
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn deliver_jobs(
        &self,
        agent: &AgentProfile,
        jobs: Vec<Job>,
    ) -> Result<(), DeliveryError> {
        if self.failing.contains(&agent.name) {
            return Err(DeliveryError::Delivery {
                agent: agent.name.clone(),
                reason: "delivery channel unavailable".to_string(),
            });
        }
        self.inboxes.entry(agent.id).or_default().push(jobs);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_store_read_your_own_writes() {
        let store = MemoryStore::new();
        let item = ItemId::new();
        let txn = TransactionKey::new();
        store.begin(&txn).await.unwrap();
        store
            .put(item, "property/status", json!("open"), &txn)
            .await
            .unwrap();

        // Visible through the transaction, invisible outside it
        let inside = store.get(item, "property/status", Some(&txn)).await.unwrap();
        assert_eq!(inside, Some(json!("open")));
        let outside = store.get(item, "property/status", None).await.unwrap();
        assert_eq!(outside, None);

        store.commit(&txn).await.unwrap();
        let committed = store.get(item, "property/status", None).await.unwrap();
        assert_eq!(committed, Some(json!("open")));
    }

    #[tokio::test]
    async fn test_store_abort_discards_writes() {
        let store = MemoryStore::new();
        let item = ItemId::new();
        let txn = TransactionKey::new();
        store.begin(&txn).await.unwrap();
        store.put(item, "workflow", json!({}), &txn).await.unwrap();
        store.abort(&txn).await.unwrap();

        assert_eq!(store.get(item, "workflow", None).await.unwrap(), None);
        assert_eq!(store.open_transaction_count(), 0);
    }

    #[tokio::test]
    async fn test_store_rejects_unknown_transaction() {
        let store = MemoryStore::new();
        let item = ItemId::new();
        let txn = TransactionKey::new();
        let result = store.put(item, "workflow", json!({}), &txn).await;
        assert!(matches!(
            result,
            Err(PersistenceError::TransactionUnknown { .. })
        ));
    }

    #[tokio::test]
    async fn test_role_table_security() {
        let security = RoleTableSecurity::new();
        let agent = AgentProfile::new("alice", vec!["Author".to_string()]);
        let mut props = PropertyMap::new();
        props.insert("AgentRole".to_string(), json!("Author"));

        let role = security.performing_role(&props, &agent).await.unwrap();
        assert_eq!(role, "Author");

        props.insert("AgentRole".to_string(), json!("Reviewer"));
        assert!(security.performing_role(&props, &agent).await.is_err());
    }

    #[tokio::test]
    async fn test_schema_validator_required_fields() {
        let validator = SchemaTableValidator::new();
        validator.register("Report", 1, vec!["title".to_string()]);

        assert!(validator
            .validate_and_check("Report", 1, &json!({"title": "ok"}))
            .await
            .is_ok());
        assert!(validator
            .validate_and_check("Report", 1, &json!({"body": "no title"}))
            .await
            .is_err());
        assert!(validator
            .validate_and_check("Unknown", 1, &json!({}))
            .await
            .is_err());
        assert!(SchemaTableValidator::permissive()
            .validate_and_check("Unknown", 1, &json!({}))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_script_host_literals_and_scripts() {
        let host = ScriptHost::new();
        host.register("route", |_item, _props| Ok(json!("approve")));

        let item = ItemId::new();
        let props = PropertyMap::new();
        let from_script = host.evaluate(item, &props, "route", None).await.unwrap();
        assert_eq!(from_script, json!("approve"));

        let literal = host
            .evaluate(item, &props, "literal:A,B", None)
            .await
            .unwrap();
        assert_eq!(literal, json!("A,B"));

        assert!(host.evaluate(item, &props, "missing", None).await.is_err());
    }

    #[tokio::test]
    async fn test_directory_roles_and_failing_delivery() {
        let directory = MemoryDirectory::new();
        let alice = directory.register(AgentProfile::new("alice", vec!["Author".to_string()]));
        let bob = directory.register(AgentProfile::new("bob", vec!["Author".to_string()]));
        directory.fail_delivery_for("bob");

        let authors = directory.agents_holding_role("Author").await.unwrap();
        assert_eq!(authors.len(), 2);

        assert!(directory.deliver_jobs(&alice, vec![]).await.is_ok());
        assert!(directory.deliver_jobs(&bob, vec![]).await.is_err());
        assert_eq!(directory.deliveries(alice.id).len(), 1);
    }
}
