//! # External Collaborator Interfaces
//!
//! The engine consumes its surroundings through narrow async traits:
//! persistence, security, outcome validation, script evaluation,
//! marshalling, and the agent directory. Everything behind these traits is
//! opaque to the core; the in-memory implementations in [`memory`] make the
//! engine runnable and testable without infrastructure.

pub mod memory;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::jobs::Job;
use crate::models::{AgentId, AgentProfile, ItemId, PropertyMap, TransactionKey};

/// Storage backend failures
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("No record at {path} for item {item}")]
    NotFound { item: ItemId, path: String },

    #[error("Unknown transaction {key}")]
    TransactionUnknown { key: TransactionKey },

    #[error("Transaction {key} is already open")]
    TransactionAlreadyOpen { key: TransactionKey },

    #[error("Storage failure: {message}")]
    Storage { message: String },
}

/// Security evaluator failures
#[derive(Debug, Error)]
pub enum SecurityError {
    #[error("Agent '{agent}' does not hold role '{role}'")]
    RoleNotHeld { agent: String, role: String },

    #[error("Agent '{agent}' may not act on step '{step}'")]
    PermissionDenied { agent: String, step: String },

    #[error("Agent '{agent}' is unknown to the security evaluator")]
    UnknownAgent { agent: String },
}

/// Outcome validation failures
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Schema '{schema}' version {version} is not registered")]
    SchemaUnknown { schema: String, version: u32 },

    #[error("Outcome violates schema '{schema}': {reason}")]
    SchemaViolation { schema: String, reason: String },
}

/// Script and query evaluation failures
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("Script '{name}' is not registered")]
    Unknown { name: String },

    #[error("Script '{name}' failed: {reason}")]
    Evaluation { name: String, reason: String },
}

/// Marshalling failures
#[derive(Debug, Error)]
pub enum MarshalError {
    #[error("Marshalling failed: {message}")]
    Failed { message: String },
}

/// Agent directory and job delivery failures
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Agent '{agent}' cannot be resolved")]
    UnknownAgent { agent: String },

    #[error("No agent holds role '{role}'")]
    UnknownRole { role: String },

    #[error("Job delivery to agent '{agent}' failed: {reason}")]
    Delivery { agent: String, reason: String },
}

/// Pluggable key/value persistence, keyed by item id and a logical path
///
/// Implementations must support read-your-own-writes: a `get` carrying an
/// open transaction key sees values `put` under the same key before commit.
#[async_trait]
pub trait Persistence: Send + Sync {
    async fn get(
        &self,
        item: ItemId,
        path: &str,
        txn: Option<&TransactionKey>,
    ) -> Result<Option<Value>, PersistenceError>;

    async fn put(
        &self,
        item: ItemId,
        path: &str,
        value: Value,
        txn: &TransactionKey,
    ) -> Result<(), PersistenceError>;

    async fn begin(&self, txn: &TransactionKey) -> Result<(), PersistenceError>;

    async fn commit(&self, txn: &TransactionKey) -> Result<(), PersistenceError>;

    async fn abort(&self, txn: &TransactionKey) -> Result<(), PersistenceError>;

    /// Drop any cached reads for the item, optionally below one path prefix
    async fn clear_cache(&self, item: ItemId, prefix: Option<&str>);
}

/// Permission and role resolution
#[async_trait]
pub trait SecurityEvaluator: Send + Sync {
    /// Whether the agent may act on the step at all
    async fn check_permissions(
        &self,
        agent: &AgentProfile,
        step_path: &str,
        item: ItemId,
        txn: Option<&TransactionKey>,
    ) -> Result<bool, SecurityError>;

    /// The role the agent performs this step under, from the step's
    /// properties; fails when the agent does not qualify
    async fn performing_role(
        &self,
        properties: &PropertyMap,
        agent: &AgentProfile,
    ) -> Result<String, SecurityError>;
}

/// Schema-driven outcome validation
#[async_trait]
pub trait OutcomeValidator: Send + Sync {
    async fn validate_and_check(
        &self,
        schema: &str,
        version: u32,
        outcome: &Value,
    ) -> Result<(), ValidationError>;
}

/// Script and query evaluation against item data
#[async_trait]
pub trait ScriptEvaluator: Send + Sync {
    async fn evaluate(
        &self,
        item: ItemId,
        properties: &PropertyMap,
        context: &str,
        txn: Option<&TransactionKey>,
    ) -> Result<Value, ScriptError>;
}

/// Object ⇄ structured-text round trips for events, jobs, and failures
pub trait Marshaller: Send + Sync {
    fn marshal(&self, value: &Value) -> Result<String, MarshalError>;
    fn unmarshal(&self, text: &str) -> Result<Value, MarshalError>;
}

/// Agent lookup and job delivery
#[async_trait]
pub trait Directory: Send + Sync {
    async fn agent_by_name(&self, name: &str) -> Result<AgentProfile, DeliveryError>;

    async fn agent_by_id(&self, id: AgentId) -> Result<AgentProfile, DeliveryError>;

    async fn agents_holding_role(&self, role: &str) -> Result<Vec<AgentProfile>, DeliveryError>;

    async fn deliver_jobs(
        &self,
        agent: &AgentProfile,
        jobs: Vec<Job>,
    ) -> Result<(), DeliveryError>;
}
