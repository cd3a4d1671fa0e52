//! # Core Model Types
//!
//! Identifiers and small value objects shared across the engine: item and
//! agent ids, transaction keys, attachments, and the string-keyed property
//! bag carried by workflow vertices.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Identifier of a persistent business item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub Uuid);

impl ItemId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of an acting agent (human or system)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub Uuid);

impl AgentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AgentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Directory entry for an agent: identity plus the roles it holds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProfile {
    pub id: AgentId,
    pub name: String,
    pub roles: Vec<String>,
}

impl AgentProfile {
    pub fn new(name: impl Into<String>, roles: Vec<String>) -> Self {
        Self {
            id: AgentId::new(),
            name: name.into(),
            roles,
        }
    }

    pub fn holds_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// Opaque token identifying one item's in-flight storage transaction
///
/// Reads performed under the key see uncommitted writes staged by the same
/// logical operation (snapshot isolation scoped to one item).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionKey(pub Uuid);

impl TransactionKey {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TransactionKey {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Binary or structured payload attached to a transition alongside the outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

impl Attachment {
    pub fn new(name: impl Into<String>, content_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            data,
        }
    }
}

/// String-keyed configuration bag carried by every workflow vertex
pub type PropertyMap = HashMap<String, Value>;

/// Read a property as a string slice, accepting only JSON strings
pub fn prop_str<'a>(props: &'a PropertyMap, key: &str) -> Option<&'a str> {
    props.get(key).and_then(Value::as_str)
}

/// Read a property as a boolean, accepting JSON booleans and "true"/"false" strings
pub fn prop_bool(props: &PropertyMap, key: &str) -> Option<bool> {
    match props.get(key) {
        Some(Value::Bool(b)) => Some(*b),
        Some(Value::String(s)) => match s.as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}
