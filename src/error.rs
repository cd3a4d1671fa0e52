//! # Engine Error Types
//!
//! Structured error handling for the workflow engine using thiserror
//! instead of `Box<dyn Error>` patterns.
//!
//! Every failure a caller can observe is one of the [`EngineError`] variants;
//! collaborator-specific errors convert into the taxonomy via `From` so the
//! dispatcher always surfaces a single typed failure per request.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::collaborators::{
    DeliveryError, MarshalError, PersistenceError, ScriptError, SecurityError, ValidationError,
};
use crate::models::ItemId;

/// Convenient result alias used throughout the crate
pub type Result<T> = std::result::Result<T, EngineError>;

/// Engine error taxonomy
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Access denied: {reason}")]
    AccessRights { reason: String },

    #[error("Invalid transition: {reason}")]
    InvalidTransition { reason: String },

    #[error("Invalid data: {reason}")]
    InvalidData { reason: String },

    #[error("Not found: {reason}")]
    ObjectNotFound { reason: String },

    #[error("Persistence failure: {reason}")]
    Persistency { reason: String },

    #[error("Cardinality violation: {reason}")]
    Cardinality { reason: String },

    #[error("Could not lock item {item} within {timeout_ms}ms")]
    LockTimeout { item: ItemId, timeout_ms: u64 },

    #[error("Internal engine error: {reason}")]
    Internal { reason: String },
}

impl EngineError {
    /// Short class name used in structured failures and event payloads
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AccessRights { .. } => "access_rights",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::InvalidData { .. } => "invalid_data",
            Self::ObjectNotFound { .. } => "object_not_found",
            Self::Persistency { .. } => "persistency",
            Self::Cardinality { .. } => "cardinality",
            Self::LockTimeout { .. } => "lock_timeout",
            Self::Internal { .. } => "internal",
        }
    }
}

/// Create an access-rights failure
pub fn access_denied(reason: impl Into<String>) -> EngineError {
    EngineError::AccessRights {
        reason: reason.into(),
    }
}

/// Create an invalid-transition failure
pub fn invalid_transition(reason: impl Into<String>) -> EngineError {
    EngineError::InvalidTransition {
        reason: reason.into(),
    }
}

/// Create an invalid-data failure
pub fn invalid_data(reason: impl Into<String>) -> EngineError {
    EngineError::InvalidData {
        reason: reason.into(),
    }
}

/// Create a not-found failure
pub fn not_found(reason: impl Into<String>) -> EngineError {
    EngineError::ObjectNotFound {
        reason: reason.into(),
    }
}

/// Create a persistence failure
pub fn persistency(reason: impl Into<String>) -> EngineError {
    EngineError::Persistency {
        reason: reason.into(),
    }
}

/// Create a cardinality failure
pub fn cardinality(reason: impl Into<String>) -> EngineError {
    EngineError::Cardinality {
        reason: reason.into(),
    }
}

impl From<PersistenceError> for EngineError {
    fn from(err: PersistenceError) -> Self {
        match err {
            PersistenceError::NotFound { item, path } => EngineError::ObjectNotFound {
                reason: format!("No record at {path} for item {item}"),
            },
            other => EngineError::Persistency {
                reason: other.to_string(),
            },
        }
    }
}

impl From<SecurityError> for EngineError {
    fn from(err: SecurityError) -> Self {
        EngineError::AccessRights {
            reason: err.to_string(),
        }
    }
}

impl From<ValidationError> for EngineError {
    fn from(err: ValidationError) -> Self {
        EngineError::InvalidData {
            reason: err.to_string(),
        }
    }
}

impl From<ScriptError> for EngineError {
    fn from(err: ScriptError) -> Self {
        EngineError::InvalidData {
            reason: err.to_string(),
        }
    }
}

impl From<DeliveryError> for EngineError {
    fn from(err: DeliveryError) -> Self {
        EngineError::ObjectNotFound {
            reason: err.to_string(),
        }
    }
}

impl From<MarshalError> for EngineError {
    fn from(err: MarshalError) -> Self {
        EngineError::InvalidData {
            reason: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::InvalidData {
            reason: format!("Serialization failed: {err}"),
        }
    }
}

/// Serializable description of an engine failure
///
/// Handed to error transitions as their payload and returned to callers next
/// to the typed error, so remote agents see one stable shape regardless of
/// which collaborator failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredFailure {
    pub kind: String,
    pub message: String,
    pub step_path: Option<String>,
    pub transition_id: Option<i32>,
    pub occurred_at: DateTime<Utc>,
}

impl StructuredFailure {
    /// Describe an error raised while requesting a transition on a step
    pub fn from_error(
        error: &EngineError,
        step_path: Option<String>,
        transition_id: Option<i32>,
    ) -> Self {
        Self {
            kind: error.kind().to_string(),
            message: error.to_string(),
            step_path,
            transition_id,
            occurred_at: Utc::now(),
        }
    }
}

impl std::fmt::Display for StructuredFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.step_path {
            Some(path) => write!(f, "[{}] {} at {path}", self.kind, self.message),
            None => write!(f, "[{}] {}", self.kind, self.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = access_denied("agent lacks role Author");
        assert_eq!(err.to_string(), "Access denied: agent lacks role Author");
        assert_eq!(err.kind(), "access_rights");

        let err = invalid_transition("unknown transition 7");
        assert_eq!(err.kind(), "invalid_transition");
    }

    #[test]
    fn test_collaborator_error_conversion() {
        let sec = SecurityError::RoleNotHeld {
            agent: "alice".to_string(),
            role: "Author".to_string(),
        };
        let engine: EngineError = sec.into();
        assert!(matches!(engine, EngineError::AccessRights { .. }));
    }

    #[test]
    fn test_structured_failure_round_trip() {
        let failure = StructuredFailure::from_error(
            &invalid_data("missing required outcome"),
            Some("workflow/domain/Draft".to_string()),
            Some(1),
        );
        let json = serde_json::to_string(&failure).unwrap();
        let parsed: StructuredFailure = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.kind, "invalid_data");
        assert_eq!(parsed.step_path.as_deref(), Some("workflow/domain/Draft"));
    }
}
