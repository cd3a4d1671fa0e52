//! # Engine Configuration
//!
//! Explicit, validated configuration for the engine. Values come from an
//! optional config file plus `ITEMFLOW_`-prefixed environment overrides; the
//! defaults are usable as-is for embedded and test deployments.

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{EngineError, Result};

/// Name the engine acts under when firing automatic composite transitions
pub const SYSTEM_AGENT: &str = "system";

/// Runtime configuration for the workflow engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on waiting for an item's exclusive lock, in milliseconds
    pub lock_timeout_ms: u64,
    /// Validate supplied outcomes against their registered schema
    pub validate_outcomes: bool,
    /// Run the compensating error transition when a request fails
    pub error_transitions_enabled: bool,
    /// Push recomputed job lists to role holders after commits
    pub job_push_enabled: bool,
    /// Capacity of the in-process lifecycle event channel
    pub event_channel_capacity: usize,
    /// Agent name used for automatic composite start/finish transitions
    pub system_agent_name: String,
    /// Upper bound on cascading follow-up requests queued by one transition
    pub max_followup_depth: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 5_000,
            validate_outcomes: true,
            error_transitions_enabled: true,
            job_push_enabled: true,
            event_channel_capacity: 1_000,
            system_agent_name: SYSTEM_AGENT.to_string(),
            max_followup_depth: 8,
        }
    }
}

impl EngineConfig {
    /// Load configuration from the environment only
    pub fn from_env() -> Result<Self> {
        Self::build(None)
    }

    /// Load configuration from a file, with environment overrides applied on top
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::build(Some(path.as_ref()))
    }

    fn build(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        let loaded = builder
            .add_source(Environment::with_prefix("ITEMFLOW"))
            .build()
            .map_err(|e| EngineError::Internal {
                reason: format!("Configuration load failed: {e}"),
            })?;

        let config: Self = loaded
            .try_deserialize()
            .map_err(|e| EngineError::Internal {
                reason: format!("Configuration deserialization failed: {e}"),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot work at runtime
    pub fn validate(&self) -> Result<()> {
        if self.lock_timeout_ms == 0 {
            return Err(EngineError::Internal {
                reason: "lock_timeout_ms must be greater than zero".to_string(),
            });
        }
        if self.event_channel_capacity == 0 {
            return Err(EngineError::Internal {
                reason: "event_channel_capacity must be greater than zero".to_string(),
            });
        }
        if self.system_agent_name.is_empty() {
            return Err(EngineError::Internal {
                reason: "system_agent_name must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Lock acquisition bound as a [`Duration`]
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.lock_timeout(), Duration::from_millis(5_000));
        assert_eq!(config.system_agent_name, SYSTEM_AGENT);
    }

    #[test]
    fn test_zero_lock_timeout_rejected() {
        let config = EngineConfig {
            lock_timeout_ms: 0,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_serde_round_trip() {
        let config = EngineConfig {
            validate_outcomes: false,
            ..EngineConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let parsed: EngineConfig = serde_json::from_str(&json).unwrap();
        assert!(!parsed.validate_outcomes);
        assert_eq!(parsed.lock_timeout_ms, 5_000);
    }
}
