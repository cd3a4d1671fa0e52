//! # Machine Registry
//!
//! Process-wide read-through cache of machine definitions keyed by
//! name and version. Definitions are immutable once registered; upstream
//! change notifications call [`MachineRegistry::invalidate`] and re-register.

use dashmap::DashMap;
use std::sync::Arc;

use super::builtin;
use super::definition::StateMachineDef;
use crate::error::{not_found, Result};

/// Shared cache of state machine definitions
#[derive(Debug, Clone)]
pub struct MachineRegistry {
    cache: Arc<DashMap<(String, u32), Arc<StateMachineDef>>>,
}

impl MachineRegistry {
    /// Create a registry preloaded with the built-in machines
    pub fn new() -> Self {
        let registry = Self {
            cache: Arc::new(DashMap::new()),
        };
        for machine in [
            builtin::default_machine(),
            builtin::composite_machine(),
            builtin::predefined_machine(),
        ] {
            // Built-ins are validated by their own unit tests
            registry
                .cache
                .insert((machine.name.clone(), machine.version), Arc::new(machine));
        }
        registry
    }

    /// Validate and share a definition
    pub fn register(&self, machine: StateMachineDef) -> Result<()> {
        machine.validate()?;
        tracing::debug!(
            machine = %machine.name,
            version = machine.version,
            "Registering state machine definition"
        );
        self.cache
            .insert((machine.name.clone(), machine.version), Arc::new(machine));
        Ok(())
    }

    /// Resolve a definition by name and version
    pub fn resolve(&self, name: &str, version: u32) -> Result<Arc<StateMachineDef>> {
        self.cache
            .get(&(name.to_string(), version))
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| {
                not_found(format!("State machine '{name}' version {version} is not registered"))
            })
    }

    /// Drop a cached definition so the next resolve sees a re-registration
    pub fn invalidate(&self, name: &str, version: u32) {
        self.cache.remove(&(name.to_string(), version));
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

impl Default for MachineRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::definition::{StateDef, TransitionDef};

    #[test]
    fn test_builtins_preloaded() {
        let registry = MachineRegistry::new();
        assert!(registry.resolve(builtin::DEFAULT_MACHINE, 0).is_ok());
        assert!(registry.resolve(builtin::COMPOSITE_MACHINE, 0).is_ok());
        assert!(registry.resolve(builtin::PREDEFINED_MACHINE, 0).is_ok());
    }

    #[test]
    fn test_register_and_invalidate() {
        let registry = MachineRegistry::new();
        let machine = StateMachineDef::new("Review", 2, 0)
            .with_state(StateDef::new(0, "Open", false))
            .with_state(StateDef::new(1, "Accepted", true))
            .with_transition(TransitionDef::new(0, "Accept", 0, 1));
        registry.register(machine).unwrap();

        assert!(registry.resolve("Review", 2).is_ok());
        assert!(registry.resolve("Review", 1).is_err());

        registry.invalidate("Review", 2);
        assert!(registry.resolve("Review", 2).is_err());
    }

    #[test]
    fn test_invalid_machines_rejected() {
        let registry = MachineRegistry::new();
        let machine = StateMachineDef::new("Broken", 0, 5);
        assert!(registry.register(machine).is_err());
    }
}
