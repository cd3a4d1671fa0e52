//! # State Machine Definitions
//!
//! A [`StateMachineDef`] is a pure description: named states flagged
//! finishing or not, and transitions between them with their requirement
//! flags. Definitions never change once registered; running workflows hold
//! them by `Arc` through the registry.

use serde::{Deserialize, Serialize};

use crate::error::{invalid_data, invalid_transition, Result};

/// A named state within a machine definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateDef {
    pub id: i32,
    pub name: String,
    /// Reaching this state finishes the activity
    pub finishing: bool,
}

impl StateDef {
    pub fn new(id: i32, name: impl Into<String>, finishing: bool) -> Self {
        Self {
            id,
            name: name.into(),
            finishing,
        }
    }
}

/// Whether a transition consumes an outcome payload
///
/// The schema reference may be left to the activity's own properties
/// (`SchemaType`/`SchemaVersion`) by passing `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutcomeRequirement {
    None,
    Optional {
        schema: Option<String>,
        version: u32,
    },
    Required {
        schema: Option<String>,
        version: u32,
    },
}

impl OutcomeRequirement {
    pub fn is_required(&self) -> bool {
        matches!(self, Self::Required { .. })
    }

    pub fn admits_payload(&self) -> bool {
        !matches!(self, Self::None)
    }

    /// Schema reference declared on the transition itself, if any
    pub fn schema(&self) -> Option<(&str, u32)> {
        match self {
            Self::Optional {
                schema: Some(s),
                version,
            }
            | Self::Required {
                schema: Some(s),
                version,
            } => Some((s.as_str(), *version)),
            _ => None,
        }
    }
}

/// What a successful transition does to the activity's agent reservation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationRule {
    Preserve,
    Set,
    Clear,
}

/// A named state change within a machine definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionDef {
    pub id: i32,
    pub name: String,
    pub origin: i32,
    pub target: i32,
    #[serde(default = "OutcomeRequirement::default")]
    pub outcome: OutcomeRequirement,
    /// Script run against the payload during the request, by name
    #[serde(default)]
    pub script: Option<String>,
    /// Query evaluated to produce the payload when none is supplied
    #[serde(default)]
    pub query: Option<String>,
    /// Role required on top of the activity's own role property
    #[serde(default)]
    pub required_role: Option<String>,
    /// Transition fired with the failure description when this one fails
    #[serde(default)]
    pub error_transition: Option<i32>,
    #[serde(default = "ReservationRule::default")]
    pub reservation: ReservationRule,
    /// Re-runs a composite's sub-graph from its start vertex
    #[serde(default)]
    pub reinitializing: bool,
    /// Excluded from automatic firing
    #[serde(default)]
    pub blocking: bool,
    /// May abandon still-active children of a composite
    #[serde(default)]
    pub abortable: bool,
}

impl Default for OutcomeRequirement {
    fn default() -> Self {
        Self::None
    }
}

impl Default for ReservationRule {
    fn default() -> Self {
        Self::Preserve
    }
}

impl TransitionDef {
    pub fn new(id: i32, name: impl Into<String>, origin: i32, target: i32) -> Self {
        Self {
            id,
            name: name.into(),
            origin,
            target,
            outcome: OutcomeRequirement::None,
            script: None,
            query: None,
            required_role: None,
            error_transition: None,
            reservation: ReservationRule::Preserve,
            reinitializing: false,
            blocking: false,
            abortable: false,
        }
    }

    pub fn with_outcome(mut self, outcome: OutcomeRequirement) -> Self {
        self.outcome = outcome;
        self
    }

    pub fn with_script(mut self, script: impl Into<String>) -> Self {
        self.script = Some(script.into());
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn with_required_role(mut self, role: impl Into<String>) -> Self {
        self.required_role = Some(role.into());
        self
    }

    pub fn with_error_transition(mut self, id: i32) -> Self {
        self.error_transition = Some(id);
        self
    }

    pub fn with_reservation(mut self, rule: ReservationRule) -> Self {
        self.reservation = rule;
        self
    }

    pub fn reinitializing(mut self) -> Self {
        self.reinitializing = true;
        self
    }

    pub fn blocking(mut self) -> Self {
        self.blocking = true;
        self
    }

    pub fn abortable(mut self) -> Self {
        self.abortable = true;
        self
    }
}

/// Immutable, versioned machine definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateMachineDef {
    pub name: String,
    pub version: u32,
    pub initial_state: i32,
    states: Vec<StateDef>,
    transitions: Vec<TransitionDef>,
}

impl StateMachineDef {
    pub fn new(name: impl Into<String>, version: u32, initial_state: i32) -> Self {
        Self {
            name: name.into(),
            version,
            initial_state,
            states: Vec::new(),
            transitions: Vec::new(),
        }
    }

    pub fn with_state(mut self, state: StateDef) -> Self {
        self.states.push(state);
        self
    }

    pub fn with_transition(mut self, transition: TransitionDef) -> Self {
        self.transitions.push(transition);
        self
    }

    /// Check internal consistency before the definition is shared
    pub fn validate(&self) -> Result<()> {
        for (i, state) in self.states.iter().enumerate() {
            if self.states[..i].iter().any(|s| s.id == state.id) {
                return Err(invalid_data(format!(
                    "Machine '{}' declares state id {} twice",
                    self.name, state.id
                )));
            }
        }
        for (i, t) in self.transitions.iter().enumerate() {
            if self.transitions[..i].iter().any(|other| other.id == t.id) {
                return Err(invalid_data(format!(
                    "Machine '{}' declares transition id {} twice",
                    self.name, t.id
                )));
            }
            for state in [t.origin, t.target] {
                if !self.states.iter().any(|s| s.id == state) {
                    return Err(invalid_data(format!(
                        "Machine '{}' transition '{}' references unknown state {state}",
                        self.name, t.name
                    )));
                }
            }
            if let Some(err_id) = t.error_transition {
                if !self.transitions.iter().any(|other| other.id == err_id) {
                    return Err(invalid_data(format!(
                        "Machine '{}' transition '{}' references unknown error transition {err_id}",
                        self.name, t.name
                    )));
                }
            }
        }
        self.state(self.initial_state)?;
        Ok(())
    }

    pub fn state(&self, id: i32) -> Result<&StateDef> {
        self.states.iter().find(|s| s.id == id).ok_or_else(|| {
            invalid_data(format!("Machine '{}' has no state {id}", self.name))
        })
    }

    pub fn transition(&self, id: i32) -> Result<&TransitionDef> {
        self.transitions.iter().find(|t| t.id == id).ok_or_else(|| {
            invalid_transition(format!("Machine '{}' has no transition {id}", self.name))
        })
    }

    pub fn transitions(&self) -> &[TransitionDef] {
        &self.transitions
    }

    /// Resolve old and new state for firing a transition from `current`
    pub fn traverse(&self, current: i32, transition_id: i32) -> Result<(i32, i32)> {
        let transition = self.transition(transition_id)?;
        if transition.origin != current {
            return Err(invalid_transition(format!(
                "Transition '{}' of machine '{}' starts at state '{}', not '{}'",
                transition.name,
                self.name,
                self.state_name(transition.origin),
                self.state_name(current),
            )));
        }
        Ok((transition.origin, transition.target))
    }

    /// Transitions fireable from the given state
    pub fn possible_transitions(&self, state: i32) -> Vec<&TransitionDef> {
        self.transitions.iter().filter(|t| t.origin == state).collect()
    }

    /// Whether firing the transition finishes the activity
    pub fn is_finishing(&self, transition: &TransitionDef) -> bool {
        self.state(transition.target).map(|s| s.finishing).unwrap_or(false)
    }

    /// Whether the state code marks a finished activity
    pub fn is_finished_state(&self, state: i32) -> bool {
        self.state(state).map(|s| s.finishing).unwrap_or(false)
    }

    pub fn state_name(&self, id: i32) -> String {
        self.state(id)
            .map(|s| s.name.clone())
            .unwrap_or_else(|_| format!("#{id}"))
    }
}
