use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::{prop_str, AgentId, PropertyMap};

/// Vertex identifier, unique within one workflow graph
pub type VertexId = u32;

/// Closed set of vertex behaviors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VertexKind {
    /// Leaf step with its own state machine
    Atomic,
    /// Step containing a sub-graph of further vertices
    Composite,
    /// Follows all outgoing edges matching the routing result
    OrSplit,
    /// Follows exactly one outgoing edge matching the routing result
    XOrSplit,
    /// Follows every outgoing edge unconditionally
    AndSplit,
    /// Routes either forward or back over its loop edge
    LoopSplit,
    /// Synchronization point blocking until all predecessor branches finish
    Join,
    /// Structural pass-through
    Route,
}

impl VertexKind {
    /// Whether this vertex carries a state machine and runtime state
    pub fn is_activity(&self) -> bool {
        matches!(self, Self::Atomic | Self::Composite)
    }

    /// Whether this vertex selects outgoing edges by routing
    pub fn is_split(&self) -> bool {
        matches!(
            self,
            Self::OrSplit | Self::XOrSplit | Self::AndSplit | Self::LoopSplit
        )
    }
}

impl fmt::Display for VertexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Atomic => write!(f, "atomic"),
            Self::Composite => write!(f, "composite"),
            Self::OrSplit => write!(f, "or_split"),
            Self::XOrSplit => write!(f, "xor_split"),
            Self::AndSplit => write!(f, "and_split"),
            Self::LoopSplit => write!(f, "loop_split"),
            Self::Join => write!(f, "join"),
            Self::Route => write!(f, "route"),
        }
    }
}

impl std::str::FromStr for VertexKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "atomic" => Ok(Self::Atomic),
            "composite" => Ok(Self::Composite),
            "or_split" => Ok(Self::OrSplit),
            "xor_split" => Ok(Self::XOrSplit),
            "and_split" => Ok(Self::AndSplit),
            "loop_split" => Ok(Self::LoopSplit),
            "join" => Ok(Self::Join),
            "route" => Ok(Self::Route),
            _ => Err(format!("Invalid vertex kind: {s}")),
        }
    }
}

/// Node in a workflow graph
///
/// Structural vertices (splits, joins, routes) carry the same record but only
/// use the `active` flag; state machine fields stay at their defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vertex {
    pub id: VertexId,
    pub name: String,
    pub kind: VertexKind,
    #[serde(default)]
    pub properties: PropertyMap,
    /// Owning composite; `None` only for the graph root
    pub parent: Option<VertexId>,
    /// Matches a LoopSplit with its Join so re-entrant loop bodies stay bounded
    #[serde(default)]
    pub pairing_id: Option<u32>,

    /// Current state machine state code
    #[serde(default)]
    pub state: i32,
    /// Eligible for execution
    #[serde(default)]
    pub active: bool,
    /// When the current state was entered
    pub state_entered_at: DateTime<Utc>,
    /// Agent holding a reservation on this step, if any
    #[serde(default)]
    pub reservation: Option<AgentId>,
}

impl Vertex {
    pub fn new(id: VertexId, name: impl Into<String>, kind: VertexKind) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
            properties: PropertyMap::new(),
            parent: None,
            pairing_id: None,
            state: 0,
            active: false,
            state_entered_at: Utc::now(),
            reservation: None,
        }
    }

    /// State machine reference: explicit properties win, kind default otherwise
    pub fn machine_ref(&self) -> (String, u32) {
        let name = prop_str(&self.properties, "StateMachineName")
            .map(str::to_string)
            .unwrap_or_else(|| match self.kind {
                VertexKind::Composite => crate::machine::COMPOSITE_MACHINE.to_string(),
                _ => crate::machine::DEFAULT_MACHINE.to_string(),
            });
        let version = self
            .properties
            .get("StateMachineVersion")
            .and_then(serde_json::Value::as_u64)
            .map_or(0, |v| v as u32);
        (name, version)
    }

    /// Reset runtime state to the machine's initial state
    pub fn reset(&mut self, initial_state: i32) {
        self.state = initial_state;
        self.active = false;
        self.reservation = None;
        self.state_entered_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert!(VertexKind::Atomic.is_activity());
        assert!(VertexKind::Composite.is_activity());
        assert!(!VertexKind::Join.is_activity());
        assert!(VertexKind::LoopSplit.is_split());
        assert!(!VertexKind::Route.is_split());
    }

    #[test]
    fn test_kind_string_conversion() {
        assert_eq!(VertexKind::XOrSplit.to_string(), "xor_split");
        assert_eq!(
            "loop_split".parse::<VertexKind>().unwrap(),
            VertexKind::LoopSplit
        );
        assert!("unknown".parse::<VertexKind>().is_err());
    }

    #[test]
    fn test_machine_ref_defaults() {
        let vertex = Vertex::new(1, "Draft", VertexKind::Atomic);
        let (name, version) = vertex.machine_ref();
        assert_eq!(name, crate::machine::DEFAULT_MACHINE);
        assert_eq!(version, 0);

        let composite = Vertex::new(2, "domain", VertexKind::Composite);
        assert_eq!(composite.machine_ref().0, crate::machine::COMPOSITE_MACHINE);
    }

    #[test]
    fn test_machine_ref_from_properties() {
        let mut vertex = Vertex::new(1, "Draft", VertexKind::Atomic);
        vertex.properties.insert(
            "StateMachineName".to_string(),
            serde_json::Value::String("Review".to_string()),
        );
        vertex.properties.insert(
            "StateMachineVersion".to_string(),
            serde_json::Value::from(3u32),
        );
        assert_eq!(vertex.machine_ref(), ("Review".to_string(), 3));
    }
}
