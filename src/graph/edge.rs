use serde::{Deserialize, Serialize};

use super::vertex::VertexId;

/// Edge classification
///
/// Back edges close loops; reachability and start-vertex detection ignore
/// them so loop bodies still form a well-founded forward order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    Forward,
    Back,
}

/// Directed link between two vertices of the same graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub id: u32,
    pub source: VertexId,
    pub target: VertexId,
    /// Alias label splits match their routing tokens against
    #[serde(default)]
    pub alias: String,
    pub kind: EdgeKind,
}

impl Edge {
    pub fn is_back(&self) -> bool {
        self.kind == EdgeKind::Back
    }
}
