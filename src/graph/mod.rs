// Graph model for per-item workflow instances.
//
// The graph is an arena of vertices indexed by integer id; parent and loop
// pairing relations are id-based lookups into the same arena so the whole
// structure serializes as one unit and stays cycle-safe.

pub mod arena;
pub mod edge;
pub mod verify;
pub mod vertex;

pub use arena::WorkflowGraph;
pub use edge::{Edge, EdgeKind};
pub use verify::verify;
pub use vertex::{Vertex, VertexId, VertexKind};
