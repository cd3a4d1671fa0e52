//! Arena-backed workflow graph.
//!
//! One `WorkflowGraph` is the serialized unit of workflow state for an item:
//! every vertex, edge, parent pointer, and runtime state code lives here and
//! is written back to storage as a whole after each committed transition.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet, VecDeque};

use super::edge::{Edge, EdgeKind};
use super::vertex::{Vertex, VertexId, VertexKind};
use crate::error::{cardinality, not_found, Result};

/// Per-item workflow instance graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowGraph {
    vertices: BTreeMap<VertexId, Vertex>,
    edges: Vec<Edge>,
    root: VertexId,
    next_vertex_id: VertexId,
    next_edge_id: u32,
}

impl WorkflowGraph {
    /// Create a graph holding only a root composite with the given name
    pub fn new(root_name: impl Into<String>) -> Self {
        let mut vertices = BTreeMap::new();
        let root = Vertex::new(0, root_name, VertexKind::Composite);
        vertices.insert(0, root);
        Self {
            vertices,
            edges: Vec::new(),
            root: 0,
            next_vertex_id: 1,
            next_edge_id: 0,
        }
    }

    pub fn root(&self) -> VertexId {
        self.root
    }

    /// Add a vertex under the given composite parent
    pub fn add_vertex(
        &mut self,
        parent: VertexId,
        name: impl Into<String>,
        kind: VertexKind,
    ) -> Result<VertexId> {
        let parent_kind = self.vertex(parent)?.kind;
        if parent_kind != VertexKind::Composite {
            return Err(cardinality(format!(
                "Vertex {parent} is not a composite and cannot own children"
            )));
        }
        let id = self.next_vertex_id;
        self.next_vertex_id += 1;
        let mut vertex = Vertex::new(id, name, kind);
        vertex.parent = Some(parent);
        self.vertices.insert(id, vertex);
        Ok(id)
    }

    /// Add a directed edge between two vertices of the same composite
    pub fn add_edge(
        &mut self,
        source: VertexId,
        target: VertexId,
        alias: impl Into<String>,
        kind: EdgeKind,
    ) -> Result<u32> {
        let source_parent = self.vertex(source)?.parent;
        let target_parent = self.vertex(target)?.parent;
        if source_parent != target_parent {
            return Err(cardinality(format!(
                "Edge {source}->{target} crosses graph boundaries"
            )));
        }
        let id = self.next_edge_id;
        self.next_edge_id += 1;
        self.edges.push(Edge {
            id,
            source,
            target,
            alias: alias.into(),
            kind,
        });
        Ok(id)
    }

    pub fn vertex(&self, id: VertexId) -> Result<&Vertex> {
        self.vertices
            .get(&id)
            .ok_or_else(|| not_found(format!("Vertex {id} does not exist")))
    }

    pub fn vertex_mut(&mut self, id: VertexId) -> Result<&mut Vertex> {
        self.vertices
            .get_mut(&id)
            .ok_or_else(|| not_found(format!("Vertex {id} does not exist")))
    }

    pub fn vertices(&self) -> impl Iterator<Item = &Vertex> {
        self.vertices.values()
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn outgoing(&self, id: VertexId) -> Vec<&Edge> {
        self.edges.iter().filter(|e| e.source == id).collect()
    }

    pub fn incoming(&self, id: VertexId) -> Vec<&Edge> {
        self.edges.iter().filter(|e| e.target == id).collect()
    }

    /// Direct children of a composite, in id order
    pub fn children(&self, id: VertexId) -> Vec<VertexId> {
        self.vertices
            .values()
            .filter(|v| v.parent == Some(id))
            .map(|v| v.id)
            .collect()
    }

    /// All descendants of a composite, preorder
    pub fn descendants(&self, id: VertexId) -> Vec<VertexId> {
        let mut out = Vec::new();
        let mut stack: Vec<VertexId> = self.children(id);
        stack.reverse();
        while let Some(v) = stack.pop() {
            out.push(v);
            let mut kids = self.children(v);
            kids.reverse();
            stack.extend(kids);
        }
        out
    }

    /// The child a composite starts execution at: its only child without an
    /// incoming forward edge
    pub fn start_vertex(&self, composite: VertexId) -> Option<VertexId> {
        self.start_vertices(composite).into_iter().next()
    }

    /// Children without incoming forward edges
    ///
    /// Structured composites have exactly one (enforced by verify);
    /// unstructured containers run all of them.
    pub fn start_vertices(&self, composite: VertexId) -> Vec<VertexId> {
        self.children(composite)
            .into_iter()
            .filter(|&child| {
                !self
                    .incoming(child)
                    .iter()
                    .any(|e| e.kind == EdgeKind::Forward)
            })
            .collect()
    }

    /// Slash-separated path of a vertex from the root
    pub fn path_of(&self, id: VertexId) -> Result<String> {
        let mut segments = Vec::new();
        let mut current = Some(id);
        while let Some(v) = current {
            let vertex = self.vertex(v)?;
            segments.push(vertex.name.clone());
            current = vertex.parent;
        }
        segments.reverse();
        Ok(segments.join("/"))
    }

    /// Resolve a slash-separated path starting at the root vertex name
    pub fn find_by_path(&self, path: &str) -> Result<VertexId> {
        let mut segments = path.split('/').filter(|s| !s.is_empty());
        let root_name = segments
            .next()
            .ok_or_else(|| not_found("Empty step path"))?;
        let root = self.vertex(self.root)?;
        if root.name != root_name {
            return Err(not_found(format!(
                "Path root '{root_name}' does not match workflow root '{}'",
                root.name
            )));
        }
        let mut current = self.root;
        for segment in segments {
            current = self
                .children(current)
                .into_iter()
                .find(|&c| {
                    self.vertices
                        .get(&c)
                        .is_some_and(|v| v.name == segment)
                })
                .ok_or_else(|| {
                    not_found(format!("Step '{segment}' does not exist in path '{path}'"))
                })?;
        }
        Ok(current)
    }

    /// Activity vertices upstream of a join, bounded by its paired split
    ///
    /// Walks incoming forward edges breadth-first; a vertex whose pairing id
    /// equals `pairing` (the originating LoopSplit or split) stops the walk
    /// on that branch, so re-entrant loop bodies gate only their own span.
    pub fn upstream_activities(&self, join: VertexId, pairing: Option<u32>) -> Vec<VertexId> {
        let mut seen: HashSet<VertexId> = HashSet::new();
        let mut queue: VecDeque<VertexId> = VecDeque::new();
        let mut out = Vec::new();
        queue.push_back(join);
        seen.insert(join);
        while let Some(v) = queue.pop_front() {
            for edge in self.incoming(v) {
                if edge.kind != EdgeKind::Forward {
                    continue;
                }
                let pred = edge.source;
                if !seen.insert(pred) {
                    continue;
                }
                let Ok(vertex) = self.vertex(pred) else {
                    continue;
                };
                if vertex.kind.is_activity() {
                    out.push(pred);
                }
                let is_pairing_bound = pairing.is_some() && vertex.pairing_id == pairing;
                if !is_pairing_bound {
                    queue.push_back(pred);
                }
            }
        }
        out
    }
}
