//! Structural well-formedness checks.
//!
//! `verify` is a static graph check run at workflow assembly time; it never
//! consults runtime state, so a graph that verifies once stays valid for the
//! life of the item.

use std::collections::HashSet;

use super::arena::WorkflowGraph;
use super::edge::EdgeKind;
use super::vertex::{VertexId, VertexKind};
use crate::error::{cardinality, Result};

/// Check edge cardinality, start vertices, reachability, and loop pairing
/// for every vertex of the graph
pub fn verify(graph: &WorkflowGraph) -> Result<()> {
    for vertex in graph.vertices() {
        verify_vertex(graph, vertex.id)?;
    }
    for vertex in graph.vertices() {
        if vertex.kind == VertexKind::Composite {
            verify_composite(graph, vertex.id)?;
        }
    }
    Ok(())
}

fn verify_vertex(graph: &WorkflowGraph, id: VertexId) -> Result<()> {
    let vertex = graph.vertex(id)?;
    let incoming = graph.incoming(id).len();
    let outgoing = graph.outgoing(id).len();
    let path = graph.path_of(id)?;

    match vertex.kind {
        VertexKind::Atomic | VertexKind::Composite | VertexKind::Route => {
            if incoming > 1 {
                return Err(cardinality(format!(
                    "Step '{path}' has {incoming} incoming edges, at most one allowed"
                )));
            }
            if outgoing > 1 {
                return Err(cardinality(format!(
                    "Step '{path}' has {outgoing} outgoing edges, at most one allowed"
                )));
            }
        }
        VertexKind::OrSplit | VertexKind::XOrSplit | VertexKind::AndSplit => {
            if incoming > 1 {
                return Err(cardinality(format!(
                    "Split '{path}' has {incoming} incoming edges, at most one allowed"
                )));
            }
            if outgoing < 2 {
                return Err(cardinality(format!(
                    "Split '{path}' has {outgoing} outgoing edges, at least two required"
                )));
            }
        }
        VertexKind::LoopSplit => {
            let back_edges = graph
                .outgoing(id)
                .iter()
                .filter(|e| e.kind == EdgeKind::Back)
                .count();
            if back_edges != 1 {
                return Err(cardinality(format!(
                    "Loop '{path}' has {back_edges} back edges, exactly one required"
                )));
            }
            if outgoing < 2 {
                return Err(cardinality(format!(
                    "Loop '{path}' has {outgoing} outgoing edges, a back and a forward edge required"
                )));
            }
        }
        VertexKind::Join => {
            if incoming < 2 {
                return Err(cardinality(format!(
                    "Join '{path}' has {incoming} incoming edges, at least two required"
                )));
            }
            if outgoing > 1 {
                return Err(cardinality(format!(
                    "Join '{path}' has {outgoing} outgoing edges, at most one allowed"
                )));
            }
        }
    }
    Ok(())
}

fn verify_composite(graph: &WorkflowGraph, id: VertexId) -> Result<()> {
    let children = graph.children(id);
    if children.is_empty() {
        return Ok(());
    }
    // Unstructured containers hold mutually unconnected steps (the root and
    // the predefined container); start and reachability rules do not apply
    if crate::models::prop_bool(&graph.vertex(id)?.properties, "Unstructured").unwrap_or(false) {
        return Ok(());
    }
    let path = graph.path_of(id)?;

    let starts: Vec<VertexId> = children
        .iter()
        .copied()
        .filter(|&child| {
            !graph
                .incoming(child)
                .iter()
                .any(|e| e.kind == EdgeKind::Forward)
        })
        .collect();
    if starts.len() != 1 {
        return Err(cardinality(format!(
            "Composite '{path}' has {} start vertices, exactly one required",
            starts.len()
        )));
    }

    // Forward reachability from the start vertex must cover every child
    let mut reached: HashSet<VertexId> = HashSet::new();
    let mut stack = vec![starts[0]];
    while let Some(v) = stack.pop() {
        if !reached.insert(v) {
            continue;
        }
        for edge in graph.outgoing(v) {
            if edge.kind == EdgeKind::Forward {
                stack.push(edge.target);
            }
        }
    }
    for &child in &children {
        if !reached.contains(&child) {
            let child_path = graph.path_of(child)?;
            return Err(cardinality(format!(
                "Step '{child_path}' is unreachable from the start of '{path}'"
            )));
        }
    }

    // A loop back edge must land on a vertex paired with its split
    for &child in &children {
        let vertex = graph.vertex(child)?;
        if vertex.kind == VertexKind::LoopSplit {
            let Some(pairing) = vertex.pairing_id else {
                return Err(cardinality(format!(
                    "Loop '{}' has no pairing id",
                    graph.path_of(child)?
                )));
            };
            let back_target = graph
                .outgoing(child)
                .iter()
                .find(|e| e.kind == EdgeKind::Back)
                .map(|e| e.target);
            if let Some(target) = back_target {
                let target_vertex = graph.vertex(target)?;
                if target_vertex.pairing_id != Some(pairing) {
                    return Err(cardinality(format!(
                        "Loop '{}' back edge does not land on its paired vertex",
                        graph.path_of(child)?
                    )));
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::WorkflowGraph;

    #[test]
    fn test_linear_graph_verifies() {
        let mut graph = WorkflowGraph::new("workflow");
        let domain = graph
            .add_vertex(graph.root(), "domain", VertexKind::Composite)
            .unwrap();
        let a = graph.add_vertex(domain, "A", VertexKind::Atomic).unwrap();
        let b = graph.add_vertex(domain, "B", VertexKind::Atomic).unwrap();
        graph.add_edge(a, b, "", EdgeKind::Forward).unwrap();
        assert!(verify(&graph).is_ok());
    }

    #[test]
    fn test_two_start_vertices_rejected() {
        let mut graph = WorkflowGraph::new("workflow");
        let domain = graph
            .add_vertex(graph.root(), "domain", VertexKind::Composite)
            .unwrap();
        graph.add_vertex(domain, "A", VertexKind::Atomic).unwrap();
        graph.add_vertex(domain, "B", VertexKind::Atomic).unwrap();
        let err = verify(&graph).unwrap_err();
        assert!(err.to_string().contains("start vertices"));
    }

    #[test]
    fn test_split_needs_two_outgoing() {
        let mut graph = WorkflowGraph::new("workflow");
        let domain = graph
            .add_vertex(graph.root(), "domain", VertexKind::Composite)
            .unwrap();
        let split = graph
            .add_vertex(domain, "choose", VertexKind::XOrSplit)
            .unwrap();
        let only = graph.add_vertex(domain, "A", VertexKind::Atomic).unwrap();
        graph.add_edge(split, only, "yes", EdgeKind::Forward).unwrap();
        assert!(verify(&graph).is_err());
    }

    #[test]
    fn test_join_needs_two_incoming() {
        let mut graph = WorkflowGraph::new("workflow");
        let domain = graph
            .add_vertex(graph.root(), "domain", VertexKind::Composite)
            .unwrap();
        let a = graph.add_vertex(domain, "A", VertexKind::Atomic).unwrap();
        let join = graph.add_vertex(domain, "join", VertexKind::Join).unwrap();
        graph.add_edge(a, join, "", EdgeKind::Forward).unwrap();
        assert!(verify(&graph).is_err());
    }

    #[test]
    fn test_loop_pairing_required() {
        let mut graph = WorkflowGraph::new("workflow");
        let domain = graph
            .add_vertex(graph.root(), "domain", VertexKind::Composite)
            .unwrap();
        let body = graph.add_vertex(domain, "Body", VertexKind::Atomic).unwrap();
        let done = graph.add_vertex(domain, "Done", VertexKind::Atomic).unwrap();
        let lp = graph
            .add_vertex(domain, "again", VertexKind::LoopSplit)
            .unwrap();
        graph.add_edge(body, lp, "", EdgeKind::Forward).unwrap();
        graph.add_edge(lp, body, "true", EdgeKind::Back).unwrap();
        graph.add_edge(lp, done, "false", EdgeKind::Forward).unwrap();
        // No pairing ids set
        assert!(verify(&graph).is_err());

        let mut paired = graph.clone();
        paired.vertex_mut(lp).unwrap().pairing_id = Some(1);
        paired.vertex_mut(body).unwrap().pairing_id = Some(1);
        assert!(verify(&paired).is_ok());
    }
}
