//! # Workflow Assembly
//!
//! Builds the per-item workflow shape: a root composite named `workflow`
//! holding the `domain` sub-graph of business steps and the `predefined`
//! container of administrative steps, the latter preloaded with the stock
//! routines so every item accepts property writes, viewpoint moves, and
//! queued requests from day one.

use serde_json::json;

use crate::error::Result;
use crate::graph::{verify, EdgeKind, VertexId, VertexKind, WorkflowGraph};
use crate::machine::PREDEFINED_MACHINE;
use crate::workflow::predefined::{ASSIGN_VIEWPOINT, QUEUE_REQUEST, WRITE_PROPERTY};

/// Name of the root composite every item shares
pub const ROOT_NAME: &str = "workflow";
/// Name of the business sub-graph
pub const DOMAIN_NAME: &str = "domain";
/// Name of the administrative container
pub const PREDEFINED_NAME: &str = "predefined";

/// Assembles an item's workflow graph before initialization
pub struct WorkflowBuilder {
    graph: WorkflowGraph,
    domain: VertexId,
    predefined: VertexId,
}

impl WorkflowBuilder {
    pub fn new() -> Result<Self> {
        let mut graph = WorkflowGraph::new(ROOT_NAME);
        let root = graph.root();
        // The root holds two mutually unconnected children that both run at
        // start, so it is an unstructured container
        graph
            .vertex_mut(root)?
            .properties
            .insert("Unstructured".to_string(), json!(true));

        let domain = graph.add_vertex(root, DOMAIN_NAME, VertexKind::Composite)?;
        let predefined = graph.add_vertex(root, PREDEFINED_NAME, VertexKind::Composite)?;
        {
            let container = graph.vertex_mut(predefined)?;
            container
                .properties
                .insert("Unstructured".to_string(), json!(true));
            container
                .properties
                .insert("Administrative".to_string(), json!(true));
        }

        let mut builder = Self {
            graph,
            domain,
            predefined,
        };
        for routine in [WRITE_PROPERTY, ASSIGN_VIEWPOINT, QUEUE_REQUEST] {
            builder.predefined_step(routine)?;
        }
        Ok(builder)
    }

    pub fn domain(&self) -> VertexId {
        self.domain
    }

    pub fn predefined(&self) -> VertexId {
        self.predefined
    }

    /// Add an administrative step bound to a registered routine
    pub fn predefined_step(&mut self, routine: &str) -> Result<VertexId> {
        let id = self
            .graph
            .add_vertex(self.predefined, routine, VertexKind::Atomic)?;
        let vertex = self.graph.vertex_mut(id)?;
        vertex.properties.insert("Routine".to_string(), json!(routine));
        vertex
            .properties
            .insert("StateMachineName".to_string(), json!(PREDEFINED_MACHINE));
        Ok(id)
    }

    /// Add an atomic business step under the domain sub-graph
    pub fn step(&mut self, name: impl Into<String>) -> Result<VertexId> {
        self.graph.add_vertex(self.domain, name, VertexKind::Atomic)
    }

    /// Add an atomic step under an explicit composite
    pub fn step_in(&mut self, parent: VertexId, name: impl Into<String>) -> Result<VertexId> {
        self.graph.add_vertex(parent, name, VertexKind::Atomic)
    }

    /// Add a nested composite under the domain sub-graph
    pub fn composite(&mut self, name: impl Into<String>) -> Result<VertexId> {
        self.graph
            .add_vertex(self.domain, name, VertexKind::Composite)
    }

    /// Add a structural vertex (split, join, route) under a composite
    pub fn vertex_in(
        &mut self,
        parent: VertexId,
        name: impl Into<String>,
        kind: VertexKind,
    ) -> Result<VertexId> {
        self.graph.add_vertex(parent, name, kind)
    }

    /// Connect two steps with an unlabeled forward edge
    pub fn connect(&mut self, from: VertexId, to: VertexId) -> Result<()> {
        self.graph.add_edge(from, to, "", EdgeKind::Forward)?;
        Ok(())
    }

    /// Connect two steps with an aliased forward edge for split routing
    pub fn connect_as(
        &mut self,
        from: VertexId,
        to: VertexId,
        alias: impl Into<String>,
    ) -> Result<()> {
        self.graph.add_edge(from, to, alias, EdgeKind::Forward)?;
        Ok(())
    }

    /// Close a loop: pair the split with the body start and add the aliased
    /// back edge between them
    pub fn close_loop(
        &mut self,
        split: VertexId,
        body_start: VertexId,
        pairing: u32,
        back_alias: impl Into<String>,
    ) -> Result<()> {
        self.graph.vertex_mut(split)?.pairing_id = Some(pairing);
        self.graph.vertex_mut(body_start)?.pairing_id = Some(pairing);
        self.graph
            .add_edge(split, body_start, back_alias, EdgeKind::Back)?;
        Ok(())
    }

    /// Set a configuration property on a step
    pub fn set_property(
        &mut self,
        vertex: VertexId,
        key: impl Into<String>,
        value: serde_json::Value,
    ) -> Result<()> {
        self.graph
            .vertex_mut(vertex)?
            .properties
            .insert(key.into(), value);
        Ok(())
    }

    /// Require a role on a step (the `AgentRole` property)
    pub fn require_role(&mut self, vertex: VertexId, role: impl Into<String>) -> Result<()> {
        self.set_property(vertex, "AgentRole", json!(role.into()))
    }

    /// Bind a step to a named machine definition
    pub fn use_machine(
        &mut self,
        vertex: VertexId,
        name: impl Into<String>,
        version: u32,
    ) -> Result<()> {
        self.set_property(vertex, "StateMachineName", json!(name.into()))?;
        self.set_property(vertex, "StateMachineVersion", json!(version))
    }

    /// Verify structural well-formedness and hand the graph over
    pub fn build(self) -> Result<WorkflowGraph> {
        verify(&self.graph)?;
        Ok(self.graph)
    }
}
