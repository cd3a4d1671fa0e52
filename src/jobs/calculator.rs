//! # Job Calculator
//!
//! Derives, for a given agent and item, the set of currently executable
//! transitions. The recursive traversal enforces "execute the leaf, not the
//! container": a composite with any active child contributes no jobs of its
//! own, so agents only ever see the deepest active steps.

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt};
use uuid::Uuid;

use super::Job;
use crate::error::Result;
use crate::graph::{VertexId, VertexKind, WorkflowGraph};
use crate::models::{AgentProfile, ItemId};
use crate::workflow::EngineContext;

/// Jobs currently executable by the agent, deepest active steps first
pub async fn calculate_jobs(
    ctx: &EngineContext,
    graph: &WorkflowGraph,
    agent: &AgentProfile,
    item: ItemId,
    recurse: bool,
) -> Result<Vec<Job>> {
    collect(ctx, graph, agent, item, graph.root(), recurse, true).await
}

/// The same traversal ignoring the active gate entirely
///
/// Every activity contributes its possible transitions regardless of
/// activation, which makes this suitable for inspection and debugging but
/// not for live execution.
pub async fn calculate_all_jobs(
    ctx: &EngineContext,
    graph: &WorkflowGraph,
    agent: &AgentProfile,
    item: ItemId,
) -> Result<Vec<Job>> {
    collect(ctx, graph, agent, item, graph.root(), true, false).await
}

fn collect<'a>(
    ctx: &'a EngineContext,
    graph: &'a WorkflowGraph,
    agent: &'a AgentProfile,
    item: ItemId,
    vertex: VertexId,
    recurse: bool,
    gate: bool,
) -> BoxFuture<'a, Result<Vec<Job>>> {
    async move {
        let v = graph.vertex(vertex)?;
        if !v.kind.is_activity() {
            return Ok(Vec::new());
        }
        if gate && !v.active {
            return Ok(Vec::new());
        }
        let mut jobs = Vec::new();
        if v.kind == VertexKind::Composite && recurse {
            let mut child_active = false;
            for child in graph.children(vertex) {
                let cv = graph.vertex(child)?;
                if cv.kind.is_activity() && cv.active {
                    child_active = true;
                }
                jobs.extend(collect(ctx, graph, agent, item, child, recurse, gate).await?);
            }
            // Only the deepest active steps are executable
            if gate && child_active {
                return Ok(jobs);
            }
        }
        jobs.extend(own_jobs(ctx, graph, agent, item, vertex).await?);
        Ok(jobs)
    }
    .boxed()
}

/// Jobs the vertex itself offers the agent, reservation and role permitting
async fn own_jobs(
    ctx: &EngineContext,
    graph: &WorkflowGraph,
    agent: &AgentProfile,
    item: ItemId,
    vertex: VertexId,
) -> Result<Vec<Job>> {
    let v = graph.vertex(vertex)?;
    if let Some(holder) = v.reservation {
        if holder != agent.id {
            return Ok(Vec::new());
        }
    }
    let role = match ctx.security.performing_role(&v.properties, agent).await {
        Ok(role) => role,
        // The agent does not qualify for this step at all
        Err(_) => return Ok(Vec::new()),
    };
    let machine = ctx.machine_for(v)?;
    let path = graph.path_of(vertex)?;
    let mut jobs = Vec::new();
    for transition in machine.possible_transitions(v.state) {
        if let Some(required) = &transition.required_role {
            if !agent.holds_role(required) {
                continue;
            }
        }
        jobs.push(Job {
            id: Uuid::new_v4(),
            item,
            step_path: path.clone(),
            step_name: v.name.clone(),
            step_kind: v.kind,
            transition_id: transition.id,
            transition_name: transition.name.clone(),
            role: role.clone(),
            properties: v.properties.clone(),
            created_at: Utc::now(),
            outcome: None,
            attachment: None,
        });
    }
    Ok(jobs)
}
