//! # Vertex Behaviors
//!
//! The run/run_next/reinit contract over the graph arena. Activities mark
//! themselves active or pass through when already finished; splits select
//! outgoing edges by routing; joins gate until their predecessor branches
//! settle; composites auto-start into their sub-graph and auto-finish out of
//! it. The functions recurse through boxed futures because propagation and
//! the transition protocol call back into each other.

use futures::future::{BoxFuture, FutureExt};
use std::collections::HashSet;
use tracing::debug;

use crate::error::{cardinality, invalid_data, Result};
use crate::graph::{EdgeKind, VertexId, VertexKind, WorkflowGraph};
use crate::machine::{StateMachineDef, TransitionDef};
use crate::models::prop_bool;
use crate::workflow::context::{EngineContext, RequestScope};
use crate::workflow::request::{request_boxed, RequestArgs};
use crate::workflow::routing::{alias_matches, evaluate_routing};

/// Activate a vertex, dispatching on its kind
pub fn run<'a>(
    ctx: &'a EngineContext,
    graph: &'a mut WorkflowGraph,
    scope: &'a mut RequestScope,
    vertex: VertexId,
) -> BoxFuture<'a, Result<()>> {
    async move {
        match graph.vertex(vertex)?.kind {
            VertexKind::Atomic | VertexKind::Composite => {
                run_activity(ctx, graph, scope, vertex).await
            }
            VertexKind::OrSplit
            | VertexKind::XOrSplit
            | VertexKind::AndSplit
            | VertexKind::LoopSplit => run_split(ctx, graph, scope, vertex).await,
            VertexKind::Join => run_join(ctx, graph, scope, vertex).await,
            VertexKind::Route => run_next(ctx, graph, scope, vertex).await,
        }
    }
    .boxed()
}

/// Deactivate a vertex, run its single successor, and let the parent
/// composite try to auto-finish
pub fn run_next<'a>(
    ctx: &'a EngineContext,
    graph: &'a mut WorkflowGraph,
    scope: &'a mut RequestScope,
    vertex: VertexId,
) -> BoxFuture<'a, Result<()>> {
    async move {
        let administrative = is_administrative(graph, vertex)?;
        graph.vertex_mut(vertex)?.active = false;
        scope.touch(vertex, administrative);

        let next = graph
            .outgoing(vertex)
            .iter()
            .find(|e| !e.is_back())
            .map(|e| e.target);
        if let Some(target) = next {
            run(ctx, graph, scope, target).await?;
        }

        if let Some(parent) = graph.vertex(vertex)?.parent {
            attempt_auto_finish(ctx, graph, scope, parent).await?;
        }
        Ok(())
    }
    .boxed()
}

/// Reset a loop span to its initial state and propagate the reset forward,
/// stopping at the loop split that originated it
pub fn reinit(
    ctx: &EngineContext,
    graph: &mut WorkflowGraph,
    scope: &mut RequestScope,
    vertex: VertexId,
    loop_id: u32,
) -> Result<()> {
    let mut seen = HashSet::new();
    reinit_inner(ctx, graph, scope, vertex, loop_id, &mut seen)
}

fn reinit_inner(
    ctx: &EngineContext,
    graph: &mut WorkflowGraph,
    scope: &mut RequestScope,
    vertex: VertexId,
    loop_id: u32,
    seen: &mut HashSet<VertexId>,
) -> Result<()> {
    if !seen.insert(vertex) {
        return Ok(());
    }
    let v = graph.vertex(vertex)?;
    if v.kind == VertexKind::LoopSplit && v.pairing_id == Some(loop_id) {
        // Reached the loop's own split; the span ends here
        return Ok(());
    }
    let administrative = is_administrative(graph, vertex)?;
    reset_vertex(ctx, graph, scope, vertex, administrative)?;
    if graph.vertex(vertex)?.kind == VertexKind::Composite {
        for id in graph.descendants(vertex) {
            reset_vertex(ctx, graph, scope, id, administrative)?;
        }
    }
    let targets: Vec<VertexId> = graph
        .outgoing(vertex)
        .iter()
        .filter(|e| !e.is_back())
        .map(|e| e.target)
        .collect();
    for target in targets {
        reinit_inner(ctx, graph, scope, target, loop_id, seen)?;
    }
    Ok(())
}

fn reset_vertex(
    ctx: &EngineContext,
    graph: &mut WorkflowGraph,
    scope: &mut RequestScope,
    vertex: VertexId,
    administrative: bool,
) -> Result<()> {
    let initial = {
        let v = graph.vertex(vertex)?;
        if v.kind.is_activity() {
            Some(ctx.machine_for(v)?.initial_state)
        } else {
            None
        }
    };
    let v = graph.vertex_mut(vertex)?;
    match initial {
        Some(state) => v.reset(state),
        None => v.active = false,
    }
    scope.touch(vertex, administrative);
    Ok(())
}

/// Whether the vertex sits inside an administrative container
pub fn is_administrative(graph: &WorkflowGraph, vertex: VertexId) -> Result<bool> {
    let mut current = Some(vertex);
    while let Some(id) = current {
        let v = graph.vertex(id)?;
        if prop_bool(&v.properties, "Administrative").unwrap_or(false) {
            return Ok(true);
        }
        current = v.parent;
    }
    Ok(false)
}

async fn run_activity(
    ctx: &EngineContext,
    graph: &mut WorkflowGraph,
    scope: &mut RequestScope,
    vertex: VertexId,
) -> Result<()> {
    let (kind, finished, administrative) = {
        let v = graph.vertex(vertex)?;
        let machine = ctx.machine_for(v)?;
        (
            v.kind,
            machine.is_finished_state(v.state),
            is_administrative(graph, vertex)?,
        )
    };
    if finished {
        // Already finished steps pass activation straight through
        return run_next(ctx, graph, scope, vertex).await;
    }
    graph.vertex_mut(vertex)?.active = true;
    scope.touch(vertex, administrative);
    if kind == VertexKind::Composite {
        attempt_auto_start(ctx, graph, scope, vertex).await?;
    }
    Ok(())
}

async fn run_split(
    ctx: &EngineContext,
    graph: &mut WorkflowGraph,
    scope: &mut RequestScope,
    vertex: VertexId,
) -> Result<()> {
    let split = graph.vertex(vertex)?.clone();

    // AndSplit follows every outgoing forward edge, no routing involved
    if split.kind == VertexKind::AndSplit {
        let targets: Vec<VertexId> = graph
            .outgoing(vertex)
            .iter()
            .filter(|e| !e.is_back())
            .map(|e| e.target)
            .collect();
        for target in targets {
            run(ctx, graph, scope, target).await?;
        }
        return Ok(());
    }

    let tokens = evaluate_routing(ctx, graph, &split, scope.item, &scope.txn).await?;
    let matched: Vec<(VertexId, EdgeKind)> = graph
        .outgoing(vertex)
        .iter()
        .filter(|e| alias_matches(&e.alias, &tokens))
        .map(|e| (e.target, e.kind))
        .collect();
    let path = graph.path_of(vertex)?;

    if split.kind == VertexKind::OrSplit {
        if matched.is_empty() {
            return Err(invalid_data(format!(
                "Routing result {tokens:?} matches no outgoing edge of '{path}'"
            )));
        }
        for (target, _) in matched {
            run(ctx, graph, scope, target).await?;
        }
        return Ok(());
    }

    // XOrSplit and LoopSplit demand an unambiguous choice
    if matched.len() != 1 {
        return Err(invalid_data(format!(
            "Routing result {tokens:?} matches {} outgoing edges of '{path}', exactly one required",
            matched.len()
        )));
    }
    let (target, edge_kind) = matched[0];
    if edge_kind == EdgeKind::Back {
        let loop_id = split
            .pairing_id
            .ok_or_else(|| cardinality(format!("Loop '{path}' has no pairing id")))?;
        reinit(ctx, graph, scope, target, loop_id)?;
    }
    run(ctx, graph, scope, target).await
}

async fn run_join(
    ctx: &EngineContext,
    graph: &mut WorkflowGraph,
    scope: &mut RequestScope,
    vertex: VertexId,
) -> Result<()> {
    let pairing = graph.vertex(vertex)?.pairing_id;
    for pred in graph.upstream_activities(vertex, pairing) {
        let v = graph.vertex(pred)?;
        let machine = ctx.machine_for(v)?;
        if v.active && !machine.is_finished_state(v.state) {
            // A branch is still running; stay gated until it settles
            let administrative = is_administrative(graph, vertex)?;
            graph.vertex_mut(vertex)?.active = true;
            scope.touch(vertex, administrative);
            return Ok(());
        }
    }
    run_next(ctx, graph, scope, vertex).await
}

/// Outcome of auto-transition candidate selection
enum AutoCandidate {
    None,
    Ambiguous(String, String),
    Winner(TransitionDef),
}

/// Pick the transition a composite may fire by itself from this state
///
/// A possible non-finishing, non-blocking transition always overrides a
/// finishing one; two candidates of the same finishing-ness are ambiguous
/// and nothing fires.
fn auto_candidate(machine: &StateMachineDef, state: i32) -> AutoCandidate {
    let possible: Vec<&TransitionDef> = machine
        .possible_transitions(state)
        .into_iter()
        .filter(|t| !t.blocking)
        .collect();
    let non_finishing: Vec<&TransitionDef> = possible
        .iter()
        .copied()
        .filter(|t| !machine.is_finishing(t))
        .collect();
    let pool = if non_finishing.is_empty() {
        possible
    } else {
        non_finishing
    };
    match pool.as_slice() {
        [] => AutoCandidate::None,
        [winner] => AutoCandidate::Winner((*winner).clone()),
        [first, second, ..] => AutoCandidate::Ambiguous(first.name.clone(), second.name.clone()),
    }
}

/// Fire the single available non-finishing transition of a composite that
/// sits active in its initial state with no active children
fn attempt_auto_start<'a>(
    ctx: &'a EngineContext,
    graph: &'a mut WorkflowGraph,
    scope: &'a mut RequestScope,
    vertex: VertexId,
) -> BoxFuture<'a, Result<()>> {
    async move {
        let machine = {
            let v = graph.vertex(vertex)?;
            if v.kind != VertexKind::Composite || !v.active {
                return Ok(());
            }
            let machine = ctx.machine_for(v)?;
            if v.state != machine.initial_state {
                return Ok(());
            }
            machine
        };
        let any_active_child = graph.children(vertex).into_iter().any(|c| {
            graph.vertex(c).map(|cv| cv.active).unwrap_or(false)
        });
        if any_active_child {
            return Ok(());
        }
        let state = graph.vertex(vertex)?.state;
        let winner = match auto_candidate(&machine, state) {
            AutoCandidate::Winner(t) if !machine.is_finishing(&t) => t,
            _ => return Ok(()),
        };
        if winner.outcome.is_required() || winner.script.is_some() {
            return Ok(());
        }
        debug!(
            step = %graph.path_of(vertex)?,
            transition = %winner.name,
            "Auto-starting composite"
        );
        let args = RequestArgs {
            agent: ctx.system_agent(),
            vertex,
            transition_id: winner.id,
            payload: None,
            attachment: None,
        };
        request_boxed(ctx, graph, scope, args).await?;
        Ok(())
    }
    .boxed()
}

/// Fire the unambiguous non-blocking transition of a composite whose
/// descendants have all settled
///
/// The two permanently open composites, the workflow root and the domain
/// container, never finish automatically. Ambiguity leaves the composite
/// active awaiting a manual choice.
pub fn attempt_auto_finish<'a>(
    ctx: &'a EngineContext,
    graph: &'a mut WorkflowGraph,
    scope: &'a mut RequestScope,
    composite: VertexId,
) -> BoxFuture<'a, Result<()>> {
    async move {
        let machine = {
            let v = graph.vertex(composite)?;
            if v.kind != VertexKind::Composite || !v.active {
                return Ok(());
            }
            if v.name == "workflow" || v.name == "domain" {
                return Ok(());
            }
            ctx.machine_for(v)?
        };
        if !descendants_quiescent(ctx, graph, composite)? {
            return Ok(());
        }
        let state = graph.vertex(composite)?.state;
        let winner = match auto_candidate(&machine, state) {
            AutoCandidate::Winner(t) => t,
            AutoCandidate::Ambiguous(first, second) => {
                debug!(
                    step = %graph.path_of(composite)?,
                    first = %first,
                    second = %second,
                    "Ambiguous auto-finish candidates, composite stays active"
                );
                return Ok(());
            }
            AutoCandidate::None => return Ok(()),
        };
        if winner.outcome.is_required() || winner.script.is_some() {
            return Ok(());
        }
        debug!(
            step = %graph.path_of(composite)?,
            transition = %winner.name,
            "Auto-finishing composite"
        );
        let args = RequestArgs {
            agent: ctx.system_agent(),
            vertex: composite,
            transition_id: winner.id,
            payload: None,
            attachment: None,
        };
        request_boxed(ctx, graph, scope, args).await?;
        Ok(())
    }
    .boxed()
}

/// Whether every descendant of the composite has settled: nothing active,
/// and every activity that ever started has reached a finishing state
pub fn descendants_quiescent(
    ctx: &EngineContext,
    graph: &WorkflowGraph,
    composite: VertexId,
) -> Result<bool> {
    for id in graph.descendants(composite) {
        let v = graph.vertex(id)?;
        if v.active {
            return Ok(false);
        }
        if v.kind.is_activity() {
            let machine = ctx.machine_for(v)?;
            if v.state != machine.initial_state && !machine.is_finished_state(v.state) {
                return Ok(false);
            }
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::{builtin, StateDef};

    #[test]
    fn test_auto_candidate_prefers_non_finishing() {
        let machine = builtin::default_machine();
        // Waiting offers Start (non-finishing) and Done (finishing)
        match auto_candidate(&machine, builtin::states::WAITING) {
            AutoCandidate::Winner(t) => assert_eq!(t.name, "Start"),
            _ => panic!("expected a winner"),
        }
    }

    #[test]
    fn test_auto_candidate_skips_blocking() {
        let machine = builtin::composite_machine();
        // Started offers Complete and the blocking Abort
        match auto_candidate(&machine, builtin::states::STARTED) {
            AutoCandidate::Winner(t) => assert_eq!(t.name, "Complete"),
            _ => panic!("expected a winner"),
        }
    }

    #[test]
    fn test_auto_candidate_ambiguity() {
        let machine = StateMachineDef::new("TwoWayOut", 0, 0)
            .with_state(StateDef::new(0, "Open", false))
            .with_state(StateDef::new(1, "Accepted", true))
            .with_state(StateDef::new(2, "Rejected", true))
            .with_transition(TransitionDef::new(0, "Accept", 0, 1))
            .with_transition(TransitionDef::new(1, "Reject", 0, 2));
        assert!(matches!(
            auto_candidate(&machine, 0),
            AutoCandidate::Ambiguous(..)
        ));
    }

    #[test]
    fn test_auto_candidate_empty_state() {
        let machine = builtin::default_machine();
        assert!(matches!(
            auto_candidate(&machine, builtin::states::FINISHED),
            AutoCandidate::None
        ));
    }
}
