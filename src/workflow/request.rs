//! # The Transition Protocol
//!
//! One `request` validates a transition, runs the step's hook and configured
//! routines, records the event and outcome, advances the state machine, and
//! triggers propagation. Everything happens under the caller's open
//! transaction; the dispatcher decides whether it all commits.

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use tracing::debug;

use crate::error::{access_denied, invalid_data, invalid_transition, Result};
use crate::events::{next_event_id, paths, Event, Viewpoint};
use crate::graph::{VertexId, VertexKind, WorkflowGraph};
use crate::machine::{OutcomeRequirement, ReservationRule};
use crate::models::{prop_bool, prop_str, AgentId, AgentProfile, Attachment, PropertyMap};
use crate::workflow::context::{EngineContext, RequestScope};
use crate::workflow::lifecycle::{self, is_administrative};
use crate::workflow::predefined;

/// Inputs of one transition request on one vertex
#[derive(Debug, Clone)]
pub struct RequestArgs {
    pub agent: AgentProfile,
    pub vertex: VertexId,
    pub transition_id: i32,
    pub payload: Option<Value>,
    pub attachment: Option<Attachment>,
}

/// Stable view of the target step, taken before anything mutates
struct StepSnapshot {
    kind: VertexKind,
    name: String,
    properties: PropertyMap,
    state: i32,
    reservation: Option<AgentId>,
    path: String,
    administrative: bool,
}

fn snapshot(graph: &WorkflowGraph, vertex: VertexId) -> Result<StepSnapshot> {
    let v = graph.vertex(vertex)?;
    Ok(StepSnapshot {
        kind: v.kind,
        name: v.name.clone(),
        properties: v.properties.clone(),
        state: v.state,
        reservation: v.reservation,
        path: graph.path_of(vertex)?,
        administrative: is_administrative(graph, vertex)?,
    })
}

/// Validate, execute, and record one transition, returning the possibly
/// rewritten outcome payload
pub async fn request(
    ctx: &EngineContext,
    graph: &mut WorkflowGraph,
    scope: &mut RequestScope,
    args: RequestArgs,
) -> Result<Option<Value>> {
    request_boxed(ctx, graph, scope, args).await
}

/// Boxed form of [`request`] for the recursion through propagation
pub fn request_boxed<'a>(
    ctx: &'a EngineContext,
    graph: &'a mut WorkflowGraph,
    scope: &'a mut RequestScope,
    args: RequestArgs,
) -> BoxFuture<'a, Result<Option<Value>>> {
    async move {
        let RequestArgs {
            agent,
            vertex,
            transition_id,
            mut payload,
            attachment,
        } = args;
        let step = snapshot(graph, vertex)?;
        if !step.kind.is_activity() {
            return Err(invalid_transition(format!(
                "Step '{}' is a {} and accepts no transition requests",
                step.path, step.kind
            )));
        }
        let machine = ctx.machine_for(graph.vertex(vertex)?)?;
        let transition = machine.transition(transition_id)?.clone();

        // Permission, performing role, and reservation; the system agent
        // firing automatic transitions is exempt from all three
        let system = agent.name == ctx.config.system_agent_name;
        let role = if system {
            agent
                .roles
                .first()
                .cloned()
                .unwrap_or_else(|| agent.name.clone())
        } else {
            if !ctx
                .security
                .check_permissions(&agent, &step.path, scope.item, Some(&scope.txn))
                .await?
            {
                return Err(access_denied(format!(
                    "Agent '{}' may not act on '{}'",
                    agent.name, step.path
                )));
            }
            let role = ctx.security.performing_role(&step.properties, &agent).await?;
            if let Some(required) = &transition.required_role {
                if !agent.holds_role(required) {
                    return Err(access_denied(format!(
                        "Transition '{}' requires role '{required}'",
                        transition.name
                    )));
                }
            }
            if let Some(holder) = step.reservation {
                if holder != agent.id {
                    return Err(access_denied(format!(
                        "Step '{}' is reserved by another agent",
                        step.path
                    )));
                }
            }
            role
        };

        // A declared query computes the outcome when the caller sent none
        if payload.is_none() {
            if let Some(query) = &transition.query {
                payload = Some(
                    ctx.scripts
                        .evaluate(scope.item, &step.properties, query, Some(&scope.txn))
                        .await?,
                );
            }
        }

        // Outcome requirement
        match (&transition.outcome, &payload) {
            (OutcomeRequirement::Required { .. }, None) => {
                return Err(invalid_data(format!(
                    "Transition '{}' on '{}' requires an outcome",
                    transition.name, step.path
                )));
            }
            (OutcomeRequirement::None, Some(_)) => {
                return Err(invalid_data(format!(
                    "Transition '{}' on '{}' does not carry an outcome",
                    transition.name, step.path
                )));
            }
            _ => {}
        }

        let (old_state, new_state) = machine.traverse(step.state, transition_id)?;

        // A finishing transition on a composite must not abandon running
        // children; abortable transitions cancel them instead
        if step.kind == VertexKind::Composite && machine.is_finishing(&transition) {
            let active_children: Vec<VertexId> = graph
                .descendants(vertex)
                .into_iter()
                .filter(|&id| graph.vertex(id).map(|v| v.active).unwrap_or(false))
                .collect();
            if !active_children.is_empty() {
                if !transition.abortable {
                    return Err(invalid_data(format!(
                        "Transition '{}' would abandon {} active steps inside '{}'",
                        transition.name,
                        active_children.len(),
                        step.path
                    )));
                }
                debug!(
                    step = %step.path,
                    aborted = active_children.len(),
                    "Aborting active children of composite"
                );
                for child in active_children {
                    graph.vertex_mut(child)?.active = false;
                    scope.touch(child, step.administrative);
                }
            }
        }

        // Type-specific hook: predefined-container steps run their routine
        if let Some(routine_name) = predefined::routine_of(&step.properties) {
            if let Some(value) = payload.take() {
                let routine = ctx.predefined.resolve(routine_name).ok_or_else(|| {
                    invalid_data(format!(
                        "Routine '{routine_name}' on '{}' is not registered",
                        step.path
                    ))
                })?;
                payload = Some(routine.run(ctx, scope, &step.properties, value).await?);
            }
        }

        // Outcome processing: validation, configured outcome routines, the
        // transition script, and view resolution
        let mut view = None;
        let mut schema_ref: Option<(String, u32)> = None;
        if let Some(mut value) = payload.take() {
            let (schema, version) = resolve_schema(&transition.outcome, &step);
            if ctx.config.validate_outcomes {
                ctx.validator
                    .validate_and_check(&schema, version, &value)
                    .await?;
            }
            for routine_name in predefined::outcome_steps(&step.properties) {
                let Some(routine) = ctx.predefined.resolve(&routine_name) else {
                    return Err(invalid_data(format!(
                        "Outcome step '{routine_name}' on '{}' is not registered",
                        step.path
                    )));
                };
                if !routine.applicable(&step.properties) {
                    debug!(
                        step = %step.path,
                        routine = %routine_name,
                        "Outcome step not applicable, skipped"
                    );
                    continue;
                }
                value = routine.run(ctx, scope, &step.properties, value).await?;
            }
            if let Some(script) = &transition.script {
                value = ctx
                    .scripts
                    .evaluate(scope.item, &step.properties, script, Some(&scope.txn))
                    .await?;
            }
            view = Some(resolve_view(&step.properties, &value)?);
            schema_ref = Some((schema, version));
            payload = Some(value);
        }

        // Event first, so records referencing its id can be written after it
        let event_id = next_event_id(ctx.store.as_ref(), scope.item, &scope.txn).await?;
        let event = Event {
            id: event_id,
            item: scope.item,
            step_path: step.path.clone(),
            step_name: step.name.clone(),
            step_kind: step.kind,
            transition_id,
            transition_name: transition.name.clone(),
            machine_name: machine.name.clone(),
            machine_version: machine.version,
            origin_state: machine.state_name(old_state),
            target_state: machine.state_name(new_state),
            agent: agent.id,
            agent_name: agent.name.clone(),
            role: role.clone(),
            view: view.clone(),
            schema: schema_ref.as_ref().map(|(s, _)| s.clone()),
            schema_version: schema_ref.as_ref().map(|(_, v)| *v),
            has_attachment: attachment.is_some(),
            timestamp: Utc::now(),
        };
        ctx.store
            .put(
                scope.item,
                &paths::history(event_id),
                serde_json::to_value(&event)?,
                &scope.txn,
            )
            .await?;

        if let (Some(value), Some((schema, version))) = (&payload, &schema_ref) {
            ctx.store
                .put(
                    scope.item,
                    &paths::outcome(schema, *version, event_id),
                    value.clone(),
                    &scope.txn,
                )
                .await?;
            if let Some(att) = &attachment {
                ctx.store
                    .put(
                        scope.item,
                        &paths::attachment(schema, *version, event_id),
                        serde_json::to_value(att)?,
                        &scope.txn,
                    )
                    .await?;
            }
            let view_name = view.clone().unwrap_or_else(|| "last".to_string());
            let viewpoint = Viewpoint {
                schema: schema.clone(),
                view: view_name.clone(),
                event_id,
                updated_at: Utc::now(),
            };
            ctx.store
                .put(
                    scope.item,
                    &paths::viewpoint(schema, &view_name),
                    serde_json::to_value(&viewpoint)?,
                    &scope.txn,
                )
                .await?;

            mirror_properties(ctx, scope, &step, value).await?;
        }

        // Advance the state machine and apply the reservation rule
        {
            let v = graph.vertex_mut(vertex)?;
            v.state = new_state;
            v.state_entered_at = Utc::now();
            match transition.reservation {
                ReservationRule::Preserve => {}
                ReservationRule::Set => v.reservation = Some(agent.id),
                ReservationRule::Clear => v.reservation = None,
            }
        }
        scope.touch(vertex, step.administrative);
        debug!(
            step = %step.path,
            transition = %transition.name,
            from = %machine.state_name(old_state),
            to = %machine.state_name(new_state),
            agent = %agent.name,
            "Transition applied"
        );

        let finishing = machine.is_finished_state(new_state);
        let was_finished = machine.is_finished_state(old_state);
        let breakpoint = prop_bool(&step.properties, "Breakpoint").unwrap_or(false);
        if finishing && !was_finished && !breakpoint {
            lifecycle::run_next(ctx, graph, scope, vertex).await?;
        }

        // Composite re-entry: a reinitializing transition or a return to the
        // initial state re-runs the sub-graph from its start
        if step.kind == VertexKind::Composite
            && !finishing
            && (transition.reinitializing || new_state == machine.initial_state)
        {
            let starts = graph.start_vertices(vertex);
            for start in starts {
                lifecycle::run(ctx, graph, scope, start).await?;
            }
        }

        Ok(payload)
    }
    .boxed()
}

/// Schema reference for a carried outcome: the transition's declaration
/// wins, then the step's properties, then the step name itself
fn resolve_schema(outcome: &OutcomeRequirement, step: &StepSnapshot) -> (String, u32) {
    if let Some((schema, version)) = outcome.schema() {
        return (schema.to_string(), version);
    }
    if let Some(schema) = prop_str(&step.properties, "SchemaType") {
        let version = step
            .properties
            .get("SchemaVersion")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32;
        return (schema.to_string(), version);
    }
    (step.name.clone(), 0)
}

/// Name the view this outcome files under: a JSON-pointer extraction from
/// the payload, a literal property, or `last`
fn resolve_view(properties: &PropertyMap, payload: &Value) -> Result<String> {
    if let Some(pointer) = prop_str(properties, "ViewpointPointer") {
        let value = payload.pointer(pointer).ok_or_else(|| {
            invalid_data(format!("Viewpoint pointer '{pointer}' resolves to nothing"))
        })?;
        return Ok(match value.as_str() {
            Some(s) => s.to_string(),
            None => value.to_string(),
        });
    }
    Ok(prop_str(properties, "Viewpoint").unwrap_or("last").to_string())
}

/// Write item properties declared to mirror outcome fields, keyed by
/// `itemProperty:`-prefixed step properties whose value selects the field
async fn mirror_properties(
    ctx: &EngineContext,
    scope: &mut RequestScope,
    step: &StepSnapshot,
    value: &Value,
) -> Result<()> {
    for (key, selector) in &step.properties {
        let Some(property) = key.strip_prefix("itemProperty:") else {
            continue;
        };
        let Some(selector) = selector.as_str() else {
            continue;
        };
        let mirrored = if selector.starts_with('/') {
            value.pointer(selector)
        } else {
            value.get(selector)
        };
        match mirrored {
            Some(field) => {
                ctx.store
                    .put(scope.item, &paths::property(property), field.clone(), &scope.txn)
                    .await?;
            }
            None => {
                debug!(
                    step = %step.path,
                    property,
                    selector,
                    "Outcome carries no value for mirrored property"
                );
            }
        }
    }
    Ok(())
}
