//! # Transactional Dispatcher
//!
//! Makes one transition request atomic with respect to an item's persisted
//! state: item lock, storage transaction, the transition protocol, and
//! commit/abort, plus the secondary error-transition path and the post-commit
//! work (job pushes, follow-up requests). The original failure is always the
//! one reported to the caller; a compensating error transition never masks
//! it.

mod locks;

pub use locks::LockRegistry;

use futures::future::{BoxFuture, FutureExt};
use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};

use crate::error::{invalid_data, not_found, EngineError, Result, StructuredFailure};
use crate::events::{paths, publisher::lifecycle};
use crate::graph::{verify, WorkflowGraph};
use crate::jobs::JobPusher;
use crate::models::{prop_str, AgentProfile, Attachment, ItemId, TransactionKey};
use crate::workflow::context::{EngineContext, FollowUpRequest, RequestScope};
use crate::workflow::lifecycle as vertex_lifecycle;
use crate::workflow::{request, RequestArgs};

/// Everything a committed request leaves behind for post-commit work
struct CommittedRequest {
    outcome: Option<Value>,
    followups: Vec<FollowUpRequest>,
    push_roles: Vec<String>,
}

/// Serializes and persists transition requests per item
pub struct Dispatcher {
    ctx: EngineContext,
    locks: LockRegistry,
    pusher: JobPusher,
}

impl Dispatcher {
    pub fn new(ctx: EngineContext) -> Self {
        let pusher = JobPusher::new(ctx.clone());
        Self {
            ctx,
            locks: LockRegistry::new(),
            pusher,
        }
    }

    /// Create an item's workflow: verify the graph, run it from the root so
    /// the containers auto-start, and persist the result
    pub async fn initialize_item(&self, item: ItemId, graph: WorkflowGraph) -> Result<()> {
        verify(&graph)?;
        let _guard = self
            .locks
            .acquire(item, self.ctx.config.lock_timeout())
            .await?;
        let txn = TransactionKey::new();
        self.ctx.store.begin(&txn).await?;
        match self.initialize_in(&txn, item, graph).await {
            Ok(()) => {
                self.ctx.store.commit(&txn).await?;
                info!(%item, "Item workflow initialized");
                Ok(())
            }
            Err(error) => {
                self.abort_quietly(item, &txn).await;
                Err(error)
            }
        }
    }

    async fn initialize_in(
        &self,
        txn: &TransactionKey,
        item: ItemId,
        mut graph: WorkflowGraph,
    ) -> Result<()> {
        if self
            .ctx
            .store
            .get(item, paths::WORKFLOW, Some(txn))
            .await?
            .is_some()
        {
            return Err(invalid_data(format!("Item {item} is already initialized")));
        }
        let mut scope = RequestScope::new(item, *txn);
        let root = graph.root();
        vertex_lifecycle::run(&self.ctx, &mut graph, &mut scope, root).await?;
        self.ctx
            .store
            .put(item, paths::WORKFLOW, serde_json::to_value(&graph)?, txn)
            .await?;
        Ok(())
    }

    /// The single externally reachable entry point: one transition request,
    /// atomic per item, returning the marshalled outcome
    #[instrument(skip(self, agent, payload, attachment), fields(%item, step = step_path, transition = transition_id))]
    pub async fn request_action(
        &self,
        item: ItemId,
        agent: &AgentProfile,
        step_path: &str,
        transition_id: i32,
        payload: Option<Value>,
        attachment: Option<Attachment>,
    ) -> Result<Option<String>> {
        self.request_at_depth(item, agent, step_path, transition_id, payload, attachment, 0)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    fn request_at_depth<'a>(
        &'a self,
        item: ItemId,
        agent: &'a AgentProfile,
        step_path: &'a str,
        transition_id: i32,
        payload: Option<Value>,
        attachment: Option<Attachment>,
        depth: u32,
    ) -> BoxFuture<'a, Result<Option<String>>> {
        async move {
            if depth > self.ctx.config.max_followup_depth {
                return Err(invalid_data(format!(
                    "Follow-up requests exceeded the cascade bound of {}",
                    self.ctx.config.max_followup_depth
                )));
            }
            let guard = self
                .locks
                .acquire(item, self.ctx.config.lock_timeout())
                .await?;
            let result = self
                .execute(item, agent, step_path, transition_id, payload, attachment)
                .await;
            let result = match result {
                Ok(committed) => Ok(committed),
                Err(error) => {
                    if self.ctx.config.error_transitions_enabled {
                        self.run_error_transition(item, agent, step_path, transition_id, &error)
                            .await;
                    }
                    Err(error)
                }
            };
            drop(guard);

            match result {
                Ok(committed) => {
                    self.ctx.publisher.publish(
                        lifecycle::TRANSITION_COMMITTED,
                        json!({ "item": item, "step": step_path, "transition": transition_id }),
                    );
                    for role in &committed.push_roles {
                        self.pusher.push(item, role.clone());
                    }
                    self.drain_followups(committed.followups, depth).await;
                    match committed.outcome {
                        Some(value) => Ok(Some(self.ctx.marshaller.marshal(&value)?)),
                        None => Ok(None),
                    }
                }
                Err(error) => {
                    self.ctx.publisher.publish(
                        lifecycle::TRANSITION_FAILED,
                        json!({
                            "item": item,
                            "step": step_path,
                            "transition": transition_id,
                            "error": error.kind(),
                        }),
                    );
                    Err(error)
                }
            }
        }
        .boxed()
    }

    /// One transition under one fresh transaction, committed or fully aborted
    async fn execute(
        &self,
        item: ItemId,
        agent: &AgentProfile,
        step_path: &str,
        transition_id: i32,
        payload: Option<Value>,
        attachment: Option<Attachment>,
    ) -> Result<CommittedRequest> {
        let txn = TransactionKey::new();
        self.ctx.store.begin(&txn).await?;
        match self
            .execute_in(&txn, item, agent, step_path, transition_id, payload, attachment)
            .await
        {
            Ok(committed) => {
                self.ctx.store.commit(&txn).await?;
                Ok(committed)
            }
            Err(error) => {
                self.abort_quietly(item, &txn).await;
                Err(error)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute_in(
        &self,
        txn: &TransactionKey,
        item: ItemId,
        agent: &AgentProfile,
        step_path: &str,
        transition_id: i32,
        payload: Option<Value>,
        attachment: Option<Attachment>,
    ) -> Result<CommittedRequest> {
        let mut graph = self.load_workflow(item, Some(txn)).await?;
        let vertex = graph.find_by_path(step_path)?;
        let mut scope = RequestScope::new(item, *txn);
        let args = RequestArgs {
            agent: agent.clone(),
            vertex,
            transition_id,
            payload,
            attachment,
        };
        let outcome = request(&self.ctx, &mut graph, &mut scope, args).await?;

        // Purely administrative requests leave the serialized workflow alone
        if scope.domain_touched {
            self.ctx
                .store
                .put(item, paths::WORKFLOW, serde_json::to_value(&graph)?, txn)
                .await?;
        }
        let push_roles = roles_of_touched(&graph, &scope);
        Ok(CommittedRequest {
            outcome,
            followups: scope.followups,
            push_roles,
        })
    }

    /// Best-effort compensation: fire the failing transition's declared
    /// error transition in a second, independent transaction
    async fn run_error_transition(
        &self,
        item: ItemId,
        agent: &AgentProfile,
        step_path: &str,
        transition_id: i32,
        error: &EngineError,
    ) {
        let error_transition = match self.error_transition_of(item, step_path, transition_id).await
        {
            Ok(Some(id)) => id,
            Ok(None) => return,
            Err(resolve_error) => {
                debug!(%item, step = step_path, error = %resolve_error, "No error transition resolvable");
                return;
            }
        };
        let failure = StructuredFailure::from_error(
            error,
            Some(step_path.to_string()),
            Some(transition_id),
        );
        let payload = match serde_json::to_value(&failure) {
            Ok(value) => value,
            Err(marshal_error) => {
                warn!(%item, step = step_path, error = %marshal_error, "Failure payload marshalling failed");
                return;
            }
        };
        match self
            .execute(item, agent, step_path, error_transition, Some(payload), None)
            .await
        {
            Ok(_) => {
                info!(%item, step = step_path, transition = error_transition, "Error transition committed");
            }
            Err(compensation_error) => {
                warn!(
                    %item,
                    step = step_path,
                    error = %compensation_error,
                    "Error transition failed; original failure stands"
                );
            }
        }
    }

    async fn error_transition_of(
        &self,
        item: ItemId,
        step_path: &str,
        transition_id: i32,
    ) -> Result<Option<i32>> {
        let graph = self.load_workflow(item, None).await?;
        let vertex = graph.find_by_path(step_path)?;
        let machine = self.ctx.machine_for(graph.vertex(vertex)?)?;
        Ok(machine.transition(transition_id)?.error_transition)
    }

    /// Run queued follow-up requests, each in its own transaction; failures
    /// are logged and never undo the already-committed primary transition
    async fn drain_followups(&self, followups: Vec<FollowUpRequest>, depth: u32) {
        for followup in followups {
            let result = self
                .request_at_depth(
                    followup.item,
                    &followup.agent,
                    &followup.step_path,
                    followup.transition_id,
                    followup.payload,
                    followup.attachment,
                    depth + 1,
                )
                .await;
            if let Err(error) = result {
                warn!(
                    item = %followup.item,
                    step = %followup.step_path,
                    %error,
                    "Follow-up request failed"
                );
            }
        }
    }

    async fn load_workflow(
        &self,
        item: ItemId,
        txn: Option<&TransactionKey>,
    ) -> Result<WorkflowGraph> {
        let raw = self
            .ctx
            .store
            .get(item, paths::WORKFLOW, txn)
            .await?
            .ok_or_else(|| not_found(format!("Item {item} has no workflow")))?;
        Ok(serde_json::from_value(raw)?)
    }

    async fn abort_quietly(&self, item: ItemId, txn: &TransactionKey) {
        if let Err(abort_error) = self.ctx.store.abort(txn).await {
            warn!(%item, error = %abort_error, "Abort after failed transition also failed");
        }
        // Anything the backend cached for the item may be dirty now
        self.ctx.store.clear_cache(item, None).await;
    }
}

/// Roles configured on the vertices a request touched, deduplicated
fn roles_of_touched(graph: &WorkflowGraph, scope: &RequestScope) -> Vec<String> {
    let mut roles: Vec<String> = Vec::new();
    for &id in &scope.touched {
        let Ok(vertex) = graph.vertex(id) else {
            continue;
        };
        if let Some(role) = prop_str(&vertex.properties, "AgentRole") {
            if !roles.iter().any(|r| r == role) {
                roles.push(role.to_string());
            }
        }
    }
    roles
}
