//! # Job Pusher
//!
//! Best-effort background fan-out of fresh job lists to every agent holding
//! a role. Delivery runs outside the triggering transition; per-agent
//! failures are logged and never abort delivery to other agents, let alone
//! the transition itself.

use serde_json::json;
use tracing::{debug, warn};

use super::calculator::calculate_jobs;
use super::Job;
use crate::error::{not_found, Result};
use crate::events::{paths, publisher::lifecycle};
use crate::graph::WorkflowGraph;
use crate::models::{AgentProfile, ItemId, TransactionKey};
use crate::workflow::EngineContext;

/// Asynchronous job fan-out bound to one engine instance
#[derive(Clone)]
pub struct JobPusher {
    ctx: EngineContext,
}

impl JobPusher {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    /// Fire-and-forget fan-out for one role on one item
    pub fn push(&self, item: ItemId, role: String) {
        if !self.ctx.config.job_push_enabled {
            return;
        }
        let ctx = self.ctx.clone();
        tokio::spawn(async move {
            Self::push_now(&ctx, item, &role).await;
        });
    }

    /// The fan-out itself, awaitable for tests and synchronous embedding
    ///
    /// Returns the number of agents that received a delivery.
    pub async fn push_now(ctx: &EngineContext, item: ItemId, role: &str) -> usize {
        let agents = match ctx.directory.agents_holding_role(role).await {
            Ok(agents) => agents,
            Err(error) => {
                warn!(%item, role, %error, "Role resolution failed, no jobs pushed");
                return 0;
            }
        };
        let mut delivered = 0;
        for agent in &agents {
            match Self::push_to_agent(ctx, item, agent).await {
                Ok(count) => {
                    debug!(%item, agent = %agent.name, jobs = count, "Pushed job list");
                    delivered += 1;
                }
                Err(error) => {
                    // Isolated per agent: the rest of the fan-out continues
                    warn!(%item, agent = %agent.name, %error, "Job push failed");
                }
            }
        }
        ctx.publisher.publish(
            lifecycle::JOBS_PUSHED,
            json!({ "item": item, "role": role, "agents": delivered }),
        );
        delivered
    }

    /// Compute and deliver one agent's job list inside its own short
    /// read-only transaction
    async fn push_to_agent(
        ctx: &EngineContext,
        item: ItemId,
        agent: &AgentProfile,
    ) -> Result<usize> {
        let txn = TransactionKey::new();
        ctx.store.begin(&txn).await?;
        let computed = Self::compute(ctx, item, agent, &txn).await;
        if let Err(error) = ctx.store.abort(&txn).await {
            warn!(%item, %error, "Releasing job computation transaction failed");
        }
        let jobs = computed?;
        let count = jobs.len();
        ctx.directory.deliver_jobs(agent, jobs).await?;
        Ok(count)
    }

    async fn compute(
        ctx: &EngineContext,
        item: ItemId,
        agent: &AgentProfile,
        txn: &TransactionKey,
    ) -> Result<Vec<Job>> {
        let raw = ctx
            .store
            .get(item, paths::WORKFLOW, Some(txn))
            .await?
            .ok_or_else(|| not_found(format!("Item {item} has no workflow")))?;
        let graph: WorkflowGraph = serde_json::from_value(raw)?;
        calculate_jobs(ctx, &graph, agent, item, true).await
    }
}
