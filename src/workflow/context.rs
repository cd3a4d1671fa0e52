//! Shared context threaded through every transition request.
//!
//! [`EngineContext`] bundles the collaborators, configuration, and caches one
//! engine instance owns; [`RequestScope`] tracks the per-request transaction
//! key, the follow-up queue, and which vertices were touched.

use std::sync::Arc;
use uuid::Uuid;

use crate::collaborators::{
    Directory, Marshaller, OutcomeValidator, Persistence, ScriptEvaluator, SecurityEvaluator,
};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::events::EventPublisher;
use crate::graph::{Vertex, VertexId};
use crate::machine::{MachineRegistry, StateMachineDef};
use crate::models::{AgentId, AgentProfile, Attachment, ItemId, TransactionKey};
use crate::workflow::predefined::PredefinedRegistry;

/// Collaborators, configuration, and caches shared by all requests
#[derive(Clone)]
pub struct EngineContext {
    pub store: Arc<dyn Persistence>,
    pub security: Arc<dyn SecurityEvaluator>,
    pub validator: Arc<dyn OutcomeValidator>,
    pub scripts: Arc<dyn ScriptEvaluator>,
    pub marshaller: Arc<dyn Marshaller>,
    pub directory: Arc<dyn Directory>,
    pub machines: MachineRegistry,
    pub predefined: Arc<PredefinedRegistry>,
    pub publisher: EventPublisher,
    pub config: EngineConfig,
}

impl EngineContext {
    /// The agent automatic composite transitions run under
    pub fn system_agent(&self) -> AgentProfile {
        AgentProfile {
            id: AgentId(Uuid::nil()),
            name: self.config.system_agent_name.clone(),
            roles: vec!["system".to_string()],
        }
    }

    /// Resolve the machine definition an activity vertex runs under
    pub fn machine_for(&self, vertex: &Vertex) -> Result<Arc<StateMachineDef>> {
        let (name, version) = vertex.machine_ref();
        self.machines.resolve(&name, version)
    }
}

/// Transition request queued by a predefined step, executed after the
/// primary transaction commits, each in its own transaction
#[derive(Debug, Clone)]
pub struct FollowUpRequest {
    pub agent: AgentProfile,
    pub item: ItemId,
    pub step_path: String,
    pub transition_id: i32,
    pub payload: Option<serde_json::Value>,
    pub attachment: Option<Attachment>,
}

/// Per-request mutable state
#[derive(Debug)]
pub struct RequestScope {
    pub item: ItemId,
    pub txn: TransactionKey,
    /// Requests queued during §4.2 step 6, drained post-commit
    pub followups: Vec<FollowUpRequest>,
    /// Vertices whose runtime state changed, in touch order
    pub touched: Vec<VertexId>,
    /// Whether anything outside the predefined container changed
    pub domain_touched: bool,
}

impl RequestScope {
    pub fn new(item: ItemId, txn: TransactionKey) -> Self {
        Self {
            item,
            txn,
            followups: Vec::new(),
            touched: Vec::new(),
            domain_touched: false,
        }
    }

    /// Record a runtime mutation of a vertex
    pub fn touch(&mut self, vertex: VertexId, administrative: bool) {
        if !self.touched.contains(&vertex) {
            self.touched.push(vertex);
        }
        if !administrative {
            self.domain_touched = true;
        }
    }

    pub fn queue_followup(&mut self, followup: FollowUpRequest) {
        self.followups.push(followup);
    }
}
