//! # Engine Façade
//!
//! Bundles collaborators, configuration, registries, the dispatcher, and the
//! publisher behind one handle. The default build runs entirely on the
//! in-memory collaborators; deployments swap in their own implementations
//! trait by trait through the builder.

use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::collaborators::memory::{
    JsonMarshaller, MemoryDirectory, MemoryStore, RoleTableSecurity, SchemaTableValidator,
    ScriptHost,
};
use crate::collaborators::{
    Directory, Marshaller, OutcomeValidator, Persistence, ScriptEvaluator, SecurityEvaluator,
};
use crate::config::EngineConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{not_found, Result};
use crate::events::{paths, EventPublisher, PublishedEvent};
use crate::graph::WorkflowGraph;
use crate::jobs::{calculate_all_jobs, calculate_jobs, Job};
use crate::machine::MachineRegistry;
use crate::models::{AgentId, AgentProfile, Attachment, ItemId, TransactionKey};
use crate::workflow::{EngineContext, PredefinedRegistry};

/// The workflow engine: one per process, shared by handle
pub struct Engine {
    ctx: EngineContext,
    dispatcher: Dispatcher,
}

impl Engine {
    /// An engine on the in-memory collaborators with default configuration
    pub fn in_memory() -> Self {
        EngineBuilder::new().build()
    }

    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    pub fn config(&self) -> &EngineConfig {
        &self.ctx.config
    }

    pub fn machines(&self) -> &MachineRegistry {
        &self.ctx.machines
    }

    pub fn predefined(&self) -> &PredefinedRegistry {
        &self.ctx.predefined
    }

    /// Subscribe to lifecycle events (`transition.committed`, ...)
    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.ctx.publisher.subscribe()
    }

    /// Create an item's workflow and let its containers auto-start
    pub async fn initialize_item(&self, item: ItemId, graph: WorkflowGraph) -> Result<()> {
        self.dispatcher.initialize_item(item, graph).await
    }

    /// The single externally reachable entry point: resolve the agent and
    /// run one atomic transition request, returning the marshalled outcome
    pub async fn request_action(
        &self,
        item: ItemId,
        agent: AgentId,
        step_path: &str,
        transition_id: i32,
        payload: Option<Value>,
        attachment: Option<Attachment>,
    ) -> Result<Option<String>> {
        let profile = self.ctx.directory.agent_by_id(agent).await?;
        self.dispatcher
            .request_action(item, &profile, step_path, transition_id, payload, attachment)
            .await
    }

    /// Same entry point for callers already holding a resolved profile
    pub async fn request_action_as(
        &self,
        item: ItemId,
        agent: &AgentProfile,
        step_path: &str,
        transition_id: i32,
        payload: Option<Value>,
        attachment: Option<Attachment>,
    ) -> Result<Option<String>> {
        self.dispatcher
            .request_action(item, agent, step_path, transition_id, payload, attachment)
            .await
    }

    /// Jobs the agent may execute right now, deepest active steps only
    pub async fn calculate_jobs(
        &self,
        agent: &AgentProfile,
        item: ItemId,
        recurse: bool,
    ) -> Result<Vec<Job>> {
        let graph = self.load_workflow(item).await?;
        calculate_jobs(&self.ctx, &graph, agent, item, recurse).await
    }

    /// Every transition the agent could reach regardless of activation
    pub async fn calculate_all_jobs(&self, agent: &AgentProfile, item: ItemId) -> Result<Vec<Job>> {
        let graph = self.load_workflow(item).await?;
        calculate_all_jobs(&self.ctx, &graph, agent, item).await
    }

    /// Committed workflow snapshot of an item, for inspection
    pub async fn workflow_of(&self, item: ItemId) -> Result<WorkflowGraph> {
        self.load_workflow(item).await
    }

    async fn load_workflow(&self, item: ItemId) -> Result<WorkflowGraph> {
        // Short read-only transaction so the computation sees one snapshot
        let txn = TransactionKey::new();
        self.ctx.store.begin(&txn).await?;
        let raw = self.ctx.store.get(item, paths::WORKFLOW, Some(&txn)).await;
        let _ = self.ctx.store.abort(&txn).await;
        let raw = raw?.ok_or_else(|| not_found(format!("Item {item} has no workflow")))?;
        Ok(serde_json::from_value(raw)?)
    }
}

/// Assembles an [`Engine`], defaulting every collaborator to its in-memory
/// implementation
pub struct EngineBuilder {
    config: EngineConfig,
    store: Option<Arc<dyn Persistence>>,
    security: Option<Arc<dyn SecurityEvaluator>>,
    validator: Option<Arc<dyn OutcomeValidator>>,
    scripts: Option<Arc<dyn ScriptEvaluator>>,
    marshaller: Option<Arc<dyn Marshaller>>,
    directory: Option<Arc<dyn Directory>>,
    machines: Option<MachineRegistry>,
    predefined: Option<Arc<PredefinedRegistry>>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            store: None,
            security: None,
            validator: None,
            scripts: None,
            marshaller: None,
            directory: None,
            machines: None,
            predefined: None,
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn Persistence>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_security(mut self, security: Arc<dyn SecurityEvaluator>) -> Self {
        self.security = Some(security);
        self
    }

    pub fn with_validator(mut self, validator: Arc<dyn OutcomeValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn with_scripts(mut self, scripts: Arc<dyn ScriptEvaluator>) -> Self {
        self.scripts = Some(scripts);
        self
    }

    pub fn with_marshaller(mut self, marshaller: Arc<dyn Marshaller>) -> Self {
        self.marshaller = Some(marshaller);
        self
    }

    pub fn with_directory(mut self, directory: Arc<dyn Directory>) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn with_machines(mut self, machines: MachineRegistry) -> Self {
        self.machines = Some(machines);
        self
    }

    pub fn with_predefined(mut self, predefined: Arc<PredefinedRegistry>) -> Self {
        self.predefined = Some(predefined);
        self
    }

    pub fn build(self) -> Engine {
        let publisher = EventPublisher::new(self.config.event_channel_capacity);
        let ctx = EngineContext {
            store: self.store.unwrap_or_else(|| Arc::new(MemoryStore::new())),
            security: self
                .security
                .unwrap_or_else(|| Arc::new(RoleTableSecurity::new())),
            validator: self
                .validator
                .unwrap_or_else(|| Arc::new(SchemaTableValidator::permissive())),
            scripts: self.scripts.unwrap_or_else(|| Arc::new(ScriptHost::new())),
            marshaller: self.marshaller.unwrap_or_else(|| Arc::new(JsonMarshaller)),
            directory: self
                .directory
                .unwrap_or_else(|| Arc::new(MemoryDirectory::new())),
            machines: self.machines.unwrap_or_default(),
            predefined: self
                .predefined
                .unwrap_or_else(|| Arc::new(PredefinedRegistry::new())),
            publisher,
            config: self.config,
        };
        Engine {
            dispatcher: Dispatcher::new(ctx.clone()),
            ctx,
        }
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
