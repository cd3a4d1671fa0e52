//! Shared fixtures for the integration suites: an engine wired to the
//! in-memory collaborators plus the machines and workflow shapes the suites
//! exercise.

#![allow(dead_code)]

use std::sync::Arc;

use itemflow::collaborators::memory::{
    MemoryDirectory, MemoryStore, SchemaTableValidator, ScriptHost,
};
use itemflow::machine::{OutcomeRequirement, StateDef, StateMachineDef, TransitionDef};
use itemflow::models::{AgentProfile, ItemId};
use itemflow::{Engine, EngineConfig, WorkflowBuilder};

pub struct Harness {
    pub engine: Engine,
    pub store: Arc<MemoryStore>,
    pub directory: Arc<MemoryDirectory>,
    pub scripts: Arc<ScriptHost>,
    pub validator: Arc<SchemaTableValidator>,
}

/// Engine on fresh in-memory collaborators, permissive outcome validation
pub fn harness() -> Harness {
    harness_with(EngineConfig::default())
}

pub fn harness_with(config: EngineConfig) -> Harness {
    build_harness(config, SchemaTableValidator::permissive())
}

/// Harness whose validator rejects unregistered schemas
pub fn strict_harness() -> Harness {
    build_harness(EngineConfig::default(), SchemaTableValidator::new())
}

fn build_harness(config: EngineConfig, validator: SchemaTableValidator) -> Harness {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    let store = Arc::new(MemoryStore::new());
    let directory = Arc::new(MemoryDirectory::new());
    let scripts = Arc::new(ScriptHost::new());
    let validator = Arc::new(validator);
    let engine = Engine::builder()
        .with_config(config)
        .with_store(store.clone())
        .with_directory(directory.clone())
        .with_scripts(scripts.clone())
        .with_validator(validator.clone())
        .build();
    Harness {
        engine,
        store,
        directory,
        scripts,
        validator,
    }
}

impl Harness {
    /// Register an agent with the directory and hand back its profile
    pub fn agent(&self, name: &str, roles: &[&str]) -> AgentProfile {
        self.directory.register(AgentProfile::new(
            name,
            roles.iter().map(|r| (*r).to_string()).collect(),
        ))
    }

    /// Initialize an item with a `Draft -> Review` domain
    pub async fn linear_item(&self) -> ItemId {
        let mut builder = WorkflowBuilder::new().unwrap();
        let draft = builder.step("Draft").unwrap();
        let review = builder.step("Review").unwrap();
        builder.connect(draft, review).unwrap();
        let item = ItemId::new();
        self.engine
            .initialize_item(item, builder.build().unwrap())
            .await
            .unwrap();
        item
    }

    /// Committed history events of an item, excluding the sequence counter
    pub fn event_count(&self, item: ItemId) -> usize {
        self.store
            .committed_paths_under(item, "history/")
            .into_iter()
            .filter(|p| p != "history/next")
            .count()
    }

    /// Committed outcome record paths of an item
    pub fn outcome_paths(&self, item: ItemId) -> Vec<String> {
        self.store.committed_paths_under(item, "outcome/")
    }

    /// State code and active flag of a step in the committed workflow
    pub async fn step_state(&self, item: ItemId, path: &str) -> (i32, bool) {
        let graph = self.engine.workflow_of(item).await.unwrap();
        let id = graph.find_by_path(path).unwrap();
        let vertex = graph.vertex(id).unwrap();
        (vertex.state, vertex.active)
    }
}

/// Drafting -> Submitted via a single `Submit` transition
pub fn editorial_machine() -> StateMachineDef {
    StateMachineDef::new("Editorial", 0, 0)
        .with_state(StateDef::new(0, "Drafting", false))
        .with_state(StateDef::new(1, "Submitted", true))
        .with_transition(TransitionDef::new(0, "Submit", 0, 1))
}

/// Machine whose `Finish` declares `Fail` as its error transition
pub fn guarded_machine() -> StateMachineDef {
    StateMachineDef::new("Guarded", 0, 0)
        .with_state(StateDef::new(0, "Waiting", false))
        .with_state(StateDef::new(1, "Started", false))
        .with_state(StateDef::new(2, "Finished", true))
        .with_state(StateDef::new(3, "Failed", false))
        .with_transition(TransitionDef::new(0, "Start", 0, 1))
        .with_transition(
            TransitionDef::new(1, "Finish", 1, 2)
                .with_outcome(OutcomeRequirement::Required {
                    schema: None,
                    version: 0,
                })
                .with_error_transition(2),
        )
        .with_transition(
            TransitionDef::new(2, "Fail", 1, 3).with_outcome(OutcomeRequirement::Optional {
                schema: None,
                version: 0,
            }),
        )
}

/// Composite machine offering two finishing transitions from its running
/// state, so auto-finish is always ambiguous
pub fn two_way_out_machine() -> StateMachineDef {
    StateMachineDef::new("TwoWayOut", 0, 0)
        .with_state(StateDef::new(0, "Waiting", false))
        .with_state(StateDef::new(1, "Started", false))
        .with_state(StateDef::new(2, "Accepted", true))
        .with_state(StateDef::new(3, "Rejected", true))
        .with_transition(TransitionDef::new(0, "Start", 0, 1).reinitializing())
        .with_transition(TransitionDef::new(1, "Accept", 1, 2))
        .with_transition(TransitionDef::new(2, "Reject", 1, 3))
}
