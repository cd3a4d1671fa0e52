#![allow(clippy::doc_markdown)] // Allow technical terms without backticks in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Itemflow
//!
//! Workflow graph and state-machine engine with a transactional transition
//! protocol for long-lived business items.
//!
//! ## Overview
//!
//! Each item carries its own workflow: a directed graph of steps whose
//! execution is governed by per-step state machines. Concurrent agents
//! request state transitions; the engine validates, executes, and records
//! each transition atomically per item, then decides whether the surrounding
//! structure (splits, joins, loops, composites) auto-advances. Executable
//! next actions are computed as ephemeral jobs and asynchronously pushed to
//! the agents holding the relevant roles.
//!
//! Infrastructure is consumed through narrow collaborator traits
//! (persistence, security, validation, scripting, marshalling, agent
//! directory); in-memory reference implementations ship with the crate so
//! the engine runs without any infrastructure at all.
//!
//! ## Module Organization
//!
//! - [`graph`] - Arena-backed workflow graphs: vertices, edges, verification
//! - [`machine`] - Versioned state machine definitions and their registry
//! - [`workflow`] - Vertex behaviors and the transition protocol
//! - [`jobs`] - Job computation and best-effort delivery
//! - [`dispatcher`] - Item locks, transactions, and the error-transition path
//! - [`collaborators`] - External interface traits and in-memory backends
//! - [`events`] - Persisted history records and lifecycle broadcasting
//! - [`engine`] - The façade bundling all of the above
//! - [`config`] - Engine configuration
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use itemflow::{Engine, ItemId, WorkflowBuilder};
//!
//! # async fn example() -> itemflow::Result<()> {
//! let engine = Engine::in_memory();
//!
//! let mut builder = WorkflowBuilder::new()?;
//! let draft = builder.step("Draft")?;
//! let review = builder.step("Review")?;
//! builder.connect(draft, review)?;
//!
//! let item = ItemId::new();
//! engine.initialize_item(item, builder.build()?).await?;
//! # Ok(())
//! # }
//! ```

pub mod collaborators;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod events;
pub mod graph;
pub mod jobs;
pub mod machine;
pub mod models;
pub mod workflow;

pub use config::EngineConfig;
pub use engine::{Engine, EngineBuilder};
pub use error::{EngineError, Result, StructuredFailure};
pub use graph::{VertexId, VertexKind, WorkflowGraph};
pub use jobs::Job;
pub use machine::{MachineRegistry, StateMachineDef};
pub use models::{AgentId, AgentProfile, Attachment, ItemId, TransactionKey};
pub use workflow::WorkflowBuilder;
