// Vertex behaviors and the transition protocol.
//
// The run/run_next/reinit contract, split routing, join gating, composite
// auto-start/auto-finish, and the request algorithm all live here, operating
// on the graph arena through the engine context's collaborators.

pub mod builder;
pub mod context;
pub mod lifecycle;
pub mod predefined;
pub mod request;
pub mod routing;

pub use builder::WorkflowBuilder;
pub use context::{EngineContext, FollowUpRequest, RequestScope};
pub use predefined::{PredefinedRegistry, PredefinedStep};
pub use request::{request, request_boxed, RequestArgs};
