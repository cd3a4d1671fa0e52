// State machine definitions: immutable, versioned descriptions of the states
// and transitions an activity may move through, shared read-only across all
// workflow instances via the registry cache.

pub mod builtin;
pub mod definition;
pub mod registry;

pub use builtin::{COMPOSITE_MACHINE, DEFAULT_MACHINE, PREDEFINED_MACHINE};
pub use definition::{
    OutcomeRequirement, ReservationRule, StateDef, StateMachineDef, TransitionDef,
};
pub use registry::MachineRegistry;
