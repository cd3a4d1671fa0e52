//! Built-in machine definitions.
//!
//! Three machines cover the stock vertex kinds: `Default` for atomic steps,
//! `CompositeDef` for composites (its `Start` is reinitializing so activation
//! cascades into the sub-graph), and `PredefinedStep` for repeatable
//! administrative steps. Items may register their own machines on top.

use super::definition::{
    OutcomeRequirement, ReservationRule, StateDef, StateMachineDef, TransitionDef,
};

/// Machine assigned to atomic activities without an explicit reference
pub const DEFAULT_MACHINE: &str = "Default";
/// Machine assigned to composite activities without an explicit reference
pub const COMPOSITE_MACHINE: &str = "CompositeDef";
/// Machine assigned to administrative predefined steps
pub const PREDEFINED_MACHINE: &str = "PredefinedStep";

/// States shared by the two lifecycle machines
pub mod states {
    pub const WAITING: i32 = 0;
    pub const STARTED: i32 = 1;
    pub const FINISHED: i32 = 2;
    pub const SUSPENDED: i32 = 3;
}

/// Transition ids of the `Default` machine
pub mod default_transitions {
    pub const START: i32 = 0;
    pub const COMPLETE: i32 = 1;
    pub const DONE: i32 = 2;
    pub const SUSPEND: i32 = 3;
    pub const RESUME: i32 = 4;
}

/// Transition ids of the `CompositeDef` machine
pub mod composite_transitions {
    pub const START: i32 = 0;
    pub const COMPLETE: i32 = 1;
    pub const ABORT: i32 = 2;
}

/// Transition id of the `PredefinedStep` machine
pub const PREDEFINED_DONE: i32 = 0;

/// Waiting → Started → Finished, with a direct Done and Suspend/Resume
pub fn default_machine() -> StateMachineDef {
    use default_transitions as t;
    use states::{FINISHED, STARTED, SUSPENDED, WAITING};

    StateMachineDef::new(DEFAULT_MACHINE, 0, WAITING)
        .with_state(StateDef::new(WAITING, "Waiting", false))
        .with_state(StateDef::new(STARTED, "Started", false))
        .with_state(StateDef::new(FINISHED, "Finished", true))
        .with_state(StateDef::new(SUSPENDED, "Suspended", false))
        .with_transition(
            TransitionDef::new(t::START, "Start", WAITING, STARTED)
                .with_reservation(ReservationRule::Set),
        )
        .with_transition(
            TransitionDef::new(t::COMPLETE, "Complete", STARTED, FINISHED)
                .with_outcome(OutcomeRequirement::Optional {
                    schema: None,
                    version: 0,
                })
                .with_reservation(ReservationRule::Clear),
        )
        .with_transition(TransitionDef::new(t::DONE, "Done", WAITING, FINISHED))
        .with_transition(
            TransitionDef::new(t::SUSPEND, "Suspend", STARTED, SUSPENDED).blocking(),
        )
        .with_transition(TransitionDef::new(t::RESUME, "Resume", SUSPENDED, STARTED))
}

/// Waiting → Started → Finished for composites; Start re-runs the sub-graph
pub fn composite_machine() -> StateMachineDef {
    use composite_transitions as t;
    use states::{FINISHED, STARTED, WAITING};

    StateMachineDef::new(COMPOSITE_MACHINE, 0, WAITING)
        .with_state(StateDef::new(WAITING, "Waiting", false))
        .with_state(StateDef::new(STARTED, "Started", false))
        .with_state(StateDef::new(FINISHED, "Finished", true))
        .with_transition(TransitionDef::new(t::START, "Start", WAITING, STARTED).reinitializing())
        .with_transition(TransitionDef::new(t::COMPLETE, "Complete", STARTED, FINISHED))
        .with_transition(
            TransitionDef::new(t::ABORT, "Abort", STARTED, FINISHED)
                .blocking()
                .abortable(),
        )
}

/// Single repeatable Done self-transition carrying a required outcome
pub fn predefined_machine() -> StateMachineDef {
    StateMachineDef::new(PREDEFINED_MACHINE, 0, 0)
        .with_state(StateDef::new(0, "Available", false))
        .with_transition(
            TransitionDef::new(PREDEFINED_DONE, "Done", 0, 0).with_outcome(
                OutcomeRequirement::Required {
                    schema: None,
                    version: 0,
                },
            ),
        )
}
