// Job Lifecycle State Machine
//
// Validates and persists job status transitions, keeps the append-only
// audit trail, and fires automated side effects on entering specific
// states.

pub mod guards;
pub mod machine;

pub use guards::unmet_guards;
pub use machine::{
    AllowedTransition, JobStateMachine, JobUpdates, TransitionOutcome, TransitionRequest,
};
