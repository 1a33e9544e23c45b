//! The planloop orchestration loop.
//!
//! Five fixed roles pass one task around until the Critic is satisfied:
//!
//! 1. **User** states the task once
//! 2. **Planner** writes a versioned plan
//! 3. **Engineer** turns each step into an operation, **Executor** performs it
//! 4. **Critic** either reports gaps (back to 2) or ends the run
//!
//! The loop is bounded by `max_iterations`; see [`Orchestrator::run_task`].

pub mod critic;
pub mod engineer;
pub mod orchestrator;
pub mod outcome;
pub mod role;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use critic::{CriticVerdict, Decision, Route};
pub use engineer::{EngineerPass, ExecutionPass, StepFailure};
pub use orchestrator::{Orchestrator, RunState};
pub use outcome::{
    FailureKind, ProtocolViolation, RunDiagnostics, RunFailure, RunOutcome, RunStatus,
};
pub use role::{ContextBlock, RoleAgent, RoleSet, RoleSpec, role_spec, role_table};
