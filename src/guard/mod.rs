pub mod invariant;
pub mod router;

pub use invariant::{check, has_fatal, Invariant, InvariantSet, Severity, Violation};
pub use router::{DecisionContext, ExecutionAction, ExecutionDecision, ExecutionRouter};
