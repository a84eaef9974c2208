pub mod runner;
pub mod types;

use async_trait::async_trait;
use serde_json::Value;

pub use runner::WorkflowRunner;
pub use types::{HaltReason, StepContext, StepSpec, WorkflowPlan, WorkflowReport};

use crate::outcome::StepExecutionResult;

/// The generative body of a step.
///
/// Returning `Err` means the step raised; the error is classified by the
/// runner. Returning `Ok` with a failure outcome is taken as already
/// classified.
#[async_trait]
pub trait StepRunner: Send + Sync {
    async fn run_step(&self, step: &StepSpec, ctx: &StepContext) -> anyhow::Result<StepExecutionResult>;

    /// Evidence standing in for an environment-isolated step, e.g. a static
    /// analysis result when the live check could not run.
    async fn substitute_evidence(&self, _step: &StepSpec) -> Option<Value> {
        None
    }
}
