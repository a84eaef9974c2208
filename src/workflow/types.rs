use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::guard::{ExecutionDecision, Violation};
use crate::healing::HealRecord;
use crate::lineage::BranchId;
use crate::outcome::aggregator::Aggregation;
use crate::outcome::{StepExecutionResult, WorkflowStatus};

/// One opaque step of a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepSpec {
    pub name: String,
    #[serde(default)]
    pub instructions: String,
}

impl StepSpec {
    pub fn new(name: impl Into<String>, instructions: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instructions: instructions.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowPlan {
    pub steps: Vec<StepSpec>,
}

impl WorkflowPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step(mut self, name: impl Into<String>, instructions: impl Into<String>) -> Self {
        self.steps.push(StepSpec::new(name, instructions));
        self
    }

    pub fn get(&self, name: &str) -> Option<&StepSpec> {
        self.steps.iter().find(|s| s.name == name)
    }
}

/// What a step invocation gets to see.
#[derive(Debug, Clone)]
pub struct StepContext {
    pub run_id: String,
    /// Instructions after escalation for the step's failure count.
    pub instructions: String,
    /// Cognitive attempt, starting at 1.
    pub attempt: u32,
    /// Environment retry within the attempt, starting at 1.
    pub retry: u32,
    /// Set when the step is re-run to verify an artifact that was just healed.
    pub healed_artifact: Option<String>,
    pub assumptions: Map<String, Value>,
    pub strategy: Map<String, Value>,
}

/// Why a run stopped before its last step.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum HaltReason {
    HardFailure { step: String },
    Stopped { step: String, detail: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkflowReport {
    pub run_id: String,
    pub status: WorkflowStatus,
    pub aggregation: Aggregation,
    pub results: Vec<StepExecutionResult>,
    pub decisions: Vec<ExecutionDecision>,
    pub violations: Vec<Violation>,
    pub heals: Vec<HealRecord>,
    pub active_branch: BranchId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub halted: Option<HaltReason>,
    pub cancelled: bool,
}

impl WorkflowReport {
    pub fn result(&self, step: &str) -> Option<&StepExecutionResult> {
        self.results.iter().find(|r| r.step == step)
    }
}
