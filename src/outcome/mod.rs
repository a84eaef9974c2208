pub mod aggregator;
pub mod classifier;

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Result of a single step, from the resilience layer's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    Success,
    /// Logical impossibility. Global; neither retry nor healing can fix it.
    HardFailure,
    /// The generated artifact is wrong. Eligible for healing.
    CognitiveFailure,
    /// Platform constraint. Regenerating the artifact will not help.
    EnvironmentFailure,
}

impl Outcome {
    pub fn is_success(self) -> bool {
        matches!(self, Outcome::Success)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Success => "SUCCESS",
            Outcome::HardFailure => "HARD_FAILURE",
            Outcome::CognitiveFailure => "COGNITIVE_FAILURE",
            Outcome::EnvironmentFailure => "ENVIRONMENT_FAILURE",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a whole workflow run, derived from every step result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowStatus {
    Success,
    SuccessWithDegradation,
    Failed,
    Running,
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkflowStatus::Success => "SUCCESS",
            WorkflowStatus::SuccessWithDegradation => "SUCCESS_WITH_DEGRADATION",
            WorkflowStatus::Failed => "FAILED",
            WorkflowStatus::Running => "RUNNING",
        };
        f.write_str(s)
    }
}

/// What a step produced or what happened to it.
///
/// `isolated` quarantines a failure so it does not block sibling steps. It
/// never hides a [`Outcome::HardFailure`] from aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepExecutionResult {
    pub outcome: Outcome,
    pub step: String,
    #[serde(default)]
    pub isolated: bool,
    #[serde(default)]
    pub artifacts: Vec<String>,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepExecutionResult {
    pub fn success(step: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Success,
            step: step.into(),
            isolated: false,
            artifacts: Vec::new(),
            data: Map::new(),
            error: None,
        }
    }

    pub fn failure(step: impl Into<String>, outcome: Outcome, error: impl Into<String>) -> Self {
        Self {
            outcome,
            step: step.into(),
            isolated: false,
            artifacts: Vec::new(),
            data: Map::new(),
            error: Some(error.into()),
        }
    }

    pub fn isolate(mut self) -> Self {
        self.isolated = true;
        self
    }

    pub fn with_artifact(mut self, artifact: impl Into<String>) -> Self {
        self.artifacts.push(artifact.into());
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }
}
