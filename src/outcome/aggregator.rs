use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use super::{Outcome, StepExecutionResult, WorkflowStatus};

/// Substitute evidence gathered for isolated steps, keyed by step name.
pub type Evidence = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IsolatedStep {
    pub step: String,
    pub outcome: Outcome,
    pub error: Option<String>,
}

/// Explains why a successful run is only "successful with degradation".
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DegradationReport {
    pub isolated_steps: Vec<IsolatedStep>,
    pub quarantined_artifacts: Vec<String>,
    pub evidence: Evidence,
}

impl DegradationReport {
    pub fn step_names(&self) -> Vec<&str> {
        self.isolated_steps.iter().map(|s| s.step.as_str()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Aggregation {
    pub status: WorkflowStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<DegradationReport>,
    /// The result that forced a `FAILED` status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forced_by: Option<StepExecutionResult>,
}

impl Aggregation {
    fn status(status: WorkflowStatus) -> Self {
        Self {
            status,
            report: None,
            forced_by: None,
        }
    }

    fn failed(result: &StepExecutionResult) -> Self {
        Self {
            status: WorkflowStatus::Failed,
            report: None,
            forced_by: Some(result.clone()),
        }
    }
}

/// Fold per-step results into one workflow status. A run is degraded when
/// every active step succeeded and at least one failure was isolated.
pub fn aggregate(results: &[StepExecutionResult], evidence: Option<&Evidence>) -> Aggregation {
    // Impossibilities are global. Isolation cannot hide them.
    if let Some(hard) = results.iter().find(|r| r.outcome == Outcome::HardFailure) {
        tracing::warn!(step = %hard.step, isolated = hard.isolated, "Hard failure forces FAILED");
        return Aggregation::failed(hard);
    }

    if results.is_empty() {
        return Aggregation::status(WorkflowStatus::Running);
    }

    let (isolated, active): (Vec<_>, Vec<_>) = results.iter().partition(|r| r.isolated);

    if active.iter().all(|r| r.is_success()) {
        if isolated.is_empty() {
            return Aggregation::status(WorkflowStatus::Success);
        }

        let report = DegradationReport {
            isolated_steps: isolated
                .iter()
                .map(|r| IsolatedStep {
                    step: r.step.clone(),
                    outcome: r.outcome,
                    error: r.error.clone(),
                })
                .collect(),
            quarantined_artifacts: isolated
                .iter()
                .flat_map(|r| r.artifacts.iter().cloned())
                .collect(),
            evidence: evidence.cloned().unwrap_or_default(),
        };

        tracing::info!(
            isolated = ?report.step_names(),
            evidence = report.evidence.len(),
            "Run succeeded with degradation"
        );

        return Aggregation {
            status: WorkflowStatus::SuccessWithDegradation,
            report: Some(report),
            forced_by: None,
        };
    }

    if let Some(unhealed) = active
        .iter()
        .find(|r| r.outcome == Outcome::CognitiveFailure)
    {
        tracing::warn!(step = %unhealed.step, "Unhealed cognitive failure forces FAILED");
        return Aggregation::failed(unhealed);
    }

    Aggregation::status(WorkflowStatus::Running)
}
