use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::RouterConfig;
use crate::lineage::Branch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionAction {
    Run,
    Stop,
    Heal,
    Mutate,
    Skip,
    Retry,
}

impl ExecutionAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionAction::Run => "RUN",
            ExecutionAction::Stop => "STOP",
            ExecutionAction::Heal => "HEAL",
            ExecutionAction::Mutate => "MUTATE",
            ExecutionAction::Skip => "SKIP",
            ExecutionAction::Retry => "RETRY",
        }
    }
}

impl fmt::Display for ExecutionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "RUN" => Ok(Self::Run),
            "STOP" => Ok(Self::Stop),
            "HEAL" => Ok(Self::Heal),
            "MUTATE" => Ok(Self::Mutate),
            "SKIP" => Ok(Self::Skip),
            "RETRY" => Ok(Self::Retry),
            other => Err(format!("Unknown execution action: {other}")),
        }
    }
}

/// One routing decision. Fields are private so a recorded decision cannot
/// be edited after the fact.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionDecision {
    action: ExecutionAction,
    reason: String,
    confidence: f64,
    metadata: Map<String, Value>,
    decided_at: DateTime<Utc>,
}

impl ExecutionDecision {
    pub fn new(action: ExecutionAction, reason: impl Into<String>, confidence: f64) -> Self {
        Self {
            action,
            reason: reason.into(),
            confidence: confidence.clamp(0.0, 1.0),
            metadata: Map::new(),
            decided_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn action(&self) -> ExecutionAction {
        self.action
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    pub fn decided_at(&self) -> DateTime<Utc> {
        self.decided_at
    }
}

/// What the router is asked to decide about.
#[derive(Debug, Clone, Default)]
pub struct DecisionContext {
    pub step: String,
}

impl DecisionContext {
    pub fn for_step(step: impl Into<String>) -> Self {
        Self { step: step.into() }
    }
}

/// Advises what to do next with a branch. Never mutates the branch; every
/// decision lands in an append-only audit history.
#[derive(Debug)]
pub struct ExecutionRouter {
    max_failures: u32,
    heal_entropy_threshold: f64,
    history: Vec<ExecutionDecision>,
}

impl Default for ExecutionRouter {
    fn default() -> Self {
        Self::from_config(&RouterConfig::default())
    }
}

impl ExecutionRouter {
    pub fn from_config(config: &RouterConfig) -> Self {
        Self {
            max_failures: config.max_failures,
            heal_entropy_threshold: config.heal_entropy_threshold,
            history: Vec::new(),
        }
    }

    pub fn decide(&mut self, branch: &Branch, context: &DecisionContext) -> ExecutionDecision {
        let failures = branch.stats.failures;
        let decision = if failures >= self.max_failures {
            ExecutionDecision::new(
                ExecutionAction::Stop,
                format!("{failures} failures reached the limit of {}", self.max_failures),
                1.0,
            )
        } else if branch.entropy > self.heal_entropy_threshold {
            ExecutionDecision::new(
                ExecutionAction::Heal,
                format!(
                    "entropy {:.3} above {:.3}",
                    branch.entropy, self.heal_entropy_threshold
                ),
                0.7,
            )
        } else if branch.has_completed(&context.step) {
            ExecutionDecision::new(
                ExecutionAction::Skip,
                format!("step '{}' already completed on this branch", context.step),
                1.0,
            )
        } else {
            ExecutionDecision::new(ExecutionAction::Run, "branch healthy", 1.0)
        };

        let decision = decision
            .with_metadata("branch", branch.id.to_string())
            .with_metadata("step", context.step.clone())
            .with_metadata("entropy", branch.entropy)
            .with_metadata("failures", failures);

        self.record(decision.clone());
        decision
    }

    /// Append a decision made elsewhere (e.g. a retry chosen by the runner).
    pub fn record(&mut self, decision: ExecutionDecision) {
        tracing::info!(
            action = %decision.action,
            confidence = decision.confidence,
            reason = %decision.reason,
            "Execution decision"
        );
        self.history.push(decision);
    }

    pub fn history(&self) -> &[ExecutionDecision] {
        &self.history
    }
}
