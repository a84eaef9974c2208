use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::{LineageConfig, RouterConfig};
use crate::lineage::Branch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Fatal,
    NonFatal,
    Recoverable,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub code: String,
    pub message: String,
    pub severity: Severity,
    #[serde(default)]
    pub context: Map<String, Value>,
}

impl Violation {
    pub fn new(code: impl Into<String>, message: impl Into<String>, severity: Severity) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            severity,
            context: Map::new(),
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn is_fatal(&self) -> bool {
        self.severity == Severity::Fatal
    }
}

pub const DETECTOR_ERROR_CODE: &str = "InvariantDetectorError";

/// A named structural check over a branch. A detector that errors or panics
/// is reported by [`check`] as a non-fatal `InvariantDetectorError`.
pub trait Invariant: Send + Sync {
    fn name(&self) -> &str;

    /// `Ok(None)` when the invariant holds.
    fn detect(&self, branch: &Branch) -> anyhow::Result<Option<Violation>>;
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "detector panicked".to_string())
}

/// Run one invariant. Never fails and never panics.
pub fn check(invariant: &dyn Invariant, branch: &Branch) -> Option<Violation> {
    let outcome = catch_unwind(AssertUnwindSafe(|| invariant.detect(branch)));
    let failure = match outcome {
        Ok(Ok(violation)) => return violation,
        Ok(Err(e)) => e.to_string(),
        Err(payload) => panic_message(payload.as_ref()),
    };

    tracing::warn!(invariant = invariant.name(), branch = %branch.id, error = %failure, "Invariant detector failed");
    Some(
        Violation::new(
            DETECTOR_ERROR_CODE,
            format!("Invariant '{}' could not be evaluated: {failure}", invariant.name()),
            Severity::NonFatal,
        )
        .with_context("invariant", invariant.name())
        .with_context("branch", branch.id.to_string()),
    )
}

/// An ordered collection of invariants.
#[derive(Default)]
pub struct InvariantSet {
    invariants: Vec<Box<dyn Invariant>>,
}

impl InvariantSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in guardrails, parameterized by configuration.
    pub fn standard(lineage: &LineageConfig, router: &RouterConfig) -> Self {
        Self::new()
            .with(MaxDepth(lineage.max_depth))
            .with(FailureBudget(router.max_failures))
            .with(EntropyCeiling)
            .with(DataOnlyAssumptions)
    }

    pub fn with(mut self, invariant: impl Invariant + 'static) -> Self {
        self.invariants.push(Box::new(invariant));
        self
    }

    pub fn len(&self) -> usize {
        self.invariants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.invariants.is_empty()
    }

    pub fn check_all(&self, branch: &Branch) -> Vec<Violation> {
        self.invariants
            .iter()
            .filter_map(|inv| check(inv.as_ref(), branch))
            .collect()
    }
}

pub fn has_fatal(violations: &[Violation]) -> bool {
    violations.iter().any(Violation::is_fatal)
}

/// Lineage deeper than the configured limit.
pub struct MaxDepth(pub u32);

impl Invariant for MaxDepth {
    fn name(&self) -> &str {
        "max_depth"
    }

    fn detect(&self, branch: &Branch) -> anyhow::Result<Option<Violation>> {
        Ok((branch.depth > self.0).then(|| {
            Violation::new(
                "DEPTH_EXCEEDED",
                format!("Branch depth {} exceeds limit {}", branch.depth, self.0),
                Severity::Fatal,
            )
            .with_context("depth", branch.depth)
            .with_context("limit", self.0)
        }))
    }
}

/// Branch has used its failure budget. Recoverable by diverging.
pub struct FailureBudget(pub u32);

impl Invariant for FailureBudget {
    fn name(&self) -> &str {
        "failure_budget"
    }

    fn detect(&self, branch: &Branch) -> anyhow::Result<Option<Violation>> {
        Ok((branch.stats.failures >= self.0).then(|| {
            Violation::new(
                "FAILURE_BUDGET_EXHAUSTED",
                format!("{} failures on branch (budget {})", branch.stats.failures, self.0),
                Severity::Recoverable,
            )
            .with_context("failures", branch.stats.failures)
        }))
    }
}

/// Entropy is pinned at the top of its range.
pub struct EntropyCeiling;

impl Invariant for EntropyCeiling {
    fn name(&self) -> &str {
        "entropy_ceiling"
    }

    fn detect(&self, branch: &Branch) -> anyhow::Result<Option<Violation>> {
        if !branch.entropy.is_finite() {
            anyhow::bail!("entropy is not a finite number");
        }
        Ok((branch.entropy >= 2.0).then(|| {
            Violation::new(
                "ENTROPY_SATURATED",
                "Branch entropy reached its ceiling",
                Severity::Warning,
            )
            .with_context("entropy", branch.entropy)
        }))
    }
}

/// Keys that would turn assumptions into control flow.
const ROUTING_KEYS: [&str; 4] = ["action", "next_step", "skip", "goto"];

/// Assumptions are priors for step collaborators and must not carry routing.
pub struct DataOnlyAssumptions;

impl Invariant for DataOnlyAssumptions {
    fn name(&self) -> &str {
        "data_only_assumptions"
    }

    fn detect(&self, branch: &Branch) -> anyhow::Result<Option<Violation>> {
        let offending: Vec<&str> = ROUTING_KEYS
            .iter()
            .copied()
            .filter(|k| branch.assumptions.contains_key(*k))
            .collect();
        if offending.is_empty() {
            return Ok(None);
        }
        Ok(Some(
            Violation::new(
                "ASSUMPTION_ROUTES_EXECUTION",
                format!("Assumptions contain routing keys: {}", offending.join(", ")),
                Severity::NonFatal,
            )
            .with_context("keys", offending),
        ))
    }
}
