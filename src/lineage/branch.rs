use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BranchId(Uuid);

impl BranchId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BranchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BranchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ranking score for a branch. A heuristic, not a probability.
///
/// `0.3*failures + 0.1*retries + 0.05*ln(1+depth) + 0.5*(1-confidence)`,
/// clamped to `[0, 2]`.
pub fn entropy(failures: u32, retries: u32, depth: u32, confidence: f64) -> f64 {
    let confidence = if confidence.is_nan() {
        0.0
    } else {
        confidence.clamp(0.0, 1.0)
    };
    let raw = 0.3 * f64::from(failures)
        + 0.1 * f64::from(retries)
        + 0.05 * f64::from(depth).ln_1p()
        + 0.5 * (1.0 - confidence);
    raw.clamp(0.0, 2.0)
}

/// Execution bookkeeping for a branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStats {
    pub failures: u32,
    pub retries: u32,
    pub confidence: f64,
    pub completed_steps: Vec<String>,
}

impl Default for ExecutionStats {
    fn default() -> Self {
        Self {
            failures: 0,
            retries: 0,
            confidence: 1.0,
            completed_steps: Vec::new(),
        }
    }
}

/// Overrides applied when forking a branch.
#[derive(Debug, Clone, Default)]
pub struct BranchMutations {
    pub assumptions: Map<String, Value>,
    pub strategy: Map<String, Value>,
    pub role: Option<String>,
}

impl BranchMutations {
    pub fn strategy(name: &str) -> Self {
        let mut strategy = Map::new();
        strategy.insert("name".to_string(), Value::String(name.to_string()));
        Self {
            strategy,
            ..Self::default()
        }
    }
}

/// One candidate execution path.
///
/// `assumptions` are data-only priors handed to step collaborators; nothing
/// in the core routes on them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Branch {
    pub id: BranchId,
    pub parent: Option<BranchId>,
    pub depth: u32,
    pub assumptions: Map<String, Value>,
    pub strategy: Map<String, Value>,
    pub role: Option<String>,
    pub entropy: f64,
    pub current_step: Option<String>,
    pub children: Vec<BranchId>,
    pub stats: ExecutionStats,
}

impl Branch {
    pub fn root() -> Self {
        Self {
            id: BranchId::new(),
            parent: None,
            depth: 0,
            assumptions: Map::new(),
            strategy: Map::new(),
            role: None,
            entropy: 0.0,
            current_step: None,
            children: Vec::new(),
            stats: ExecutionStats::default(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn strategy_name(&self) -> Option<&str> {
        self.strategy.get("name").and_then(Value::as_str)
    }

    /// A child carrying this branch's priors and execution history, one level
    /// deeper and with no children of its own. The caller registers it.
    pub(crate) fn spawn_child(&self, mutations: BranchMutations) -> Self {
        let mut assumptions = self.assumptions.clone();
        assumptions.extend(mutations.assumptions);
        let mut strategy = self.strategy.clone();
        strategy.extend(mutations.strategy);

        let mut child = Self {
            id: BranchId::new(),
            parent: Some(self.id),
            depth: self.depth + 1,
            assumptions,
            strategy,
            role: mutations.role.or_else(|| self.role.clone()),
            entropy: self.entropy,
            current_step: self.current_step.clone(),
            children: Vec::new(),
            stats: self.stats.clone(),
        };
        child.recompute_entropy();
        child
    }

    /// Same branch, positioned at `step`. Lineage is untouched.
    pub fn with_step(&self, step: impl Into<String>) -> Self {
        Self {
            current_step: Some(step.into()),
            ..self.clone()
        }
    }

    pub fn record_failure(&mut self) {
        self.stats.failures += 1;
        self.refresh_confidence();
        self.recompute_entropy();
    }

    pub fn record_retries(&mut self, retries: u32) {
        self.stats.retries += retries;
        self.recompute_entropy();
    }

    pub fn record_success(&mut self, step: &str) {
        if !self.has_completed(step) {
            self.stats.completed_steps.push(step.to_string());
        }
        self.refresh_confidence();
        self.recompute_entropy();
    }

    pub fn has_completed(&self, step: &str) -> bool {
        self.stats.completed_steps.iter().any(|s| s == step)
    }

    /// Forget execution history. Used when a branch is a fresh attempt.
    pub fn reset_execution(&mut self) {
        self.stats = ExecutionStats::default();
        self.entropy = 0.0;
    }

    pub fn recompute_entropy(&mut self) {
        self.entropy = entropy(
            self.stats.failures,
            self.stats.retries,
            self.depth,
            self.stats.confidence,
        );
    }

    // Confidence is the running share of successful step executions.
    fn refresh_confidence(&mut self) {
        let successes = self.stats.completed_steps.len() as f64;
        let attempts = successes + f64::from(self.stats.failures);
        self.stats.confidence = if attempts == 0.0 {
            1.0
        } else {
            successes / attempts
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_fresh_root_has_zero_entropy() {
        assert_eq!(entropy(0, 0, 0, 1.0), 0.0);
        assert_eq!(Branch::root().entropy, 0.0);
    }

    #[test]
    fn test_entropy_weights() {
        let e = entropy(1, 2, 0, 0.5);
        assert!((e - (0.3 + 0.2 + 0.25)).abs() < 1e-9);
        assert_eq!(entropy(100, 100, 100, 0.0), 2.0);
    }

    #[test]
    fn test_spawn_child_copies_priors_and_applies_overrides() {
        let mut parent = Branch::root();
        parent.assumptions.insert("framework".into(), Value::from("fastapi"));
        parent.role = Some("backend".into());

        let mut mutations = BranchMutations::strategy("aggressive");
        mutations.assumptions.insert("orm".into(), Value::from("sqlalchemy"));
        let child = parent.spawn_child(mutations);

        assert_eq!(child.parent, Some(parent.id));
        assert_eq!(child.depth, 1);
        assert_eq!(child.assumptions["framework"], "fastapi");
        assert_eq!(child.assumptions["orm"], "sqlalchemy");
        assert_eq!(child.strategy_name(), Some("aggressive"));
        assert_eq!(child.role.as_deref(), Some("backend"));
        assert!(child.children.is_empty());
    }

    #[test]
    fn test_with_step_keeps_lineage() {
        let branch = Branch::root();
        let moved = branch.with_step("generate_routers");
        assert_eq!(moved.id, branch.id);
        assert_eq!(moved.parent, branch.parent);
        assert_eq!(moved.current_step.as_deref(), Some("generate_routers"));
    }

    #[test]
    fn test_failures_raise_entropy_and_success_lowers_it() {
        let mut branch = Branch::root();
        branch.record_success("a");
        let clean = branch.entropy;
        branch.record_failure();
        let failed = branch.entropy;
        assert!(failed > clean);
        assert_eq!(branch.stats.confidence, 0.5);
    }

    proptest! {
        #[test]
        fn prop_entropy_is_clamped(f in 0u32..1000, r in 0u32..1000, d in 0u32..1000, c in -2.0f64..3.0) {
            let e = entropy(f, r, d, c);
            prop_assert!((0.0..=2.0).contains(&e));
        }

        #[test]
        fn prop_entropy_is_monotone(
            f in 0u32..20, r in 0u32..20, d in 0u32..50, c in 0.0f64..=1.0,
            df in 0u32..5, dr in 0u32..5, dd in 0u32..5, dc in 0.0f64..=1.0,
        ) {
            let base = entropy(f, r, d, c);
            prop_assert!(entropy(f + df, r, d, c) >= base);
            prop_assert!(entropy(f, r + dr, d, c) >= base);
            prop_assert!(entropy(f, r, d + dd, c) >= base);
            prop_assert!(entropy(f, r, d, (c - dc).max(0.0)) >= base);
        }
    }
}
