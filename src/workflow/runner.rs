use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use serde_json::json;

use crate::context::RunContext;
use crate::error::{AppError, Result};
use crate::events::EventKind;
use crate::guard::{has_fatal, DecisionContext, ExecutionAction, ExecutionDecision, ExecutionRouter, InvariantSet};
use crate::healing::{HealOutcome, HealRequest, HealingPipeline};
use crate::lineage::{BranchId, ExecutionTree};
use crate::outcome::aggregator::{aggregate, Evidence};
use crate::outcome::classifier::{classify_error, ClassificationContext};
use crate::outcome::{Outcome, StepExecutionResult, WorkflowStatus};
use crate::resilience::{InstructionEscalator, RetryPolicy};
use crate::workflow::{HaltReason, StepContext, StepRunner, StepSpec, WorkflowPlan, WorkflowReport};

/// Where a single step is in its escalation loop.
enum Phase {
    /// Run the step (with environment retries) for the given cognitive attempt.
    Attempt(u32),
    /// Cognitive attempts are used up; repair the artifact behind the failure.
    Heal(StepExecutionResult),
    /// The artifact was repaired; run the step once more against it.
    Verify { artifact: String },
    Done(StepExecutionResult),
}

/// Drives one run of a [`WorkflowPlan`] through classification, retry,
/// escalation, healing and aggregation.
///
/// A runner owns the run's lineage tree, escalation counters and decision
/// history, so it is meant for a single run.
pub struct WorkflowRunner {
    ctx: RunContext,
    steps: Arc<dyn StepRunner>,
    healing: HealingPipeline,
    retry: RetryPolicy,
    escalator: InstructionEscalator,
    router: ExecutionRouter,
    invariants: InvariantSet,
    tree: ExecutionTree,
    active: BranchId,
    classification: ClassificationContext,
    max_cognitive_attempts: u32,
    strategies: Vec<String>,
    prune_threshold: f64,
}

impl WorkflowRunner {
    pub fn new(ctx: RunContext, steps: Arc<dyn StepRunner>, healing: HealingPipeline) -> Self {
        let config = Arc::clone(&ctx.config);
        let tree = ExecutionTree::default();
        let active = tree.root_id();
        Self {
            retry: RetryPolicy::from_config(&config.retry),
            escalator: InstructionEscalator::new(),
            router: ExecutionRouter::from_config(&config.router),
            invariants: InvariantSet::standard(&config.lineage, &config.router),
            tree,
            active,
            classification: ClassificationContext::default(),
            max_cognitive_attempts: config.escalation.max_cognitive_attempts.max(1),
            strategies: config.lineage.strategies.clone(),
            prune_threshold: config.lineage.prune_threshold,
            ctx,
            steps,
            healing,
        }
    }

    pub fn with_invariants(mut self, invariants: InvariantSet) -> Self {
        self.invariants = invariants;
        self
    }

    /// Module names and paths the pipeline generates, used to tell broken
    /// generated code apart from a broken environment.
    pub fn with_classification(mut self, classification: ClassificationContext) -> Self {
        self.classification = classification;
        self
    }

    /// Continue on the lineage of an earlier run instead of a fresh root.
    pub fn with_lineage(mut self, tree: ExecutionTree, active: BranchId) -> Result<Self> {
        if !tree.contains(active) {
            return Err(AppError::Lineage(format!("Unknown branch: {active}")));
        }
        self.tree = tree;
        self.active = active;
        Ok(self)
    }

    pub fn tree(&self) -> &ExecutionTree {
        &self.tree
    }

    pub fn active_branch(&self) -> BranchId {
        self.active
    }

    /// Run `plan` to completion, a halt, or cancellation.
    ///
    /// `prior` holds results from an earlier run of the same plan; steps that
    /// already succeeded there are skipped. `is_cancelled` is checked before
    /// each step.
    pub async fn run<F, Fut>(
        &mut self,
        plan: &WorkflowPlan,
        prior: &[StepExecutionResult],
        is_cancelled: F,
    ) -> WorkflowReport
    where
        F: Fn() -> Fut,
        Fut: Future<Output = bool>,
    {
        let prior: HashMap<&str, &StepExecutionResult> = prior
            .iter()
            .filter(|r| r.is_success())
            .map(|r| (r.step.as_str(), r))
            .collect();
        if let Some(branch) = self.tree.get_mut(self.active) {
            for step in prior.keys() {
                branch.record_success(step);
            }
        }

        tracing::info!(run_id = %self.ctx.run_id, steps = plan.steps.len(), prior = prior.len(), "Run started");
        self.ctx.emit(
            EventKind::RunStarted,
            json!({"steps": plan.steps.iter().map(|s| &s.name).collect::<Vec<_>>(), "prior": prior.len()}),
        );

        let mut results: Vec<StepExecutionResult> = Vec::new();
        let mut evidence = Evidence::new();
        let mut halted = None;
        let mut cancelled = false;

        for spec in &plan.steps {
            if is_cancelled().await {
                tracing::info!(step = %spec.name, "Run cancelled");
                cancelled = true;
                break;
            }

            let decision = match self.decide(&spec.name) {
                Some(decision) => decision,
                None => {
                    halted = Some(HaltReason::Stopped {
                        step: spec.name.clone(),
                        detail: "active branch is missing from the lineage tree".to_string(),
                    });
                    break;
                }
            };

            match decision.action() {
                ExecutionAction::Stop => {
                    tracing::warn!(step = %spec.name, reason = %decision.reason(), "Run stopped");
                    halted = Some(HaltReason::Stopped {
                        step: spec.name.clone(),
                        detail: decision.reason().to_string(),
                    });
                    break;
                }
                ExecutionAction::Skip => {
                    let reused = prior
                        .get(spec.name.as_str())
                        .map(|r| (*r).clone())
                        .unwrap_or_else(|| StepExecutionResult::success(&spec.name));
                    self.emit_finished(&reused, true);
                    results.push(reused);
                    continue;
                }
                ExecutionAction::Heal => {
                    if let Some(step) = self.heal_pending(plan, &mut results, &mut evidence).await {
                        tracing::error!(step = %step, "Hard failure while verifying a repair, halting run");
                        halted = Some(HaltReason::HardFailure { step });
                        break;
                    }
                    self.mutate(&spec.name);
                }
                ExecutionAction::Run | ExecutionAction::Mutate | ExecutionAction::Retry => {}
            }

            self.ctx.emit(EventKind::StepStarted, json!({"step": spec.name, "branch": self.active.to_string()}));
            let (result, halt) = self.execute_step(spec, &mut evidence).await;
            self.emit_finished(&result, false);
            results.push(result);

            if halt {
                tracing::error!(step = %spec.name, "Hard failure, halting run");
                halted = Some(HaltReason::HardFailure {
                    step: spec.name.clone(),
                });
                break;
            }
        }

        self.finish(results, evidence, halted, cancelled)
    }

    fn decide(&mut self, step: &str) -> Option<ExecutionDecision> {
        self.tree.reposition(self.active, step).ok()?;
        let branch = self.tree.get(self.active)?;
        let decision = self.router.decide(branch, &DecisionContext::for_step(step));
        self.ctx.emit(
            EventKind::Decision,
            json!({
                "step": step,
                "action": decision.action(),
                "reason": decision.reason(),
                "confidence": decision.confidence(),
            }),
        );
        Some(decision)
    }

    async fn execute_step(&mut self, spec: &StepSpec, evidence: &mut Evidence) -> (StepExecutionResult, bool) {
        let mut phase = Phase::Attempt(1);
        loop {
            phase = match phase {
                Phase::Attempt(attempt) => {
                    let result = self.invoke(spec, attempt, None).await;
                    if result.outcome != Outcome::CognitiveFailure {
                        Phase::Done(result)
                    } else {
                        let failures = self.note_cognitive_failure(&spec.name);
                        if attempt < self.max_cognitive_attempts {
                            self.router.record(
                                ExecutionDecision::new(
                                    ExecutionAction::Retry,
                                    format!("cognitive failure #{failures}, escalating instructions"),
                                    0.5,
                                )
                                .with_metadata("step", spec.name.clone())
                                .with_metadata("attempt", attempt + 1),
                            );
                            Phase::Attempt(attempt + 1)
                        } else {
                            Phase::Heal(result)
                        }
                    }
                }
                Phase::Heal(failed) => {
                    let mut request = HealRequest::new(&spec.name)
                        .with_instructions(self.escalator.adapt(&spec.name, &spec.instructions));
                    request.error = failed.error.clone();
                    match self.healing.attempt_heal(&self.ctx, &request).await {
                        HealOutcome::HealedInPlace { artifact, .. } | HealOutcome::Content { artifact, .. } => {
                            Phase::Verify { artifact: artifact.path }
                        }
                        HealOutcome::NoRepair { reason } => {
                            tracing::warn!(step = %spec.name, reason = %reason, "Step could not be healed");
                            Phase::Done(failed)
                        }
                    }
                }
                Phase::Verify { artifact } => {
                    let result = self.invoke(spec, self.max_cognitive_attempts + 1, Some(artifact)).await;
                    if result.outcome == Outcome::CognitiveFailure {
                        self.note_cognitive_failure(&spec.name);
                    }
                    Phase::Done(result)
                }
                Phase::Done(result) => return self.settle(spec, result, evidence).await,
            };
        }
    }

    /// One cognitive attempt: the step through the retry policy, with
    /// instructions escalated to the step's failure count.
    async fn invoke(&mut self, spec: &StepSpec, attempt: u32, healed_artifact: Option<String>) -> StepExecutionResult {
        let (assumptions, strategy) = self
            .tree
            .get(self.active)
            .map(|b| (b.assumptions.clone(), b.strategy.clone()))
            .unwrap_or_default();
        let base = StepContext {
            run_id: self.ctx.run_id.clone(),
            instructions: self.escalator.adapt(&spec.name, &spec.instructions),
            attempt,
            retry: 1,
            healed_artifact,
            assumptions,
            strategy,
        };
        let classification = ClassificationContext {
            step: Some(spec.name.clone()),
            ..self.classification.clone()
        };

        let steps = self.steps.as_ref();
        let retried = self
            .retry
            .retry(&spec.name, |retry| {
                execute_once(steps, spec, StepContext { retry, ..base.clone() }, &classification)
            })
            .await;

        let retries = retried.retries();
        if retries > 0 {
            if let Some(branch) = self.tree.get_mut(self.active) {
                branch.record_retries(retries);
            }
            self.router.record(
                ExecutionDecision::new(
                    ExecutionAction::Retry,
                    format!("environment failure retried {retries} time(s)"),
                    0.6,
                )
                .with_metadata("step", spec.name.clone())
                .with_metadata("final_outcome", retried.result.outcome.as_str()),
            );
            self.ctx.emit(
                EventKind::StepRetried,
                json!({"step": spec.name, "retries": retries, "outcome": retried.result.outcome}),
            );
        }
        retried.result
    }

    fn note_cognitive_failure(&mut self, step: &str) -> u32 {
        if let Some(branch) = self.tree.get_mut(self.active) {
            branch.record_failure();
        }
        self.escalator.record_failure(step)
    }

    /// Apply a final step result to the run state. Returns the result as it
    /// should be recorded and whether the run must halt.
    async fn settle(
        &mut self,
        spec: &StepSpec,
        result: StepExecutionResult,
        evidence: &mut Evidence,
    ) -> (StepExecutionResult, bool) {
        match result.outcome {
            Outcome::Success => {
                self.escalator.record_success(&spec.name);
                if let Some(branch) = self.tree.get_mut(self.active) {
                    branch.record_success(&spec.name);
                }
                self.classification
                    .generated_paths
                    .extend(result.artifacts.iter().cloned());
                (result, false)
            }
            Outcome::EnvironmentFailure => {
                if let Some(substitute) = self.steps.substitute_evidence(spec).await {
                    evidence.insert(spec.name.clone(), substitute);
                }
                tracing::warn!(step = %spec.name, "Isolating environment failure");
                (result.isolate(), false)
            }
            Outcome::HardFailure => {
                if let Some(branch) = self.tree.get_mut(self.active) {
                    branch.record_failure();
                }
                (result, true)
            }
            Outcome::CognitiveFailure => (result, false),
        }
    }

    /// Retry healing for every step that is still failing cognitively and
    /// re-verify the ones that were repaired. A verification result replaces
    /// the step's earlier result whatever its outcome; returns the step whose
    /// verification failed hard.
    async fn heal_pending(
        &mut self,
        plan: &WorkflowPlan,
        results: &mut [StepExecutionResult],
        evidence: &mut Evidence,
    ) -> Option<String> {
        let pending: Vec<HealRequest> = results
            .iter()
            .filter(|r| r.outcome == Outcome::CognitiveFailure && !r.isolated)
            .map(|r| {
                let mut request = HealRequest::new(&r.step);
                request.error = r.error.clone();
                request
            })
            .collect();
        if pending.is_empty() {
            return None;
        }

        let report = self.healing.heal_all(&self.ctx, pending).await;
        for (step, outcome) in report.outcomes {
            let artifact = match outcome {
                HealOutcome::HealedInPlace { artifact, .. } | HealOutcome::Content { artifact, .. } => artifact,
                HealOutcome::NoRepair { .. } => continue,
            };
            let Some(spec) = plan.get(&step) else {
                continue;
            };
            let verified = self
                .invoke(spec, self.max_cognitive_attempts + 1, Some(artifact.path))
                .await;
            if verified.outcome == Outcome::CognitiveFailure {
                self.note_cognitive_failure(&step);
            }
            let (settled, halt) = self.settle(spec, verified, evidence).await;
            self.emit_finished(&settled, false);
            if let Some(slot) = results.iter_mut().find(|r| r.step == step) {
                *slot = settled;
            }
            if halt {
                return Some(step);
            }
        }
        None
    }

    /// Diverge the active branch into the configured strategies and continue
    /// on the one that converges.
    fn mutate(&mut self, step: &str) {
        let from = self.active;
        let children = match self.tree.diverge(from, &self.strategies) {
            Ok(children) => children,
            Err(e) => {
                tracing::error!(branch = %from, error = %e, "Failed to diverge branch");
                return;
            }
        };
        let Some(winner) = self.tree.converge() else {
            return;
        };
        self.active = winner;
        if let Err(e) = self.tree.reposition(winner, step) {
            tracing::error!(branch = %winner, error = %e, "Failed to position branch");
        }
        let pruned = self.tree.prune_outside(self.prune_threshold, winner);

        let strategy = self
            .tree
            .get(winner)
            .and_then(|b| b.strategy_name())
            .unwrap_or("")
            .to_string();
        self.router.record(
            ExecutionDecision::new(
                ExecutionAction::Mutate,
                format!("diverged into {} strategies, continuing with '{strategy}'", children.len()),
                0.7,
            )
            .with_metadata("from", from.to_string())
            .with_metadata("to", winner.to_string())
            .with_metadata("step", step),
        );
        self.ctx.emit(
            EventKind::BranchDiverged,
            json!({
                "from": from.to_string(),
                "children": children.iter().map(ToString::to_string).collect::<Vec<_>>(),
                "active": winner.to_string(),
                "strategy": strategy,
                "pruned": pruned.iter().map(ToString::to_string).collect::<Vec<_>>(),
            }),
        );
    }

    fn emit_finished(&self, result: &StepExecutionResult, skipped: bool) {
        self.ctx.emit(
            EventKind::StepFinished,
            json!({
                "step": result.step,
                "outcome": result.outcome,
                "isolated": result.isolated,
                "skipped": skipped,
                "error": result.error,
            }),
        );
    }

    fn finish(
        &mut self,
        results: Vec<StepExecutionResult>,
        evidence: Evidence,
        halted: Option<HaltReason>,
        cancelled: bool,
    ) -> WorkflowReport {
        let aggregation = aggregate(&results, (!evidence.is_empty()).then_some(&evidence));

        let violations = self
            .tree
            .get(self.active)
            .map(|branch| self.invariants.check_all(branch))
            .unwrap_or_default();
        for violation in &violations {
            self.ctx.emit(EventKind::InvariantViolated, json!(violation));
        }

        let mut status = aggregation.status;
        if has_fatal(&violations) && status != WorkflowStatus::Failed {
            tracing::warn!(status = %status, "Fatal invariant violation vetoes run status");
            status = WorkflowStatus::Failed;
        }
        if matches!(halted, Some(HaltReason::Stopped { .. })) {
            status = WorkflowStatus::Failed;
        }
        if cancelled && status != WorkflowStatus::Failed {
            status = WorkflowStatus::Running;
        }

        tracing::info!(
            run_id = %self.ctx.run_id,
            status = %status,
            steps = results.len(),
            violations = violations.len(),
            cancelled,
            "Run finished"
        );
        self.ctx.emit(
            EventKind::RunFinished,
            json!({"status": status, "steps": results.len(), "cancelled": cancelled}),
        );

        WorkflowReport {
            run_id: self.ctx.run_id.clone(),
            status,
            aggregation,
            results,
            decisions: self.router.history().to_vec(),
            violations,
            heals: self.healing.history().to_vec(),
            active_branch: self.active,
            halted,
            cancelled,
        }
    }
}

async fn execute_once(
    steps: &dyn StepRunner,
    spec: &StepSpec,
    ctx: StepContext,
    classification: &ClassificationContext,
) -> StepExecutionResult {
    match steps.run_step(spec, &ctx).await {
        Ok(mut result) => {
            result.step = spec.name.clone();
            result
        }
        Err(e) => {
            let outcome = classify_error(&e, classification);
            tracing::debug!(step = %spec.name, outcome = %outcome, error = %e, "Step raised");
            StepExecutionResult::failure(&spec.name, outcome, format!("{e:#}"))
        }
    }
}
