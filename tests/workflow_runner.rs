use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use rhizome::config::AppConfig;
use rhizome::context::RunContext;
use rhizome::events::{EventKind, MemoryEventLog};
use rhizome::guard::{ExecutionAction, Invariant, InvariantSet, Severity, Violation};
use rhizome::healing::{
    DisabledRegenerator, HealPath, HealingPipeline, RegenerationOutcome, RegenerationRequest, Regenerator,
};
use rhizome::lineage::{Branch, BranchMutations, ExecutionTree};
use rhizome::outcome::{Outcome, StepExecutionResult, WorkflowStatus};
use rhizome::workflow::{HaltReason, StepContext, StepRunner, StepSpec, WorkflowPlan, WorkflowRunner};

const NAME_ERROR: &str = "NameError: name 'Task' is not defined";
const CONN_REFUSED: &str = "connect ECONNREFUSED 127.0.0.1:5432";
const CONTRACT: &str = "contract violation: endpoint must be both public and private";

enum Scripted {
    Raise(&'static str),
    Produce(&'static str),
}

/// Steps succeed unless a script says otherwise.
#[derive(Default)]
struct ScriptedSteps {
    scripts: Mutex<HashMap<String, VecDeque<Scripted>>>,
    calls: Mutex<Vec<(String, StepContext)>>,
    evidence: HashMap<String, Value>,
}

impl ScriptedSteps {
    fn new() -> Self {
        Self::default()
    }

    fn script(self, step: &str, script: Vec<Scripted>) -> Self {
        self.scripts.lock().unwrap().insert(step.to_string(), script.into());
        self
    }

    fn with_evidence(mut self, step: &str, value: Value) -> Self {
        self.evidence.insert(step.to_string(), value);
        self
    }

    fn calls_for(&self, step: &str) -> Vec<StepContext> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name == step)
            .map(|(_, ctx)| ctx.clone())
            .collect()
    }
}

#[async_trait]
impl StepRunner for ScriptedSteps {
    async fn run_step(&self, step: &StepSpec, ctx: &StepContext) -> anyhow::Result<StepExecutionResult> {
        self.calls.lock().unwrap().push((step.name.clone(), ctx.clone()));
        let next = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&step.name)
            .and_then(VecDeque::pop_front);
        match next {
            Some(Scripted::Raise(message)) => Err(anyhow::anyhow!(message)),
            Some(Scripted::Produce(artifact)) => Ok(StepExecutionResult::success(&step.name).with_artifact(artifact)),
            None => Ok(StepExecutionResult::success(&step.name)),
        }
    }

    async fn substitute_evidence(&self, step: &StepSpec) -> Option<Value> {
        self.evidence.get(&step.name).cloned()
    }
}

/// Rewrites the routed artifact in place.
struct WritingRegenerator;

#[async_trait]
impl Regenerator for WritingRegenerator {
    async fn regenerate(&self, request: &RegenerationRequest) -> RegenerationOutcome {
        let path = request.root.join(&request.artifact.path);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "# regenerated\n").unwrap();
        RegenerationOutcome::Healed {
            files_written: vec![request.artifact.path.clone()],
        }
    }
}

/// Gives up on the first repair, rewrites the artifact on every later one.
#[derive(Default)]
struct SecondTimeRegenerator {
    calls: AtomicUsize,
}

#[async_trait]
impl Regenerator for SecondTimeRegenerator {
    async fn regenerate(&self, request: &RegenerationRequest) -> RegenerationOutcome {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            return RegenerationOutcome::Failed {
                reason: "model gave up".to_string(),
            };
        }
        WritingRegenerator.regenerate(request).await
    }
}

struct AlwaysFatal;

impl Invariant for AlwaysFatal {
    fn name(&self) -> &str {
        "always_fatal"
    }

    fn detect(&self, _branch: &Branch) -> anyhow::Result<Option<Violation>> {
        Ok(Some(Violation::new("ALWAYS_FATAL", "test guardrail", Severity::Fatal)))
    }
}

struct Harness {
    runner: WorkflowRunner,
    steps: Arc<ScriptedSteps>,
    log: Arc<MemoryEventLog>,
    workspace: tempfile::TempDir,
}

fn config() -> AppConfig {
    let mut config = AppConfig::default();
    config.retry.base_delay_ms = 0;
    config
}

fn harness(config: AppConfig, steps: ScriptedSteps, regenerator: Arc<dyn Regenerator>) -> Harness {
    let workspace = tempfile::tempdir().unwrap();
    let log = MemoryEventLog::new();
    let ctx = RunContext::new("run-test", Arc::new(config), log.clone());
    let steps = Arc::new(steps);
    let healing = HealingPipeline::local(workspace.path(), regenerator);
    let runner = WorkflowRunner::new(ctx, steps.clone(), healing);
    Harness {
        runner,
        steps,
        log,
        workspace,
    }
}

fn plan(steps: &[&str]) -> WorkflowPlan {
    steps
        .iter()
        .fold(WorkflowPlan::new(), |plan, step| plan.step(*step, format!("Do {step}.")))
}

fn actions(report: &rhizome::workflow::WorkflowReport) -> Vec<ExecutionAction> {
    report.decisions.iter().map(|d| d.action()).collect()
}

#[tokio::test]
async fn test_clean_run_succeeds() {
    let mut h = harness(config(), ScriptedSteps::new(), Arc::new(DisabledRegenerator));
    let report = h
        .runner
        .run(&plan(&["generate_models", "generate_routes", "generate_client"]), &[], || async { false })
        .await;

    assert_eq!(report.status, WorkflowStatus::Success);
    assert!(report.aggregation.report.is_none());
    assert_eq!(report.results.len(), 3);
    assert_eq!(actions(&report), vec![ExecutionAction::Run; 3]);
    assert!(report.halted.is_none());

    let kinds = h.log.kinds("run-test");
    assert_eq!(kinds.first(), Some(&EventKind::RunStarted));
    assert_eq!(kinds.last(), Some(&EventKind::RunFinished));
    assert_eq!(kinds.iter().filter(|k| **k == EventKind::StepFinished).count(), 3);
}

#[tokio::test]
async fn test_environment_failure_is_retried_then_isolated() {
    let steps = ScriptedSteps::new()
        .script(
            "run_live_tests",
            vec![Scripted::Raise(CONN_REFUSED), Scripted::Raise(CONN_REFUSED), Scripted::Raise(CONN_REFUSED)],
        )
        .with_evidence("run_live_tests", json!({"type": "static", "passed": true}));
    let mut h = harness(config(), steps, Arc::new(DisabledRegenerator));

    let report = h
        .runner
        .run(&plan(&["generate_models", "run_live_tests", "generate_client"]), &[], || async { false })
        .await;

    let calls = h.steps.calls_for("run_live_tests");
    assert_eq!(calls.iter().map(|c| c.retry).collect::<Vec<_>>(), vec![1, 2, 3]);

    let isolated = report.result("run_live_tests").unwrap();
    assert_eq!(isolated.outcome, Outcome::EnvironmentFailure);
    assert!(isolated.isolated);

    assert_eq!(report.status, WorkflowStatus::SuccessWithDegradation);
    let degradation = report.aggregation.report.as_ref().unwrap();
    assert_eq!(degradation.step_names(), vec!["run_live_tests"]);
    assert_eq!(degradation.evidence["run_live_tests"]["type"], "static");
    assert!(actions(&report).contains(&ExecutionAction::Retry));
    assert!(h.log.kinds("run-test").contains(&EventKind::StepRetried));
}

#[tokio::test]
async fn test_hard_failure_halts_the_run() {
    let steps = ScriptedSteps::new().script("validate_requirements", vec![Scripted::Raise(CONTRACT)]);
    let mut h = harness(config(), steps, Arc::new(DisabledRegenerator));

    let report = h
        .runner
        .run(
            &plan(&["generate_models", "validate_requirements", "generate_client"]),
            &[],
            || async { false },
        )
        .await;

    assert_eq!(report.status, WorkflowStatus::Failed);
    assert_eq!(
        report.halted,
        Some(HaltReason::HardFailure {
            step: "validate_requirements".to_string()
        })
    );
    assert_eq!(h.steps.calls_for("validate_requirements").len(), 1);
    assert!(h.steps.calls_for("generate_client").is_empty());
    assert_eq!(
        report.aggregation.forced_by.as_ref().map(|r| r.step.as_str()),
        Some("validate_requirements")
    );
}

#[tokio::test]
async fn test_cognitive_failure_is_retried_with_escalated_instructions() {
    let steps = ScriptedSteps::new().script("generate_routes", vec![Scripted::Raise(NAME_ERROR)]);
    let mut h = harness(config(), steps, Arc::new(DisabledRegenerator));

    let report = h.runner.run(&plan(&["generate_routes"]), &[], || async { false }).await;

    assert_eq!(report.status, WorkflowStatus::Success);
    let calls = h.steps.calls_for("generate_routes");
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].attempt, 1);
    assert_eq!(calls[0].instructions, "Do generate_routes.");
    assert_eq!(calls[1].attempt, 2);
    assert!(calls[1].instructions.starts_with("Do generate_routes."));
    assert!(calls[1].instructions.contains("Completeness requirements"));
    assert_eq!(actions(&report), vec![ExecutionAction::Run, ExecutionAction::Retry]);
    assert!(report.heals.is_empty());
}

#[tokio::test]
async fn test_exhausted_cognitive_failure_is_healed_and_verified() {
    let steps = ScriptedSteps::new().script(
        "generate_routes",
        vec![Scripted::Raise(NAME_ERROR), Scripted::Raise(NAME_ERROR)],
    );
    let mut h = harness(config(), steps, Arc::new(WritingRegenerator));

    let report = h.runner.run(&plan(&["generate_routes"]), &[], || async { false }).await;

    assert_eq!(report.status, WorkflowStatus::Success);
    assert_eq!(report.heals.len(), 1);
    assert_eq!(report.heals[0].path, HealPath::Intelligent);

    let calls = h.steps.calls_for("generate_routes");
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[2].healed_artifact.as_deref(), Some("app/routers.py"));
    assert_eq!(
        std::fs::read_to_string(h.workspace.path().join("app/routers.py")).unwrap(),
        "# regenerated\n"
    );
}

#[tokio::test]
async fn test_high_entropy_heals_pending_failures_then_mutates() {
    let steps = ScriptedSteps::new().script(
        "package_release",
        vec![Scripted::Raise(NAME_ERROR), Scripted::Raise(NAME_ERROR)],
    );
    let mut h = harness(config(), steps, Arc::new(DisabledRegenerator));
    let root = h.runner.active_branch();

    let report = h
        .runner
        .run(&plan(&["package_release", "publish_notes"]), &[], || async { false })
        .await;

    // The unroutable step stays failed, the next one runs on a fresh branch.
    assert_eq!(report.status, WorkflowStatus::Failed);
    assert_eq!(report.result("package_release").unwrap().outcome, Outcome::CognitiveFailure);
    assert!(report.result("publish_notes").unwrap().is_success());

    let actions = actions(&report);
    assert!(actions.contains(&ExecutionAction::Heal));
    assert!(actions.contains(&ExecutionAction::Mutate));
    assert_eq!(report.heals.len(), 2);
    assert!(report.heals.iter().all(|h| h.path == HealPath::None));

    assert_ne!(report.active_branch, root);
    let active = h.runner.tree().get(report.active_branch).unwrap();
    assert_eq!(active.depth, 1);
    assert_eq!(active.strategy_name(), Some("conservative"));
    assert_eq!(h.runner.tree().len(), 2);
    assert!(h.log.kinds("run-test").contains(&EventKind::BranchDiverged));
}

#[tokio::test]
async fn test_hard_failure_while_verifying_a_repair_halts_the_run() {
    let steps = ScriptedSteps::new().script(
        "generate_models",
        vec![Scripted::Raise(NAME_ERROR), Scripted::Raise(NAME_ERROR), Scripted::Raise(CONTRACT)],
    );
    let mut h = harness(config(), steps, Arc::new(SecondTimeRegenerator::default()));

    let report = h
        .runner
        .run(
            &plan(&["generate_models", "publish_notes", "package_release"]),
            &[],
            || async { false },
        )
        .await;

    assert_eq!(h.steps.calls_for("generate_models").len(), 3);
    assert!(h.steps.calls_for("publish_notes").is_empty());
    assert!(h.steps.calls_for("package_release").is_empty());

    assert_eq!(report.status, WorkflowStatus::Failed);
    assert_eq!(
        report.halted,
        Some(HaltReason::HardFailure {
            step: "generate_models".to_string()
        })
    );
    assert_eq!(report.results.len(), 1);
    assert_eq!(report.results[0].outcome, Outcome::HardFailure);
    let forced_by = report.aggregation.forced_by.as_ref().unwrap();
    assert_eq!(forced_by.step, "generate_models");
    assert_eq!(forced_by.outcome, Outcome::HardFailure);
    assert!(!actions(&report).contains(&ExecutionAction::Mutate));
}

#[tokio::test]
async fn test_environment_failure_while_verifying_a_repair_is_isolated() {
    let steps = ScriptedSteps::new()
        .script(
            "generate_models",
            vec![
                Scripted::Raise(NAME_ERROR),
                Scripted::Raise(NAME_ERROR),
                Scripted::Raise(CONN_REFUSED),
                Scripted::Raise(CONN_REFUSED),
                Scripted::Raise(CONN_REFUSED),
            ],
        )
        .with_evidence("generate_models", json!({"type": "static"}));
    let mut h = harness(config(), steps, Arc::new(SecondTimeRegenerator::default()));

    let report = h
        .runner
        .run(&plan(&["generate_models", "publish_notes"]), &[], || async { false })
        .await;

    let verified = report.result("generate_models").unwrap();
    assert_eq!(verified.outcome, Outcome::EnvironmentFailure);
    assert!(verified.isolated);
    assert!(report.result("publish_notes").unwrap().is_success());
    assert_eq!(report.status, WorkflowStatus::SuccessWithDegradation);
    let degradation = report.aggregation.report.as_ref().unwrap();
    assert_eq!(degradation.evidence["generate_models"]["type"], "static");
}

#[tokio::test]
async fn test_mutation_prunes_stale_branches_outside_the_active_lineage() {
    let mut tree = ExecutionTree::default();
    let root = tree.root_id();
    let active = tree.fork(root, BranchMutations::strategy("first")).unwrap();
    let stale = tree.fork(root, BranchMutations::strategy("abandoned")).unwrap();
    tree.get_mut(stale).unwrap().entropy = 1.9;

    let steps = ScriptedSteps::new().script(
        "package_release",
        vec![Scripted::Raise(NAME_ERROR), Scripted::Raise(NAME_ERROR)],
    );
    let h = harness(config(), steps, Arc::new(DisabledRegenerator));
    let mut runner = h.runner.with_lineage(tree, active).unwrap();

    let report = runner
        .run(&plan(&["package_release", "publish_notes"]), &[], || async { false })
        .await;

    assert!(actions(&report).contains(&ExecutionAction::Mutate));
    let tree = runner.tree();
    assert!(!tree.contains(stale));
    assert!(tree.contains(active));
    assert_eq!(tree.lineage(report.active_branch), vec![report.active_branch, active, root]);
    assert!(tree.is_consistent());
}

#[tokio::test]
async fn test_lineage_with_unknown_active_branch_is_rejected() {
    let h = harness(config(), ScriptedSteps::new(), Arc::new(DisabledRegenerator));
    let other = ExecutionTree::default().root_id();
    assert!(h.runner.with_lineage(ExecutionTree::default(), other).is_err());
}

#[tokio::test]
async fn test_failure_budget_stops_the_run() {
    let mut config = config();
    config.router.max_failures = 1;
    config.escalation.max_cognitive_attempts = 1;
    let steps = ScriptedSteps::new().script("package_release", vec![Scripted::Raise(NAME_ERROR)]);
    let mut h = harness(config, steps, Arc::new(DisabledRegenerator));

    let report = h
        .runner
        .run(&plan(&["package_release", "publish_notes"]), &[], || async { false })
        .await;

    assert_eq!(report.status, WorkflowStatus::Failed);
    assert!(matches!(
        report.halted,
        Some(HaltReason::Stopped { ref step, .. }) if step == "publish_notes"
    ));
    assert!(h.steps.calls_for("publish_notes").is_empty());
    assert_eq!(actions(&report).last(), Some(&ExecutionAction::Stop));
}

#[tokio::test]
async fn test_cancellation_is_checked_between_steps() {
    let checks = AtomicUsize::new(0);
    let mut h = harness(config(), ScriptedSteps::new(), Arc::new(DisabledRegenerator));

    let report = h
        .runner
        .run(&plan(&["generate_models", "generate_routes", "generate_client"]), &[], || {
            let n = checks.fetch_add(1, Ordering::SeqCst);
            async move { n >= 1 }
        })
        .await;

    assert!(report.cancelled);
    assert_eq!(report.results.len(), 1);
    assert_eq!(report.status, WorkflowStatus::Running);
    assert!(h.steps.calls_for("generate_routes").is_empty());
}

#[tokio::test]
async fn test_prior_success_is_skipped() {
    let mut h = harness(config(), ScriptedSteps::new(), Arc::new(DisabledRegenerator));
    let prior = vec![StepExecutionResult::success("generate_models").with_artifact("app/models.py")];

    let report = h
        .runner
        .run(&plan(&["generate_models", "generate_routes"]), &prior, || async { false })
        .await;

    assert_eq!(report.status, WorkflowStatus::Success);
    assert!(h.steps.calls_for("generate_models").is_empty());
    assert_eq!(report.results[0], prior[0]);
    assert_eq!(actions(&report), vec![ExecutionAction::Skip, ExecutionAction::Run]);
}

#[tokio::test]
async fn test_fatal_invariant_vetoes_success() {
    let h = harness(config(), ScriptedSteps::new(), Arc::new(DisabledRegenerator));
    let mut runner = h.runner.with_invariants(InvariantSet::new().with(AlwaysFatal));

    let report = runner.run(&plan(&["generate_models"]), &[], || async { false }).await;

    assert_eq!(report.aggregation.status, WorkflowStatus::Success);
    assert_eq!(report.status, WorkflowStatus::Failed);
    assert_eq!(report.violations[0].code, "ALWAYS_FATAL");
    assert!(h.log.kinds("run-test").contains(&EventKind::InvariantViolated));
}

#[tokio::test]
async fn test_errors_naming_generated_files_are_cognitive() {
    let steps = ScriptedSteps::new()
        .script("generate_models", vec![Scripted::Produce("app/models.py")])
        .script(
            "generate_client",
            vec![
                Scripted::Raise("spawn app/models.py ENOENT"),
                Scripted::Raise("spawn app/models.py ENOENT"),
            ],
        );
    let mut h = harness(config(), steps, Arc::new(DisabledRegenerator));

    let report = h
        .runner
        .run(&plan(&["generate_models", "generate_client"]), &[], || async { false })
        .await;

    assert_eq!(report.result("generate_client").unwrap().outcome, Outcome::CognitiveFailure);
    assert_eq!(h.steps.calls_for("generate_client").len(), 2);
    assert_eq!(report.status, WorkflowStatus::Failed);
}
