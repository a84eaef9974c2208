use proptest::prelude::*;
use serde_json::json;

use rhizome::lineage::{BranchMutations, ExecutionTree};
use rhizome::outcome::aggregator::{aggregate, Evidence};
use rhizome::outcome::{Outcome, StepExecutionResult, WorkflowStatus};

fn results_from_json(value: serde_json::Value) -> Vec<StepExecutionResult> {
    serde_json::from_value(value).unwrap()
}

#[test]
fn test_degraded_run_reports_isolated_step_and_evidence() {
    let results = results_from_json(json!([
        {"outcome": "SUCCESS", "step": "step1"},
        {"outcome": "SUCCESS", "step": "step2"},
        {"outcome": "ENVIRONMENT_FAILURE", "step": "step3", "isolated": true, "error": "port 8000 is already in use"}
    ]));
    let evidence: Evidence = serde_json::from_value(json!({
        "step3": {"type": "static", "checked": ["routes", "models"]}
    }))
    .unwrap();

    let aggregation = aggregate(&results, Some(&evidence));

    assert_eq!(aggregation.status, WorkflowStatus::SuccessWithDegradation);
    let report = aggregation.report.unwrap();
    assert_eq!(report.step_names(), vec!["step3"]);
    assert_eq!(report.isolated_steps[0].outcome, Outcome::EnvironmentFailure);
    assert_eq!(report.evidence["step3"]["type"], "static");

    let wire = serde_json::to_value(aggregate(&results, Some(&evidence))).unwrap();
    assert_eq!(wire["status"], "SUCCESS_WITH_DEGRADATION");
}

#[test]
fn test_isolated_hard_failure_fails_without_report() {
    let results = results_from_json(json!([
        {"outcome": "SUCCESS", "step": "step1"},
        {"outcome": "HARD_FAILURE", "step": "step2", "isolated": true, "error": "contradictory requirements"},
        {"outcome": "SUCCESS", "step": "step3"}
    ]));

    let aggregation = aggregate(&results, None);

    assert_eq!(aggregation.status, WorkflowStatus::Failed);
    assert!(aggregation.report.is_none());
    assert_eq!(aggregation.forced_by.unwrap().step, "step2");
}

proptest! {
    #[test]
    fn prop_converge_keeps_only_the_minimum_entropy_sibling(
        entropies in prop::collection::btree_set(0u32..2000, 2..8)
    ) {
        let entropies: Vec<f64> = entropies.into_iter().rev().map(|e| f64::from(e) / 1000.0).collect();
        let mut tree = ExecutionTree::default();
        let root = tree.root_id();
        for (i, entropy) in entropies.iter().enumerate() {
            let child = tree.fork(root, BranchMutations::strategy(&format!("s{i}"))).unwrap();
            tree.get_mut(child).unwrap().entropy = *entropy;
        }

        let winner = tree.converge().unwrap();

        let min = entropies.iter().cloned().fold(f64::INFINITY, f64::min);
        prop_assert_eq!(tree.leaves().len(), 1);
        prop_assert_eq!(tree.get(winner).unwrap().entropy, min);
        prop_assert!(tree.is_consistent());
        prop_assert_eq!(tree.root().children.clone(), vec![winner]);
    }
}
