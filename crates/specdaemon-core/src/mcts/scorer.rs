//! C10 Scorer (spec.md §4.10): a deterministic, pure function of a spec
//! directory's on-disk artifacts. No subprocess, no LLM call.
//!
//! Grounded on `original_source/.../mcts/scorer.py` (`score_branch`,
//! `_apply_validator_results`, `_infer_build_from_plan`,
//! `_parse_qa_approval`) — weights, priority order, and QA-approval
//! regex-ish heuristic carried over verbatim; `implementation_plan.json`
//! here is this crate's [`crate::model::PlanRecord`], so subtask
//! completion reads its `phases[].subtasks[]` directly instead of a
//! second schema.

use std::path::Path;

use serde::Serialize;
use serde_json::Value;

use crate::model::PlanStatus;
use crate::planfile;

const W_BUILD: f64 = 0.30;
const W_TEST: f64 = 0.30;
const W_LINT: f64 = 0.10;
const W_QA: f64 = 0.30;

/// Quantitative score for a solution branch (spec.md §4.10 "Score").
#[derive(Debug, Clone, Default, Serialize)]
pub struct BranchScore {
    pub build_passed: bool,
    pub test_pass_rate: f64,
    pub lint_clean: bool,
    pub qa_approved: bool,
    pub subtask_completion: f64,
    pub total: f64,
    pub breakdown: serde_json::Map<String, Value>,
}

fn subtask_completion(phases: &[crate::model::Phase]) -> f64 {
    let mut total = 0u32;
    let mut completed = 0u32;
    for phase in phases {
        for subtask in &phase.subtasks {
            total += 1;
            if subtask.status == "completed" || subtask.status == "done" {
                completed += 1;
            }
        }
    }
    if total == 0 {
        0.0
    } else {
        completed as f64 / total as f64
    }
}

fn validators_array(results: &Value) -> Vec<Value> {
    match results {
        Value::Array(arr) => arr.clone(),
        Value::Object(map) => map
            .get("validators")
            .or_else(|| map.get("results"))
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

fn apply_validator_results(score: &mut BranchScore, results: &Value, breakdown: &mut serde_json::Map<String, Value>) {
    for v in validators_array(results) {
        let Some(vid) = v.get("validator_id").and_then(Value::as_str) else { continue };
        let passed = v.get("passed").and_then(Value::as_bool).unwrap_or(false);

        if vid == "build" {
            let sub = v.get("sub_results").cloned().unwrap_or(Value::Null);
            score.build_passed = sub
                .get("build")
                .and_then(|b| b.get("passed"))
                .and_then(Value::as_bool)
                .unwrap_or(passed);
            score.lint_clean = sub
                .get("lint")
                .and_then(|l| l.get("passed"))
                .and_then(Value::as_bool)
                .unwrap_or(false);

            let test_result = sub.get("test").cloned().unwrap_or(Value::Null);
            if test_result.get("passed").and_then(Value::as_bool) == Some(true) {
                score.test_pass_rate = 1.0;
            } else if let Some(rate) = test_result.get("pass_rate").and_then(Value::as_f64) {
                score.test_pass_rate = rate;
            }

            breakdown.insert(
                "build_validator".to_string(),
                serde_json::json!({
                    "build": score.build_passed,
                    "lint": score.lint_clean,
                    "test_pass_rate": score.test_pass_rate,
                }),
            );
        } else if vid == "browser" || vid == "api" || vid == "database" {
            breakdown.insert(format!("{vid}_validator"), serde_json::json!({"passed": passed}));
        }
    }
}

fn infer_build_from_plan(score: &mut BranchScore, plan: &crate::model::PlanRecord, breakdown: &mut serde_json::Map<String, Value>) {
    if plan.status.is_completed() {
        score.build_passed = true;
        score.lint_clean = true;
        breakdown.insert(
            "build_inferred_from".to_string(),
            Value::String(format!("status={}", plan.status)),
        );
    }
}

fn parse_qa_approval(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    if (lower.contains("qa_approved") || lower.contains("approved"))
        && !lower.contains("not approved")
        && !lower.contains("disapproved")
    {
        return true;
    }
    if lower.contains("all acceptance criteria met") || lower.contains("qa passed") {
        return true;
    }
    false
}

fn compute_total(score: &BranchScore) -> f64 {
    let total = W_BUILD * (score.build_passed as u8 as f64)
        + W_TEST * score.test_pass_rate
        + W_LINT * (score.lint_clean as u8 as f64)
        + W_QA * (score.qa_approved as u8 as f64);
    total.min(1.0)
}

/// Score a child spec's results (spec.md §4.10). Never errors: missing
/// artifacts simply leave the corresponding term at its zero value.
pub fn score_branch(spec_dir: &Path) -> BranchScore {
    let mut score = BranchScore::default();
    let mut breakdown = serde_json::Map::new();

    let plan = planfile::read_plan(spec_dir).ok();
    if let Some(plan) = &plan {
        score.subtask_completion = subtask_completion(&plan.phases);
        breakdown.insert("subtask_completion".to_string(), serde_json::json!(score.subtask_completion));
    }

    let validator_path = spec_dir.join("validator_results.json");
    if let Ok(results) = crate::state::persist::read_json::<Value>(&validator_path) {
        apply_validator_results(&mut score, &results, &mut breakdown);
    } else if let Some(plan) = &plan {
        infer_build_from_plan(&mut score, plan, &mut breakdown);
    }

    let qa_report_path = spec_dir.join("qa_report.md");
    if let Ok(text) = std::fs::read_to_string(&qa_report_path) {
        score.qa_approved = parse_qa_approval(&text);
        breakdown.insert("qa_source".to_string(), Value::String("qa_report.md".to_string()));
    } else if let Some(plan) = &plan {
        score.qa_approved = matches!(plan.status, PlanStatus::Complete | PlanStatus::HumanReview);
        breakdown.insert(
            "qa_source".to_string(),
            Value::String(format!("plan_status={}", plan.status)),
        );
    }

    score.total = compute_total(&score);
    breakdown.insert(
        "total_formula".to_string(),
        Value::String(format!("{W_BUILD}*build + {W_TEST}*test + {W_LINT}*lint + {W_QA}*qa")),
    );
    score.breakdown = breakdown;
    score
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Phase, PlanRecord, Priority, Subtask, TaskType};
    use tempfile::tempdir;

    fn write_plan(dir: &Path, status: PlanStatus, phases: Vec<Phase>) {
        let mut plan = PlanRecord::new(TaskType::Impl, Priority::Normal, None);
        plan.status = status;
        plan.phases = phases;
        crate::planfile::write_plan(dir, &plan).unwrap();
    }

    #[test]
    fn scores_zero_with_no_artifacts() {
        let dir = tempdir().unwrap();
        let score = score_branch(dir.path());
        assert_eq!(score.total, 0.0);
    }

    #[test]
    fn infers_build_and_lint_from_complete_plan_status() {
        let dir = tempdir().unwrap();
        write_plan(dir.path(), PlanStatus::Complete, Vec::new());
        let score = score_branch(dir.path());
        assert!(score.build_passed);
        assert!(score.lint_clean);
        assert!((score.total - (W_BUILD + W_LINT + W_QA)).abs() < 1e-9);
    }

    #[test]
    fn validator_results_take_priority_over_plan_inference() {
        let dir = tempdir().unwrap();
        write_plan(dir.path(), PlanStatus::Complete, Vec::new());
        std::fs::write(
            dir.path().join("validator_results.json"),
            serde_json::json!([
                {"validator_id": "build", "passed": false, "sub_results": {
                    "build": {"passed": true},
                    "lint": {"passed": false},
                    "test": {"pass_rate": 0.5},
                }}
            ])
            .to_string(),
        )
        .unwrap();
        let score = score_branch(dir.path());
        assert!(score.build_passed);
        assert!(!score.lint_clean);
        assert_eq!(score.test_pass_rate, 0.5);
    }

    #[test]
    fn subtask_completion_counts_completed_and_done() {
        let dir = tempdir().unwrap();
        let phases = vec![Phase {
            id: "p1".to_string(),
            subtasks: vec![
                Subtask { id: "s1".to_string(), status: "completed".to_string(), notes: None, updated_at: chrono::Utc::now() },
                Subtask { id: "s2".to_string(), status: "done".to_string(), notes: None, updated_at: chrono::Utc::now() },
                Subtask { id: "s3".to_string(), status: "pending".to_string(), notes: None, updated_at: chrono::Utc::now() },
            ],
        }];
        write_plan(dir.path(), PlanStatus::Queue, phases);
        let score = score_branch(dir.path());
        assert!((score.subtask_completion - (2.0 / 3.0)).abs() < 1e-9);
    }

    #[test]
    fn qa_report_negation_is_not_approved() {
        let dir = tempdir().unwrap();
        write_plan(dir.path(), PlanStatus::Complete, Vec::new());
        std::fs::write(dir.path().join("qa_report.md"), "Status: not approved, see findings").unwrap();
        let score = score_branch(dir.path());
        assert!(!score.qa_approved);
    }

    #[test]
    fn qa_report_approval_phrase_is_approved() {
        let dir = tempdir().unwrap();
        write_plan(dir.path(), PlanStatus::Complete, Vec::new());
        std::fs::write(dir.path().join("qa_report.md"), "All acceptance criteria met.").unwrap();
        let score = score_branch(dir.path());
        assert!(score.qa_approved);
    }
}
