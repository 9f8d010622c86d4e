//! C8 MCTS Orchestrator (spec.md §4.8): the outer budgeted loop that
//! expands the tree, waits for the daemon to execute the resulting child
//! specs, scores and backpropagates their outcomes, extracts lessons,
//! and checks for convergence.
//!
//! Grounded on `original_source/.../mcts/orchestrator.py`'s nine-step
//! algorithm docstring (the file's body beyond that docstring is outside
//! the retrieval pack); wired here against this crate's own
//! [`crate::spec_factory`] (branch creation), [`crate::planfile`]
//! (simulate polling), [`super::tree`] (selection/backpropagation),
//! [`super::scorer`] (evaluate), and [`super::lessons`]/[`super::agents`]
//! (extract lessons).

use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::DaemonConfig;
use crate::error::MctsError;
use crate::model::{MctsAction, MctsBudget, NodeStatus, Origin, PlanStatus, Priority, TaskType};
use crate::planfile;
use crate::spec_factory::{self, SpecDef};

use super::agents::{self, CompletedNodeSummary};
use super::lessons;
use super::scorer;
use super::tree;

/// Outcome of a completed search (spec.md §4.8 step 7 "Finalize").
#[derive(Debug, Clone)]
pub struct MctsResult {
    pub best_node_id: Option<String>,
    pub best_score: f64,
    pub iterations: u32,
    pub branches: u32,
    pub lessons: Vec<crate::model::Lesson>,
    pub summary: String,
}

fn budget_from_config(cfg: &DaemonConfig) -> MctsBudget {
    MctsBudget {
        max_wall_seconds: cfg.mcts.max_wall_seconds,
        max_iterations: cfg.mcts.max_iterations,
        max_branches: cfg.mcts.max_branches,
        spent_seconds: 0.0,
        spent_iterations: 0,
        spent_branches: 0,
        spent_tokens: 0,
    }
}

/// Create a branch spec as a child of `parent_spec_dir`, guarded by the
/// spec-tree depth limit (spec.md §4.8 "Depth guard"). On a depth
/// violation, no directory is created; the caller marks the tree node
/// `failed` instead.
fn create_branch_spec(
    cfg: &DaemonConfig,
    parent_spec_id: &str,
    parent_depth: u32,
    task: String,
) -> Result<(String, PathBuf), crate::error::SpecFactoryError> {
    let specs_dir = cfg.specs_dir();
    let def = SpecDef::new(task);
    let spec_dir = spec_factory::create_one(
        &specs_dir,
        Some(parent_spec_id),
        &def,
        Origin::MctsOrchestrator,
        parent_depth,
        cfg.max_child_depth,
    )?;
    let spec_id = spec_dir.file_name().unwrap().to_string_lossy().into_owned();
    Ok((spec_id, spec_dir))
}

fn terminal_plan_status(spec_dir: &Path) -> Option<bool> {
    let plan = planfile::read_plan(spec_dir).ok()?;
    match plan.status {
        PlanStatus::Complete | PlanStatus::HumanReview => Some(true),
        PlanStatus::Error => Some(false),
        _ => None,
    }
}

/// Poll every node in `node_ids` every `poll_interval` until each either
/// reaches a terminal plan status or `cap` elapses (spec.md §4.8 step 3
/// "Simulate"). Returns `(node_id, passed, elapsed_seconds)` for each.
async fn simulate(
    tree_file: &crate::model::MctsTreeFile,
    node_ids: &[String],
    specs_dir: &Path,
    poll_interval: std::time::Duration,
    cap: std::time::Duration,
) -> Vec<(String, bool, f64)> {
    let mut remaining: Vec<&String> = node_ids.iter().collect();
    let mut results = Vec::new();
    let start = tokio::time::Instant::now();

    while !remaining.is_empty() && start.elapsed() < cap {
        let mut still_running = Vec::new();
        for node_id in remaining {
            let Some(node) = tree_file.nodes.get(node_id) else { continue };
            let Some(spec_id) = &node.spec_id else { continue };
            let spec_dir = specs_dir.join(spec_id);
            match terminal_plan_status(&spec_dir) {
                Some(passed) => results.push((node_id.clone(), passed, start.elapsed().as_secs_f64())),
                None => still_running.push(node_id),
            }
        }
        remaining = still_running;
        if !remaining.is_empty() {
            tokio::time::sleep(poll_interval).await;
        }
    }

    // Anything still running at the cap times out as failed.
    for node_id in remaining {
        results.push((node_id.clone(), false, cap.as_secs_f64()));
    }
    results
}

/// Run the MCTS search rooted at `spec_dir` (spec.md §4.8 full outer
/// loop). `spec_dir` is the orchestrating task's own spec directory;
/// `root_depth` is its depth in the global spec tree, used to seed the
/// depth guard for generated branches. `cancel` is the daemon's shutdown
/// token (spec.md §5 "Cancellation"): checked once per round so a daemon
/// `stop` interrupts a long search between rounds instead of running it
/// to completion in the background.
pub async fn run_mcts_search(
    cfg: &DaemonConfig,
    spec_dir: &Path,
    root_depth: u32,
    cancel: &CancellationToken,
) -> Result<MctsResult, MctsError> {
    let specs_dir = cfg.specs_dir();
    let spec_content = std::fs::read_to_string(spec_dir.join("spec.md")).unwrap_or_default();
    let root_spec_id = spec_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut tree_file = tree::load_or_create(
        spec_dir,
        budget_from_config(cfg),
        cfg.mcts.exploration_constant,
        cfg.mcts.cost_penalty_weight,
    )?;

    let poll_interval = std::time::Duration::from_secs(cfg.mcts.poll_interval_secs);
    let simulate_cap = std::time::Duration::from_secs(cfg.mcts.simulate_cap_secs);

    let mut last_best: Option<f64> = None;
    let mut stale_rounds = 0u32;

    while tree_file.budgets.has_budget() && !cancel.is_cancelled() {
        let is_first_round = tree_file.budgets.spent_iterations == 0;
        let mut new_node_ids = Vec::new();

        if is_first_round {
            let root_id = tree_file.root_id.clone();
            let past_lessons = lessons::load(spec_dir);
            let ideas = agents::generate_ideas(
                cfg,
                &spec_content,
                cfg.mcts.initial_ideas,
                &past_lessons,
                &cfg.project_dir,
            )
            .await;
            for idea in ideas {
                let node_id = tree::add_node(&mut tree_file, &root_id, MctsAction::Draft, idea.summary.clone(), None)?;
                spawn_branch(cfg, &mut tree_file, &node_id, &root_id, root_depth, &root_spec_id, idea.summary)?;
                new_node_ids.push(node_id);
            }
        } else {
            if let Some(failed_id) = tree::select_for_debug(&tree_file) {
                let error_output = tree_file.nodes[&failed_id]
                    .metadata
                    .get("error")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string();
                let debug_plan = agents::analyze_failure(
                    cfg,
                    &spec_content,
                    &tree_file.nodes[&failed_id].idea_summary,
                    &error_output,
                    &cfg.project_dir,
                )
                .await;
                let node_id = tree::add_node(&mut tree_file, &failed_id, MctsAction::Debug, debug_plan.fix_direction.clone(), None)?;
                let parent_depth = root_depth + tree::depth_of(&tree_file, &failed_id);
                spawn_branch(cfg, &mut tree_file, &node_id, &failed_id, parent_depth, &root_spec_id, debug_plan.fix_direction)?;
                new_node_ids.push(node_id);
            }
            if let Some(target_id) = tree::select_for_improvement(&tree_file) {
                let known_lessons = lessons::load(spec_dir);
                let target = &tree_file.nodes[&target_id];
                let improvement = agents::propose_improvement(
                    cfg,
                    &spec_content,
                    &target.idea_summary,
                    target.score,
                    &known_lessons,
                    &cfg.project_dir,
                )
                .await;
                let node_id = tree::add_node(&mut tree_file, &target_id, MctsAction::Improve, improvement.summary.clone(), None)?;
                let parent_depth = root_depth + tree::depth_of(&tree_file, &target_id);
                spawn_branch(cfg, &mut tree_file, &node_id, &target_id, parent_depth, &root_spec_id, improvement.summary)?;
                new_node_ids.push(node_id);
            }
        }

        // Only nodes that actually got a spec_id are running; depth-guard
        // failures above were marked `failed` in place without one.
        let running_ids: Vec<String> = new_node_ids
            .iter()
            .filter(|id| tree_file.nodes[*id].status == NodeStatus::Running)
            .cloned()
            .collect();

        let outcomes = simulate(&tree_file, &running_ids, &specs_dir, poll_interval, simulate_cap).await;

        for (node_id, passed, elapsed) in outcomes {
            let spec_id = tree_file.nodes[&node_id].spec_id.clone();
            tree_file.nodes.get_mut(&node_id).unwrap().status =
                if passed { NodeStatus::Completed } else { NodeStatus::Failed };
            tree_file.nodes.get_mut(&node_id).unwrap().cost_seconds = elapsed;

            let score_total = if passed {
                spec_id
                    .as_ref()
                    .map(|id| scorer::score_branch(&specs_dir.join(id)).total)
                    .unwrap_or(0.0)
            } else {
                0.0
            };
            tree::backpropagate(&mut tree_file, &node_id, score_total)?;
        }

        tree_file.budgets.spent_iterations += 1;

        let completed: Vec<&crate::model::MctsNode> = tree_file
            .nodes
            .values()
            .filter(|n| n.status == NodeStatus::Completed)
            .collect();
        if completed.len() >= 2 {
            let summaries: Vec<CompletedNodeSummary> = completed
                .iter()
                .map(|n| CompletedNodeSummary {
                    id: &n.id,
                    score: n.score,
                    action: n.action.as_str(),
                    idea_summary: &n.idea_summary,
                    status: n.status.as_str(),
                })
                .collect();
            let extracted = agents::extract_lessons(cfg, &summaries, &spec_content, &cfg.project_dir).await;
            if !extracted.is_empty() {
                lessons::append(spec_dir, extracted)?;
            }
        }

        tree::save(spec_dir, &tree_file)?;

        let best_score = tree_file
            .best_node_id
            .as_ref()
            .and_then(|id| tree_file.nodes.get(id))
            .map(|n| n.score)
            .unwrap_or(0.0);

        if best_score >= cfg.mcts.accept_threshold {
            info!("mcts converged: best score {best_score:.2} >= accept threshold");
            break;
        }
        match last_best {
            Some(prev) if (best_score - prev).abs() < cfg.mcts.convergence_threshold => {
                stale_rounds += 1;
                if stale_rounds >= 2 {
                    info!("mcts converged: score delta below threshold for two rounds");
                    break;
                }
            }
            _ => stale_rounds = 0,
        }
        last_best = Some(best_score);
    }

    let best_node_id = tree_file.best_node_id.clone();
    let best_score = best_node_id
        .as_ref()
        .and_then(|id| tree_file.nodes.get(id))
        .map(|n| n.score)
        .unwrap_or(0.0);

    Ok(MctsResult {
        best_node_id,
        best_score,
        iterations: tree_file.budgets.spent_iterations,
        branches: tree_file.budgets.spent_branches,
        lessons: lessons::load(spec_dir),
        summary: format!(
            "{} iterations, {} branches, best score {best_score:.2}",
            tree_file.budgets.spent_iterations, tree_file.budgets.spent_branches
        ),
    })
}

/// Create the child spec for a freshly-added node and wire the result
/// back into the node (spec/budget bookkeeping); on a depth violation,
/// mark the node `failed` in place instead (spec.md §4.8 "Depth guard").
fn spawn_branch(
    cfg: &DaemonConfig,
    tree_file: &mut crate::model::MctsTreeFile,
    node_id: &str,
    parent_node_id: &str,
    parent_depth: u32,
    root_spec_id: &str,
    task: String,
) -> Result<(), MctsError> {
    // The MCTS root node represents the orchestrating spec itself and
    // carries no `spec_id` of its own; every other node is given one by
    // this function before it can become anyone's parent.
    let parent_spec_id = tree_file.nodes[parent_node_id]
        .spec_id
        .clone()
        .unwrap_or_else(|| root_spec_id.to_string());

    match create_branch_spec(cfg, &parent_spec_id, parent_depth, task) {
        Ok((spec_id, _spec_dir)) => {
            let node = tree_file.nodes.get_mut(node_id).unwrap();
            node.spec_id = Some(spec_id);
            node.status = NodeStatus::Running;
            tree_file.budgets.spent_branches += 1;
        }
        Err(e) => {
            let node = tree_file.nodes.get_mut(node_id).unwrap();
            node.status = NodeStatus::Failed;
            node.metadata = serde_json::json!({"error": e.to_string()});
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CliOverrides;

    fn cfg(project_dir: &std::path::Path) -> DaemonConfig {
        DaemonConfig::resolve(CliOverrides {
            project_dir: Some(project_dir.to_path_buf()),
            ..Default::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn load_or_create_tree_is_idempotent_across_calls() {
        let dir = tempfile::tempdir().unwrap();
        let c = cfg(dir.path());
        let budget = budget_from_config(&c);
        let t1 = tree::load_or_create(dir.path(), budget, 1.41, -0.07).unwrap();
        let budget2 = budget_from_config(&c);
        let t2 = tree::load_or_create(dir.path(), budget2, 1.41, -0.07).unwrap();
        assert_eq!(t1.root_id, t2.root_id);
    }

    #[test]
    fn terminal_plan_status_reads_complete_as_passed() {
        let dir = tempfile::tempdir().unwrap();
        let mut plan = crate::model::PlanRecord::new(TaskType::Impl, Priority::Normal, None);
        plan.status = PlanStatus::Complete;
        planfile::write_plan(dir.path(), &plan).unwrap();
        assert_eq!(terminal_plan_status(dir.path()), Some(true));
    }

    #[test]
    fn terminal_plan_status_reads_error_as_failed() {
        let dir = tempfile::tempdir().unwrap();
        let mut plan = crate::model::PlanRecord::new(TaskType::Impl, Priority::Normal, None);
        plan.status = PlanStatus::Error;
        planfile::write_plan(dir.path(), &plan).unwrap();
        assert_eq!(terminal_plan_status(dir.path()), Some(false));
    }

    #[test]
    fn terminal_plan_status_none_while_in_progress() {
        let dir = tempfile::tempdir().unwrap();
        let mut plan = crate::model::PlanRecord::new(TaskType::Impl, Priority::Normal, None);
        plan.status = PlanStatus::InProgress;
        planfile::write_plan(dir.path(), &plan).unwrap();
        assert_eq!(terminal_plan_status(dir.path()), None);
    }

    #[tokio::test]
    async fn simulate_times_out_nodes_with_no_spec_id_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let c = cfg(dir.path());
        let tree_file = tree::load_or_create(dir.path(), budget_from_config(&c), 1.41, -0.07).unwrap();
        let results = simulate(
            &tree_file,
            &[],
            &dir.path().to_path_buf(),
            std::time::Duration::from_millis(1),
            std::time::Duration::from_millis(5),
        )
        .await;
        assert!(results.is_empty());
    }
}
