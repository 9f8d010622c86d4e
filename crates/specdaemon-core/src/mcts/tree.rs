//! C7 MCTS Tree & Budget (spec.md §4.7): load/create, UCB1 node
//! selection, and score-once backpropagation over the arena-style
//! [`MctsTreeFile`] defined in `model::mcts`.
//!
//! Grounded on `original_source/.../mcts/tree.py`'s node-lifecycle
//! contract (`pending -> running -> completed | failed | bug`,
//! persistence via `write_json_atomic`) and `budget.py`'s
//! `compute_penalty`; the UCB1 formula itself and the "node under
//! parent" selection scope come from spec.md §4.7 directly, since the
//! reference implementation's tree.py in this pack carries no selection
//! logic of its own (it is a thin dataclass module — the loop lives in
//! orchestrator.py, not reproduced in the retrieval pack beyond its
//! docstring).

use std::path::Path;

use chrono::Utc;
use uuid::Uuid;

use crate::error::MctsError;
use crate::model::{MctsAction, MctsBudget, MctsNode, MctsTreeFile, NodeStatus};
use crate::state::persist::{atomic_write_json, read_json};

pub const TREE_FILE_NAME: &str = "mcts_tree.json";

pub fn tree_path(spec_dir: &Path) -> std::path::PathBuf {
    spec_dir.join(TREE_FILE_NAME)
}

/// Load an existing tree, or create a fresh one rooted at `root` (spec.md
/// §4.8 step 1: "Root action = root, status = completed, score = 0").
pub fn load_or_create(
    spec_dir: &Path,
    budget: MctsBudget,
    exploration_constant: f64,
    cost_penalty_weight: f64,
) -> Result<MctsTreeFile, MctsError> {
    let path = tree_path(spec_dir);
    if path.exists() {
        return Ok(read_json(&path)?);
    }

    let root_id = format!("n-{}", Uuid::new_v4());
    let mut nodes = std::collections::HashMap::new();
    nodes.insert(root_id.clone(), MctsNode::root(&root_id));

    let tree = MctsTreeFile {
        root_id,
        nodes,
        best_node_id: None,
        budgets: budget,
        exploration_constant,
        cost_penalty_weight,
        created_at: Utc::now(),
    };
    save(spec_dir, &tree)?;
    Ok(tree)
}

pub fn save(spec_dir: &Path, tree: &MctsTreeFile) -> Result<(), MctsError> {
    Ok(atomic_write_json(&tree_path(spec_dir), tree)?)
}

/// Depth of `node_id` via parent-chain walk, root is depth 0 (spec.md
/// §4.8 "Depth guard").
pub fn depth_of(tree: &MctsTreeFile, node_id: &str) -> u32 {
    let mut depth = 0;
    let mut current = node_id;
    while let Some(node) = tree.nodes.get(current) {
        match &node.parent_id {
            Some(parent_id) => {
                depth += 1;
                current = parent_id;
            }
            None => break,
        }
    }
    depth
}

/// Add a child node under `parent_id` (spec.md §3 "Node"); returns the new
/// node's id. Does not touch budgets — callers record branch spend via
/// [`MctsBudget::record_branch`]-equivalent bookkeeping at the call site.
pub fn add_node(
    tree: &mut MctsTreeFile,
    parent_id: &str,
    action: MctsAction,
    idea_summary: impl Into<String>,
    spec_id: Option<String>,
) -> Result<String, MctsError> {
    if !tree.nodes.contains_key(parent_id) {
        return Err(MctsError::NodeNotFound(parent_id.to_string()));
    }
    let id = format!("n-{}", Uuid::new_v4());
    let node = MctsNode {
        id: id.clone(),
        parent_id: Some(parent_id.to_string()),
        spec_id,
        action,
        idea_summary: idea_summary.into(),
        score: -1.0,
        visit_count: 0,
        status: NodeStatus::Pending,
        cost_seconds: 0.0,
        cost_tokens: 0,
        children: Vec::new(),
        lessons: Vec::new(),
        metadata: serde_json::Value::Object(serde_json::Map::new()),
    };
    tree.nodes.get_mut(parent_id).unwrap().children.push(id.clone());
    tree.nodes.insert(id.clone(), node);
    Ok(id)
}

fn penalty(tree: &MctsTreeFile, node: &MctsNode) -> f64 {
    if node.cost_seconds <= 0.0 {
        return 1.0;
    }
    let allocated_per_branch =
        tree.budgets.max_wall_seconds as f64 / (tree.budgets.max_branches.max(1) as f64);
    (allocated_per_branch / node.cost_seconds).powf(tree.cost_penalty_weight)
}

/// UCB1 score for `node_id`, which must have a parent (spec.md §4.7: "for
/// each expandable, visited node v under parent p"). Unvisited nodes
/// score `+inf`.
fn ucb1(tree: &MctsTreeFile, node_id: &str) -> Option<f64> {
    let node = tree.nodes.get(node_id)?;
    let parent_id = node.parent_id.as_ref()?;
    let parent = tree.nodes.get(parent_id)?;

    if node.visit_count == 0 {
        return Some(f64::INFINITY);
    }

    let parent_visits = parent.visit_count.max(tree.budgets.spent_iterations) as f64;
    let exploration = tree.exploration_constant
        * (parent_visits.ln() / node.visit_count as f64).sqrt()
        * penalty(tree, node);
    Some(node.score + exploration)
}

/// Pick the expandable (`status = completed`, evaluated), non-root node
/// with the highest UCB1 score (spec.md §4.8 step 2, "improve one
/// UCB-selected expandable node"). Ties keep the first-found node.
pub fn select_for_improvement(tree: &MctsTreeFile) -> Option<String> {
    tree.nodes
        .values()
        .filter(|n| n.parent_id.is_some() && n.is_expandable())
        .filter_map(|n| ucb1(tree, &n.id).map(|score| (n.id.clone(), score)))
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(id, _)| id)
}

/// First `failed` non-root node, in insertion order, to debug this round
/// (spec.md §4.8 step 2: "debug at most one failed node").
pub fn select_for_debug(tree: &MctsTreeFile) -> Option<String> {
    let mut candidates: Vec<&MctsNode> = tree
        .nodes
        .values()
        .filter(|n| n.parent_id.is_some() && n.status == NodeStatus::Failed)
        .collect();
    candidates.sort_by(|a, b| a.id.cmp(&b.id));
    candidates.first().map(|n| n.id.clone())
}

/// Set `node.score` once, increment `visit_count` for the node and every
/// ancestor, and update `best_node_id` on strict improvement (spec.md
/// §4.7 "Backpropagation", invariant I7).
pub fn backpropagate(tree: &mut MctsTreeFile, node_id: &str, score: f64) -> Result<(), MctsError> {
    {
        let node = tree
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| MctsError::NodeNotFound(node_id.to_string()))?;
        if !node.is_evaluated() {
            node.score = score;
        }
        node.visit_count += 1;
    }

    let mut current = tree
        .nodes
        .get(node_id)
        .and_then(|n| n.parent_id.clone());
    while let Some(id) = current {
        let Some(ancestor) = tree.nodes.get_mut(&id) else { break };
        ancestor.visit_count += 1;
        current = ancestor.parent_id.clone();
    }

    let should_replace = match &tree.best_node_id {
        None => true,
        Some(best_id) => tree
            .nodes
            .get(best_id)
            .map(|best| score > best.score)
            .unwrap_or(true),
    };
    if should_replace {
        tree.best_node_id = Some(node_id.to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn budget() -> MctsBudget {
        MctsBudget {
            max_wall_seconds: 3600,
            max_iterations: 20,
            max_branches: 32,
            spent_seconds: 0.0,
            spent_iterations: 0,
            spent_branches: 0,
            spent_tokens: 0,
        }
    }

    #[test]
    fn load_or_create_persists_a_root_node() {
        let dir = tempdir().unwrap();
        let tree = load_or_create(dir.path(), budget(), 1.41, -0.07).unwrap();
        assert_eq!(tree.nodes.len(), 1);
        assert!(tree_path(dir.path()).exists());
        let reloaded = load_or_create(dir.path(), budget(), 1.41, -0.07).unwrap();
        assert_eq!(reloaded.root_id, tree.root_id);
    }

    #[test]
    fn depth_of_walks_parent_chain() {
        let dir = tempdir().unwrap();
        let mut tree = load_or_create(dir.path(), budget(), 1.41, -0.07).unwrap();
        let root_id = tree.root_id.clone();
        let child = add_node(&mut tree, &root_id, MctsAction::Draft, "idea", None).unwrap();
        let grandchild = add_node(&mut tree, &child, MctsAction::Improve, "improve", None).unwrap();
        assert_eq!(depth_of(&tree, &root_id), 0);
        assert_eq!(depth_of(&tree, &child), 1);
        assert_eq!(depth_of(&tree, &grandchild), 2);
    }

    #[test]
    fn unvisited_expandable_node_wins_selection() {
        let dir = tempdir().unwrap();
        let mut tree = load_or_create(dir.path(), budget(), 1.41, -0.07).unwrap();
        let root_id = tree.root_id.clone();
        let a = add_node(&mut tree, &root_id, MctsAction::Draft, "a", None).unwrap();
        let b = add_node(&mut tree, &root_id, MctsAction::Draft, "b", None).unwrap();
        tree.nodes.get_mut(&a).unwrap().status = NodeStatus::Completed;
        tree.nodes.get_mut(&a).unwrap().score = 0.5;
        tree.nodes.get_mut(&a).unwrap().visit_count = 1;
        tree.nodes.get_mut(&b).unwrap().status = NodeStatus::Completed;
        tree.nodes.get_mut(&b).unwrap().score = 0.9;
        // b has visit_count 0 => +inf, always wins regardless of score.
        assert_eq!(select_for_improvement(&tree), Some(b));
    }

    #[test]
    fn backpropagate_sets_score_once_and_bumps_ancestor_visits_only() {
        let dir = tempdir().unwrap();
        let mut tree = load_or_create(dir.path(), budget(), 1.41, -0.07).unwrap();
        let root_id = tree.root_id.clone();
        let child = add_node(&mut tree, &root_id, MctsAction::Draft, "idea", None).unwrap();
        tree.nodes.get_mut(&child).unwrap().status = NodeStatus::Completed;

        backpropagate(&mut tree, &child, 0.6).unwrap();
        assert_eq!(tree.nodes[&child].score, 0.6);
        assert_eq!(tree.nodes[&child].visit_count, 1);
        assert_eq!(tree.nodes[&root_id].score, 0.0); // unchanged
        assert_eq!(tree.nodes[&root_id].visit_count, 1);
        assert_eq!(tree.best_node_id.as_deref(), Some(child.as_str()));

        // Re-scoring does not move the already-set score.
        backpropagate(&mut tree, &child, 0.9).unwrap();
        assert_eq!(tree.nodes[&child].score, 0.6);
        assert_eq!(tree.nodes[&child].visit_count, 2);
    }

    #[test]
    fn best_node_moves_only_on_strict_improvement() {
        let dir = tempdir().unwrap();
        let mut tree = load_or_create(dir.path(), budget(), 1.41, -0.07).unwrap();
        let root_id = tree.root_id.clone();
        let a = add_node(&mut tree, &root_id, MctsAction::Draft, "a", None).unwrap();
        let b = add_node(&mut tree, &root_id, MctsAction::Draft, "b", None).unwrap();
        backpropagate(&mut tree, &a, 0.7).unwrap();
        backpropagate(&mut tree, &b, 0.7).unwrap();
        assert_eq!(tree.best_node_id.as_deref(), Some(a.as_str()));
    }

    #[test]
    fn select_for_debug_finds_failed_non_root_node() {
        let dir = tempdir().unwrap();
        let mut tree = load_or_create(dir.path(), budget(), 1.41, -0.07).unwrap();
        let root_id = tree.root_id.clone();
        assert!(select_for_debug(&tree).is_none());
        let child = add_node(&mut tree, &root_id, MctsAction::Draft, "a", None).unwrap();
        tree.nodes.get_mut(&child).unwrap().status = NodeStatus::Failed;
        assert_eq!(select_for_debug(&tree), Some(child));
    }
}
