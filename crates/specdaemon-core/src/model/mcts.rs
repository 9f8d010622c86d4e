//! `mcts_tree.json` / `mcts_lessons.json` on-disk shapes (spec.md §3, §4.7).

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// What produced a node (spec.md §3 "Node").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MctsAction {
    Root,
    Draft,
    Debug,
    Improve,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MctsActionParseError(pub String);

impl fmt::Display for MctsActionParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid mcts action: {:?}", self.0)
    }
}
impl std::error::Error for MctsActionParseError {}

impl MctsAction {
    pub fn as_str(self) -> &'static str {
        match self {
            MctsAction::Root => "root",
            MctsAction::Draft => "draft",
            MctsAction::Debug => "debug",
            MctsAction::Improve => "improve",
        }
    }
}

impl fmt::Display for MctsAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MctsAction {
    type Err = MctsActionParseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "root" => Ok(MctsAction::Root),
            "draft" => Ok(MctsAction::Draft),
            "debug" => Ok(MctsAction::Debug),
            "improve" => Ok(MctsAction::Improve),
            other => Err(MctsActionParseError(other.to_owned())),
        }
    }
}

impl Serialize for MctsAction {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(self.as_str())
    }
}

struct MctsActionVisitor;
impl Visitor<'_> for MctsActionVisitor {
    type Value = MctsAction;
    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an mcts action string")
    }
    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        MctsAction::from_str(v).map_err(de::Error::custom)
    }
}
impl<'de> Deserialize<'de> for MctsAction {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        d.deserialize_str(MctsActionVisitor)
    }
}

/// Node lifecycle (spec.md §3 "Node"): `pending -> running -> completed |
/// failed | bug`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Bug,
}

impl NodeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeStatus::Pending => "pending",
            NodeStatus::Running => "running",
            NodeStatus::Completed => "completed",
            NodeStatus::Failed => "failed",
            NodeStatus::Bug => "bug",
        }
    }

    /// A node is expandable iff `status = completed` and evaluated
    /// (spec.md §4.7: "A node is expandable iff status = completed and
    /// evaluated"); evaluated is tracked separately via `score.is_some()`.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            NodeStatus::Completed | NodeStatus::Failed | NodeStatus::Bug
        )
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeStatusParseError(pub String);
impl fmt::Display for NodeStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid node status: {:?}", self.0)
    }
}
impl std::error::Error for NodeStatusParseError {}

impl FromStr for NodeStatus {
    type Err = NodeStatusParseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(NodeStatus::Pending),
            "running" => Ok(NodeStatus::Running),
            "completed" => Ok(NodeStatus::Completed),
            "failed" => Ok(NodeStatus::Failed),
            "bug" => Ok(NodeStatus::Bug),
            other => Err(NodeStatusParseError(other.to_owned())),
        }
    }
}

impl Serialize for NodeStatus {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(self.as_str())
    }
}

struct NodeStatusVisitor;
impl Visitor<'_> for NodeStatusVisitor {
    type Value = NodeStatus;
    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an mcts node status string")
    }
    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        NodeStatus::from_str(v).map_err(de::Error::custom)
    }
}
impl<'de> Deserialize<'de> for NodeStatus {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        d.deserialize_str(NodeStatusVisitor)
    }
}

/// One node of the search tree (spec.md §3 "Node"). The tree owns nodes in
/// an arena (`Tree::nodes: HashMap<id, Node>`); nodes hold parent/child ids
/// only, never direct references (spec.md §9 Design Notes: cyclic
/// references become arena-plus-index designs).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MctsNode {
    pub id: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub spec_id: Option<String>,
    pub action: MctsAction,
    #[serde(default)]
    pub idea_summary: String,
    /// `-1.0` means unset; otherwise `0.0..=1.0` (spec.md §3). Invariant I7:
    /// set exactly once by the Scorer.
    #[serde(default = "default_unset_score")]
    pub score: f64,
    #[serde(default)]
    pub visit_count: u32,
    pub status: NodeStatus,
    #[serde(default)]
    pub cost_seconds: f64,
    #[serde(default)]
    pub cost_tokens: u64,
    #[serde(default)]
    pub children: Vec<String>,
    #[serde(default)]
    pub lessons: Vec<String>,
    #[serde(default = "default_metadata")]
    pub metadata: Value,
}

fn default_unset_score() -> f64 {
    -1.0
}

fn default_metadata() -> Value {
    Value::Object(serde_json::Map::new())
}

impl MctsNode {
    pub fn root(id: impl Into<String>) -> Self {
        MctsNode {
            id: id.into(),
            parent_id: None,
            spec_id: None,
            action: MctsAction::Root,
            idea_summary: "root".to_string(),
            score: 0.0,
            visit_count: 0,
            status: NodeStatus::Completed,
            cost_seconds: 0.0,
            cost_tokens: 0,
            children: Vec::new(),
            lessons: Vec::new(),
            metadata: default_metadata(),
        }
    }

    /// Has the Scorer set this node's score yet (invariant I7)?
    pub fn is_evaluated(&self) -> bool {
        self.score >= 0.0
    }

    /// Expandable per spec.md §4.7: `status = completed` and evaluated.
    pub fn is_expandable(&self) -> bool {
        self.status == NodeStatus::Completed && self.is_evaluated()
    }
}

/// Budget triple (spec.md §4.7 "Budget"), persisted inline in the tree
/// snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MctsBudget {
    pub max_wall_seconds: u64,
    pub max_iterations: u32,
    pub max_branches: u32,
    #[serde(default)]
    pub spent_seconds: f64,
    #[serde(default)]
    pub spent_iterations: u32,
    #[serde(default)]
    pub spent_branches: u32,
    #[serde(default)]
    pub spent_tokens: u64,
}

impl MctsBudget {
    /// `has_budget()` is the conjunction of all three caps (spec.md §4.7).
    pub fn has_budget(&self) -> bool {
        (self.spent_seconds as u64) < self.max_wall_seconds
            && self.spent_iterations < self.max_iterations
            && self.spent_branches < self.max_branches
    }
}

/// The persisted tree (spec.md §3 "Tree").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MctsTreeFile {
    pub root_id: String,
    pub nodes: HashMap<String, MctsNode>,
    #[serde(default)]
    pub best_node_id: Option<String>,
    pub budgets: MctsBudget,
    pub exploration_constant: f64,
    pub cost_penalty_weight: f64,
    pub created_at: DateTime<Utc>,
}

/// `mcts_lessons.json` entry (spec.md §4.10 "Lessons"): a structured
/// record distilled from comparing completed branches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lesson {
    pub id: String,
    pub node_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub findings: Vec<String>,
    #[serde(default)]
    pub key_takeaway: String,
    #[serde(default)]
    pub detection_signals: Vec<String>,
}
