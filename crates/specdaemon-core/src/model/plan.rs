//! `implementation_plan.json` — the single source of truth for a spec's
//! lifecycle (spec.md §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::status::PlanStatus;
use super::task_type::{Priority, TaskType};

/// Per-subtask self-report written by the executing agent (spec.md §3
/// "phases[].subtasks[]").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subtask {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub notes: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    pub id: String,
    #[serde(default)]
    pub subtasks: Vec<Subtask>,
}

/// Where a spec directory originated, used only for operator-facing
/// reporting (not part of the plan's scheduling contract). See
/// SPEC_FULL.md §3 SUPPLEMENT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    Operator,
    SpecFactory,
    MctsOrchestrator,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanRecord {
    pub status: PlanStatus,
    pub task_type: TaskType,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub parent_task: Option<String>,
    #[serde(default)]
    pub phases: Vec<Phase>,
    #[serde(default)]
    pub child_specs: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default = "default_context")]
    pub context: Value,
}

fn default_context() -> Value {
    Value::Object(serde_json::Map::new())
}

impl PlanRecord {
    /// Construct a fresh plan record for a newly created spec (spec.md
    /// §4.5 "Create one").
    pub fn new(task_type: TaskType, priority: Priority, parent_task: Option<String>) -> Self {
        let now = Utc::now();
        PlanRecord {
            status: PlanStatus::Queue,
            task_type,
            priority,
            depends_on: Vec::new(),
            parent_task,
            phases: Vec::new(),
            child_specs: Vec::new(),
            created_at: now,
            updated_at: now,
            last_error: None,
            context: default_context(),
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// `requirements.json` (spec.md §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Requirements {
    pub task: String,
    #[serde(default)]
    pub parent_spec: Option<String>,
    #[serde(default)]
    pub complexity: Option<String>,
    #[serde(default)]
    pub files_to_modify: Vec<String>,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub created_by: Origin,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_plan_starts_in_queue_with_empty_phases() {
        let p = PlanRecord::new(TaskType::Impl, Priority::Normal, None);
        assert_eq!(p.status, PlanStatus::Queue);
        assert!(p.phases.is_empty());
        assert!(p.depends_on.is_empty());
    }

    #[test]
    fn serializes_with_camel_case_keys() {
        let p = PlanRecord::new(TaskType::Impl, Priority::Normal, Some("001-root".into()));
        let v = serde_json::to_value(&p).unwrap();
        assert!(v.get("taskType").is_some());
        assert!(v.get("dependsOn").is_some());
        assert!(v.get("parentTask").is_some());
        assert!(v.get("childSpecs").is_some());
    }

    #[test]
    fn round_trips_through_json() {
        let p = PlanRecord::new(TaskType::Verify, Priority::High, Some("001-root".into()));
        let s = serde_json::to_string(&p).unwrap();
        let back: PlanRecord = serde_json::from_str(&s).unwrap();
        assert_eq!(p, back);
    }
}
