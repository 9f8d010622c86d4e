//! `.daemon_state.json` (spec.md §3): durable recovery counters, error
//! history, and the completion set the dependency matcher (§4.1) consults.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The wire format persisted to disk. `completed_tasks` keeps insertion
/// order (useful for reporting); a `HashSet` shadow is rebuilt on load so
/// `is_completed` stays O(1) without being serialized twice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonStateFile {
    #[serde(default)]
    pub recovery_counts: HashMap<String, u32>,
    #[serde(default)]
    pub error_counts: HashMap<String, u32>,
    #[serde(default)]
    pub last_errors: HashMap<String, String>,
    #[serde(default)]
    pub completed_tasks: Vec<String>,
    #[serde(default)]
    pub task_hierarchy: HashMap<String, Vec<String>>,
    pub started_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl DaemonStateFile {
    pub fn new() -> Self {
        let now = Utc::now();
        DaemonStateFile {
            recovery_counts: HashMap::new(),
            error_counts: HashMap::new(),
            last_errors: HashMap::new(),
            completed_tasks: Vec::new(),
            task_hierarchy: HashMap::new(),
            started_at: now,
            last_updated: now,
        }
    }

    /// Rebuild the O(1) completion shadow set from `completed_tasks`.
    pub fn completed_set(&self) -> HashSet<String> {
        self.completed_tasks.iter().cloned().collect()
    }
}

impl Default for DaemonStateFile {
    fn default() -> Self {
        Self::new()
    }
}
