//! Agent registry: a fixed table keyed by task type describing how to run
//! it (spec.md §4.3).

use std::collections::HashMap;
use std::path::PathBuf;

use crate::model::TaskType;

/// Whether a task type is dispatched in "plan" mode (design-class agents
/// that author child specs) or "headless" mode (spec.md §4.4 Dispatch
/// step 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Plan,
    Headless,
}

/// One agent-registry entry (spec.md §4.3).
#[derive(Debug, Clone, Default)]
pub struct AgentRegistryEntry {
    pub script_path: Option<PathBuf>,
    pub extra_args: Vec<String>,
    pub use_external_cli: bool,
    pub prompt_template: Option<String>,
    pub system_prompt: Option<String>,
    pub execution_mode: Option<ExecutionMode>,
    pub mcp_servers: Vec<String>,
    pub pre_hook: Option<PathBuf>,
    pub post_hook: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct AgentRegistry {
    entries: HashMap<TaskType, AgentRegistryEntry>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, task_type: TaskType, entry: AgentRegistryEntry) -> &mut Self {
        self.entries.insert(task_type, entry);
        self
    }

    pub fn get(&self, task_type: TaskType) -> Option<&AgentRegistryEntry> {
        self.entries.get(&task_type)
    }
}
