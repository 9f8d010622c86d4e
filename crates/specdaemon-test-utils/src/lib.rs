//! Shared fixture builders for specdaemon integration tests.
//!
//! Plays the role `gator-test-utils` plays for the teacher's Postgres
//! fixtures, but over this crate's filesystem-backed spec directories
//! instead of a shared database: build a `<specs>/<id>/` tree with a
//! `spec.md`, `requirements.json`, and `implementation_plan.json` that
//! satisfy `specdaemon_core::planfile`'s schema, so callers can focus
//! their test bodies on the behavior under test.

use std::path::{Path, PathBuf};

use chrono::Utc;
use specdaemon_core::model::{Origin, PlanRecord, Priority, Requirements, TaskType};
use specdaemon_core::planfile;

/// A spec directory under construction. `build()` (or `Drop`, implicitly
/// via the backing `TempDir`) is the only thing that persists it.
pub struct SpecFixture {
    pub dir: PathBuf,
    pub plan: PlanRecord,
}

/// Create `<specs_dir>/<spec_id>/` with a minimal `spec.md`,
/// `requirements.json`, and a fresh `implementation_plan.json` (status
/// `queue`, as `planfile::write_plan`/`PlanRecord::new` produce it).
pub fn create_spec(specs_dir: &Path, spec_id: &str, task_type: TaskType, priority: Priority) -> SpecFixture {
    let dir = specs_dir.join(spec_id);
    std::fs::create_dir_all(&dir).expect("create spec dir");
    std::fs::write(dir.join("spec.md"), format!("# {spec_id}\n\nFixture task.\n")).expect("write spec.md");

    let requirements = Requirements {
        task: format!("fixture task for {spec_id}"),
        parent_spec: None,
        complexity: Some("low".to_string()),
        files_to_modify: Vec::new(),
        acceptance_criteria: vec!["it works".to_string()],
        created_at: Utc::now(),
        created_by: Origin::Operator,
    };
    std::fs::write(
        dir.join("requirements.json"),
        serde_json::to_string_pretty(&requirements).expect("serialize requirements"),
    )
    .expect("write requirements.json");

    let plan = PlanRecord::new(task_type, priority, None);
    planfile::write_plan(&dir, &plan).expect("write implementation_plan.json");

    SpecFixture { dir, plan }
}

impl SpecFixture {
    /// Set `dependsOn` and persist.
    pub fn with_depends_on(mut self, depends_on: Vec<String>) -> Self {
        self.plan.depends_on = depends_on;
        planfile::write_plan(&self.dir, &self.plan).expect("persist depends_on");
        self
    }

    /// Set `parentTask` and persist.
    pub fn with_parent(mut self, parent_task: impl Into<String>) -> Self {
        self.plan.parent_task = Some(parent_task.into());
        planfile::write_plan(&self.dir, &self.plan).expect("persist parent_task");
        self
    }

    /// Overwrite the plan's status and persist (most fixtures want a spec
    /// that starts already `complete`, `error`, or similar).
    pub fn with_status(mut self, status: specdaemon_core::model::PlanStatus) -> Self {
        self.plan.status = status;
        planfile::write_plan(&self.dir, &self.plan).expect("persist status");
        self
    }

    pub fn spec_id(&self) -> &str {
        self.dir.file_name().and_then(|n| n.to_str()).unwrap_or_default()
    }
}

/// Write `validator_results.json` in the array shape `scorer::score_branch`
/// reads (see `specdaemon_core::mcts::scorer`).
pub fn write_validator_results(spec_dir: &Path, results: serde_json::Value) {
    std::fs::write(
        spec_dir.join("validator_results.json"),
        serde_json::to_string_pretty(&results).expect("serialize validator_results"),
    )
    .expect("write validator_results.json");
}

/// Write `qa_report.md` with the given body text.
pub fn write_qa_report(spec_dir: &Path, body: &str) {
    std::fs::write(spec_dir.join("qa_report.md"), body).expect("write qa_report.md");
}

/// Build the standard `.auto-claude/` layout under a fresh temp directory
/// and return `(project_dir_tempdir, specs_dir)`.
pub fn project_fixture() -> (tempfile::TempDir, PathBuf) {
    let project = tempfile::tempdir().expect("tempdir");
    let specs_dir = project.path().join(".auto-claude/specs");
    std::fs::create_dir_all(&specs_dir).expect("create specs dir");
    (project, specs_dir)
}
