//! C6 Validator Pipeline (spec.md §4.6): select validators by project
//! capability, run the build validator first and sequentially, then run
//! the remaining ("runtime") validators concurrently without letting a
//! panicking validator block the others.
//!
//! The `ValidatorResult`/trait-object shape is grounded on
//! `original_source/.../qa/validators/__init__.py`'s `ValidatorResult`/
//! `BaseValidator`; the orchestration order (build-first-sequential, then
//! runtime-concurrent with exception isolation) is grounded on
//! `qa/validator_orchestrator.py::run_validators`. Concurrent dispatch and
//! timeout handling reuse the idiom from
//! `gator-core/src/invariant/runner.rs::run_invariant`.

pub mod api;
pub mod browser;
pub mod build;
pub mod database;

use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinSet;

/// One finding surfaced by a validator (spec.md §4.6 "issues").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub severity: String,
    pub description: String,
    #[serde(default)]
    pub file: String,
    #[serde(default)]
    pub line: u32,
}

/// Output of a single validator run — the wire between the orchestrator
/// and `qa_report.md` rendering (spec.md §4.6, §4.10).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorResult {
    pub validator_id: String,
    pub passed: bool,
    #[serde(default)]
    pub issues: Vec<Issue>,
    #[serde(default)]
    pub screenshots: Vec<PathBuf>,
    #[serde(default)]
    pub report_section: String,
    #[serde(default)]
    pub metadata: Value,
}

impl ValidatorResult {
    fn skipped(id: &str, description: &str, reason: &str) -> Self {
        ValidatorResult {
            validator_id: id.to_string(),
            passed: true,
            issues: Vec::new(),
            screenshots: Vec::new(),
            report_section: format!("## {description}\n\n- Skipped ({reason})\n"),
            metadata: serde_json::json!({"skipped": true, "reason": reason}),
        }
    }

    fn errored(id: &str, description: &str, message: &str) -> Self {
        ValidatorResult {
            validator_id: id.to_string(),
            passed: true, // validator errors never block the pipeline
            issues: vec![Issue {
                severity: "minor".to_string(),
                description: format!("Validator error: {}", truncate(message, 200)),
                file: String::new(),
                line: 0,
            }],
            screenshots: Vec::new(),
            report_section: format!("## {description}\n\n- ERROR: {message}\n"),
            metadata: Value::Null,
        }
    }
}

pub fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

/// Capabilities detected from `project_index.json` (and, for the database
/// case, the filesystem directly), gating which runtime validators apply
/// (spec.md §4.6 "capability_trigger").
#[derive(Debug, Clone, Default)]
pub struct ProjectCapabilities {
    pub has_api: bool,
    pub has_database: bool,
    pub has_web_frontend: bool,
}

const WEB_FRAMEWORKS: &[&str] = &[
    "next", "nuxt", "vite", "react", "angular", "vue", "expo", "svelte", "flutter", "tauri",
];
const API_FRAMEWORKS: &[&str] = &[
    "fastapi", "express", "axum", "flask", "django", "rails", "actix", "nestjs", "fiber",
];
const MIGRATION_DIRS: &[&str] = &["prisma/migrations", "drizzle", "migrations", "alembic/versions", "db/migrate"];

fn services_list(value: &Value) -> Vec<Value> {
    match value.get("services") {
        Some(Value::Object(map)) => map.values().cloned().collect(),
        Some(Value::Array(arr)) => arr.clone(),
        _ => Vec::new(),
    }
}

/// Detect project capabilities, grounded on `build_validator.py`'s /
/// `browser_validator.py`'s "handle both dict and list formats" reading of
/// `project_index.json`'s `services`, plus `db_validator.py`'s migration-
/// directory probe.
pub fn detect_capabilities(project_dir: &Path) -> ProjectCapabilities {
    let index_path = project_dir.join(".auto-claude/project_index.json");
    let mut caps = ProjectCapabilities::default();

    if let Ok(value) = crate::state::persist::read_json::<Value>(&index_path) {
        if let Some(explicit) = value.get("capabilities").and_then(Value::as_object) {
            caps.has_api = explicit.get("has_api").and_then(Value::as_bool).unwrap_or(false);
            caps.has_database = explicit.get("has_database").and_then(Value::as_bool).unwrap_or(false);
            caps.has_web_frontend = explicit
                .get("has_web_frontend")
                .and_then(Value::as_bool)
                .unwrap_or(false);
        } else {
            for svc in services_list(&value) {
                let Some(obj) = svc.as_object() else { continue };
                let framework = obj.get("framework").and_then(Value::as_str).unwrap_or("").to_ascii_lowercase();
                if WEB_FRAMEWORKS.iter().any(|f| framework.contains(f))
                    || obj.contains_key("dev_command")
                    || obj.contains_key("web_dev_command")
                {
                    caps.has_web_frontend = true;
                }
                if API_FRAMEWORKS.iter().any(|f| framework.contains(f)) || obj.get("type").and_then(Value::as_str) == Some("api")
                {
                    caps.has_api = true;
                }
            }
        }
    }

    if MIGRATION_DIRS.iter().any(|d| project_dir.join(d).exists()) {
        caps.has_database = true;
    }

    caps
}

/// Shared read-only context handed to every validator.
#[derive(Debug, Clone)]
pub struct ValidateCtx {
    pub project_dir: PathBuf,
    pub spec_dir: PathBuf,
    pub capabilities: ProjectCapabilities,
}

/// One validator (spec.md §4.6 "BaseValidator"). `capability_trigger`
/// gating is expressed through [`Validator::is_applicable`]; the build
/// validator overrides it to always return `true`.
#[async_trait]
pub trait Validator: Send + Sync {
    fn id(&self) -> &'static str;
    fn description(&self) -> &'static str;

    fn is_applicable(&self, _capabilities: &ProjectCapabilities) -> bool {
        true
    }

    async fn validate(&self, ctx: &ValidateCtx) -> ValidatorResult;
}

/// All validators known to the pipeline, in the teacher's display order
/// (spec.md §4.6; order is cosmetic — applicability and the build/runtime
/// split determine execution order).
pub fn all_validators() -> Vec<Arc<dyn Validator>> {
    vec![
        Arc::new(build::BuildValidator),
        Arc::new(browser::BrowserValidator),
        Arc::new(api::ApiValidator),
        Arc::new(database::DatabaseValidator),
    ]
}

pub fn select_validators(capabilities: &ProjectCapabilities) -> Vec<Arc<dyn Validator>> {
    all_validators()
        .into_iter()
        .filter(|v| v.is_applicable(capabilities))
        .collect()
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "validator panicked".to_string()
    }
}

/// Run all applicable validators for a project (spec.md §4.6 "Run
/// validators"): the build validator first and sequentially; if it fails,
/// every runtime validator is recorded as skipped and nothing else runs;
/// otherwise the runtime validators run concurrently, each isolated so a
/// panic becomes a non-blocking "minor" issue rather than aborting the
/// others (mirrors `asyncio.gather(..., return_exceptions=True)`).
pub async fn run_validators(project_dir: &Path, spec_dir: &Path, capabilities: &ProjectCapabilities) -> Vec<ValidatorResult> {
    let validators = select_validators(capabilities);
    if validators.is_empty() {
        return Vec::new();
    }

    let ctx = Arc::new(ValidateCtx {
        project_dir: project_dir.to_path_buf(),
        spec_dir: spec_dir.to_path_buf(),
        capabilities: capabilities.clone(),
    });

    let (build_validators, runtime_validators): (Vec<_>, Vec<_>) = validators.into_iter().partition(|v| v.id() == "build");

    let mut results = Vec::new();
    for v in &build_validators {
        let result = v.validate(&ctx).await;
        let failed = !result.passed;
        results.push(result);
        if failed {
            for rv in &runtime_validators {
                results.push(ValidatorResult::skipped(rv.id(), rv.description(), "build_failed"));
            }
            return results;
        }
    }

    if runtime_validators.is_empty() {
        return results;
    }

    let mut set = JoinSet::new();
    for v in runtime_validators {
        let ctx = Arc::clone(&ctx);
        set.spawn(async move {
            let id = v.id();
            let description = v.description();
            match AssertUnwindSafe(v.validate(&ctx)).catch_unwind().await {
                Ok(result) => result,
                Err(payload) => ValidatorResult::errored(id, description, &panic_message(&*payload)),
            }
        });
    }
    while let Some(joined) = set.join_next().await {
        if let Ok(result) = joined {
            results.push(result);
        }
        // A `JoinError` here means the task was cancelled/aborted, which
        // this pipeline never does; nothing to record.
    }

    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    struct AlwaysPasses;
    #[async_trait]
    impl Validator for AlwaysPasses {
        fn id(&self) -> &'static str {
            "build"
        }
        fn description(&self) -> &'static str {
            "always passes"
        }
        async fn validate(&self, _ctx: &ValidateCtx) -> ValidatorResult {
            ValidatorResult {
                validator_id: "build".to_string(),
                passed: true,
                issues: vec![],
                screenshots: vec![],
                report_section: String::new(),
                metadata: Value::Null,
            }
        }
    }

    struct AlwaysPanics;
    #[async_trait]
    impl Validator for AlwaysPanics {
        fn id(&self) -> &'static str {
            "panicky"
        }
        fn description(&self) -> &'static str {
            "panics"
        }
        async fn validate(&self, _ctx: &ValidateCtx) -> ValidatorResult {
            panic!("boom");
        }
    }

    #[test]
    fn detect_capabilities_reads_explicit_block() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".auto-claude")).unwrap();
        std::fs::write(
            dir.path().join(".auto-claude/project_index.json"),
            serde_json::json!({"capabilities": {"has_api": true, "has_database": false, "has_web_frontend": true}})
                .to_string(),
        )
        .unwrap();
        let caps = detect_capabilities(dir.path());
        assert!(caps.has_api);
        assert!(!caps.has_database);
        assert!(caps.has_web_frontend);
    }

    #[test]
    fn detect_capabilities_infers_database_from_migration_dir() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("migrations")).unwrap();
        let caps = detect_capabilities(dir.path());
        assert!(caps.has_database);
    }

    #[tokio::test]
    async fn run_validators_returns_empty_when_none_applicable() {
        let dir = tempdir().unwrap();
        let caps = ProjectCapabilities::default();
        // build is always-applicable in the real pipeline; to exercise the
        // empty-selection branch we'd need to stub that out, so instead
        // assert select_validators always includes build.
        let selected = select_validators(&caps);
        assert!(selected.iter().any(|v| v.id() == "build"));
        let _ = dir;
    }

    #[tokio::test]
    async fn panicking_runtime_validator_does_not_take_down_the_batch() {
        let ctx = Arc::new(ValidateCtx {
            project_dir: PathBuf::new(),
            spec_dir: PathBuf::new(),
            capabilities: ProjectCapabilities::default(),
        });
        let good: Arc<dyn Validator> = Arc::new(AlwaysPasses);
        let bad: Arc<dyn Validator> = Arc::new(AlwaysPanics);

        let mut set = JoinSet::new();
        for v in [good, bad] {
            let ctx = Arc::clone(&ctx);
            set.spawn(async move {
                match AssertUnwindSafe(v.validate(&ctx)).catch_unwind().await {
                    Ok(r) => r,
                    Err(payload) => ValidatorResult::errored(v.id(), v.description(), &panic_message(&*payload)),
                }
            });
        }
        let mut results = Vec::new();
        while let Some(r) = set.join_next().await {
            results.push(r.unwrap());
        }
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.passed));
        assert!(results.iter().any(|r| r.validator_id == "panicky"));
    }
}
