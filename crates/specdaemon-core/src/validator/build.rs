//! Build validator (spec.md §4.6 "Build validator"): reads
//! `lint_command`/`build_command`/`test_command` from `project_index.json`
//! and runs each with a 300s timeout. Lint and test are blocking; build is
//! informational since the browser validator starts its own dev server.
//!
//! Grounded on `original_source/.../qa/validators/build_validator.py`
//! (`_get_build_commands`, the blocking/non-blocking split, the 300s
//! timeout). Command execution reuses the spawn/timeout idiom from
//! `gator-core/src/invariant/runner.rs::run_invariant`.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;

use super::{Issue, ProjectCapabilities, ValidateCtx, Validator, ValidatorResult};

pub struct BuildValidator;

const TIMEOUT: Duration = Duration::from_secs(300);
const BLOCKING: &[&str] = &["lint", "test"];

#[derive(Debug, Default, Clone)]
struct BuildCommands {
    lint: Option<String>,
    build: Option<String>,
    test: Option<String>,
}

fn services_list(value: &Value) -> Vec<Value> {
    match value.get("services") {
        Some(Value::Object(map)) => map.values().cloned().collect(),
        Some(Value::Array(arr)) => arr.clone(),
        _ => Vec::new(),
    }
}

/// Read lint/build/test commands from `project_index.json` (spec.md §4.6;
/// handles both the dict-of-services and list-of-services shapes).
fn build_commands(project_dir: &Path) -> Option<BuildCommands> {
    let index_path = project_dir.join(".auto-claude/project_index.json");
    let value: Value = crate::state::persist::read_json(&index_path).ok()?;

    let mut commands = BuildCommands::default();
    for svc in services_list(&value) {
        let Some(obj) = svc.as_object() else { continue };
        if commands.lint.is_none() {
            commands.lint = obj.get("lint_command").and_then(Value::as_str).map(str::to_string);
        }
        if commands.build.is_none() {
            commands.build = obj.get("build_command").and_then(Value::as_str).map(str::to_string);
        }
        if commands.test.is_none() {
            commands.test = obj.get("test_command").and_then(Value::as_str).map(str::to_string);
        }
    }

    if commands.lint.is_none() && commands.build.is_none() && commands.test.is_none() {
        None
    } else {
        Some(commands)
    }
}

/// Run `cmd` as a shell command in `cwd`, capped at [`TIMEOUT`]. Returns
/// `(success, truncated_output)`.
async fn run_command(cmd: &str, cwd: &Path) -> (bool, String) {
    let shell_invocation = if cfg!(windows) {
        Command::new("cmd").args(["/C", cmd]).current_dir(cwd).output()
    } else {
        Command::new("sh").args(["-c", cmd]).current_dir(cwd).output()
    };

    match tokio::time::timeout(TIMEOUT, shell_invocation).await {
        Ok(Ok(output)) => {
            let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
            text.push_str(&String::from_utf8_lossy(&output.stderr));
            (output.status.success(), super::truncate(&text, 500))
        }
        Ok(Err(e)) => (false, e.to_string()),
        Err(_) => (false, format!("command timed out after {}s: {cmd}", TIMEOUT.as_secs())),
    }
}

#[async_trait]
impl Validator for BuildValidator {
    fn id(&self) -> &'static str {
        "build"
    }

    fn description(&self) -> &'static str {
        "Static analysis, compilation, and test validation"
    }

    fn is_applicable(&self, _capabilities: &ProjectCapabilities) -> bool {
        true
    }

    async fn validate(&self, ctx: &ValidateCtx) -> ValidatorResult {
        let mut report = vec!["## Build Validation\n".to_string()];

        let Some(commands) = build_commands(&ctx.project_dir) else {
            report.push("- No build system detected, skipping build validation\n".to_string());
            return ValidatorResult {
                validator_id: self.id().to_string(),
                passed: true,
                issues: Vec::new(),
                screenshots: Vec::new(),
                report_section: report.join("\n"),
                metadata: serde_json::json!({"skipped": true, "reason": "no build system detected"}),
            };
        };

        let mut issues = Vec::new();
        let mut ran = serde_json::Map::new();
        for (kind, cmd) in [("lint", &commands.lint), ("build", &commands.build), ("test", &commands.test)] {
            let Some(cmd) = cmd else { continue };
            let (success, output) = run_command(cmd, &ctx.project_dir).await;
            ran.insert(kind.to_string(), serde_json::json!({"success": success, "output": output}));
            if success {
                report.push(format!("- {kind}: PASSED\n"));
            } else {
                let blocking = BLOCKING.contains(&kind);
                report.push(format!(
                    "- {kind}: FAILED{}\n",
                    if blocking { "" } else { " (non-blocking)" }
                ));
                issues.push(Issue {
                    severity: if blocking { "major" } else { "minor" }.to_string(),
                    description: format!("{kind} command failed: {}", super::truncate(&output, 200)),
                    file: String::new(),
                    line: 0,
                });
            }
        }

        let ran_blocking = [("lint", &commands.lint), ("test", &commands.test)]
            .into_iter()
            .filter(|(_, c)| c.is_some())
            .collect::<Vec<_>>();
        let passed = ran_blocking.iter().all(|(kind, _)| {
            ran.get(*kind).and_then(|v| v.get("success")).and_then(Value::as_bool).unwrap_or(true)
        });

        ValidatorResult {
            validator_id: self.id().to_string(),
            passed,
            issues,
            screenshots: Vec::new(),
            report_section: report.join("\n"),
            metadata: Value::Object(ran),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_index(dir: &Path, services: Value) {
        std::fs::create_dir_all(dir.join(".auto-claude")).unwrap();
        std::fs::write(
            dir.join(".auto-claude/project_index.json"),
            serde_json::json!({"services": services}).to_string(),
        )
        .unwrap();
    }

    #[test]
    fn build_commands_reads_dict_shape_services() {
        let dir = tempdir().unwrap();
        write_index(dir.path(), serde_json::json!({"web": {"lint_command": "eslint .", "test_command": "npm test"}}));
        let commands = build_commands(dir.path()).unwrap();
        assert_eq!(commands.lint.as_deref(), Some("eslint ."));
        assert_eq!(commands.test.as_deref(), Some("npm test"));
        assert!(commands.build.is_none());
    }

    #[test]
    fn build_commands_reads_list_shape_services() {
        let dir = tempdir().unwrap();
        write_index(dir.path(), serde_json::json!([{"build_command": "cargo build"}]));
        let commands = build_commands(dir.path()).unwrap();
        assert_eq!(commands.build.as_deref(), Some("cargo build"));
    }

    #[test]
    fn no_project_index_yields_none() {
        let dir = tempdir().unwrap();
        assert!(build_commands(dir.path()).is_none());
    }

    #[tokio::test]
    async fn validate_skips_when_no_build_system_detected() {
        let dir = tempdir().unwrap();
        let ctx = ValidateCtx {
            project_dir: dir.path().to_path_buf(),
            spec_dir: dir.path().to_path_buf(),
            capabilities: ProjectCapabilities::default(),
        };
        let result = BuildValidator.validate(&ctx).await;
        assert!(result.passed);
        assert_eq!(result.metadata["skipped"], true);
    }

    #[tokio::test]
    async fn validate_blocks_on_failing_lint_but_not_on_failing_build() {
        let dir = tempdir().unwrap();
        write_index(
            dir.path(),
            serde_json::json!({"web": {"lint_command": "false", "build_command": "false"}}),
        );
        let ctx = ValidateCtx {
            project_dir: dir.path().to_path_buf(),
            spec_dir: dir.path().to_path_buf(),
            capabilities: ProjectCapabilities::default(),
        };
        let result = BuildValidator.validate(&ctx).await;
        assert!(!result.passed);
        assert!(result.issues.iter().any(|i| i.severity == "major"));
        assert!(result.issues.iter().any(|i| i.severity == "minor"));
    }
}
