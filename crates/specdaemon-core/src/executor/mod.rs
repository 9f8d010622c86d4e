//! C3 Executor: resolve a task type to a command line (spec.md §4.3),
//! spawn it with merged/unbuffered pipes and process-group control, and
//! tee its stdout line-by-line to update liveness.
//!
//! Spawn/kill/timeout idiom adapted from
//! `gator-core/src/invariant/runner.rs::run_invariant` (concurrent
//! stdout/stderr drain via `tokio::join!`, `tokio::time::timeout`); the
//! JSONL "agent event" parsing idiom (unused here directly, since
//! liveness only needs line arrival, not structured events) is adapted
//! from `gator-core/src/harness/claude_code.rs::parse_stream_json_line`.

pub mod registry;

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::debug;

use crate::config::DaemonConfig;
use crate::error::ExecutorError;
use crate::model::TaskType;

use registry::{AgentRegistry, ExecutionMode};

/// A fully-resolved command line, ready to spawn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandPlan {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

const DEFAULT_PIPELINE_SCRIPT: &str = ".auto-claude/run.py";

/// Resolve a task's command line per the four-step rule in spec.md §4.3.
pub fn resolve_command(
    task_type: TaskType,
    spec_id: &str,
    project_dir: &Path,
    registry: &AgentRegistry,
    cfg: &DaemonConfig,
) -> Result<CommandPlan, ExecutorError> {
    if let Some(entry) = registry.get(task_type) {
        // 1. Registry entry with an explicit script.
        if let Some(script) = &entry.script_path {
            let mut args = vec![
                "--spec".to_string(),
                spec_id.to_string(),
                "--project-dir".to_string(),
                project_dir.display().to_string(),
            ];
            args.extend(entry.extra_args.clone());
            return Ok(CommandPlan {
                program: script.display().to_string(),
                args,
                env: unbuffered_env(),
            });
        }
        // 2. Registry entry forcing external CLI.
        if entry.use_external_cli {
            let mode = entry.execution_mode.unwrap_or(ExecutionMode::Headless);
            return Ok(build_external_cli_command(cfg, spec_id, project_dir, mode));
        }
    }

    // 3. Unregistered task type whose natural mode is "plan".
    if registry.get(task_type).is_none() && task_type.is_plan_mode() {
        return Ok(build_external_cli_command(
            cfg,
            spec_id,
            project_dir,
            ExecutionMode::Plan,
        ));
    }

    // 4. Default pipeline script.
    if cfg.use_external_cli {
        return Ok(build_external_cli_command(
            cfg,
            spec_id,
            project_dir,
            ExecutionMode::Headless,
        ));
    }
    Ok(default_pipeline_command(spec_id, project_dir))
}

fn venv_python(project_dir: &Path) -> PathBuf {
    if cfg!(windows) {
        project_dir.join(".venv/Scripts/python.exe")
    } else {
        project_dir.join(".venv/bin/python")
    }
}

fn default_pipeline_command(spec_id: &str, project_dir: &Path) -> CommandPlan {
    CommandPlan {
        program: venv_python(project_dir).display().to_string(),
        args: vec![
            "-u".to_string(),
            project_dir.join(DEFAULT_PIPELINE_SCRIPT).display().to_string(),
            "--spec".to_string(),
            spec_id.to_string(),
            "--project-dir".to_string(),
            project_dir.display().to_string(),
            "--auto-continue".to_string(),
            "--force".to_string(),
        ],
        env: unbuffered_env(),
    }
}

/// Build an external-CLI invocation per the opaque boundary contract
/// resolved in SPEC_FULL.md §9(c): `<path> --spec-dir <dir> --mode
/// <plan|headless>`.
fn build_external_cli_command(
    cfg: &DaemonConfig,
    spec_id: &str,
    project_dir: &Path,
    mode: ExecutionMode,
) -> CommandPlan {
    let program = cfg
        .external_cli_path
        .clone()
        .unwrap_or_else(|| PathBuf::from("external-cli"));
    let mode_str = match mode {
        ExecutionMode::Plan => "plan",
        ExecutionMode::Headless => "headless",
    };
    CommandPlan {
        program: program.display().to_string(),
        args: vec![
            "--spec-dir".to_string(),
            project_dir
                .join(".auto-claude/specs")
                .join(spec_id)
                .display()
                .to_string(),
            "--mode".to_string(),
            mode_str.to_string(),
        ],
        env: unbuffered_env(),
    }
}

fn unbuffered_env() -> Vec<(String, String)> {
    vec![("PYTHONUNBUFFERED".to_string(), "1".to_string())]
}

/// Replace `{spec_id}`, `{task}`, `{spec_content}` in a prompt template
/// using literal `str::replace` (not `format!`) so braces appearing in
/// the spec body are left untouched (spec.md §4.3).
pub fn substitute_prompt_template(template: &str, spec_id: &str, task: &str, spec_content: &str) -> String {
    template
        .replace("{spec_id}", spec_id)
        .replace("{task}", task)
        .replace("{spec_content}", spec_content)
}

/// Spawn `plan` with merged stdout/stderr, closed stdin, and group
/// creation for reliable tree-kill (spec.md §4.3 Spawn, §5 "Process tree
/// safety").
pub fn spawn(plan: &CommandPlan, working_dir: &Path) -> Result<Child, ExecutorError> {
    let mut cmd = Command::new(&plan.program);
    cmd.args(&plan.args)
        .current_dir(working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .envs(plan.env.iter().cloned());

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        // New process group so the whole tree can be killed by group id
        // (executor::kill_tree below).
        unsafe {
            cmd.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }
    }
    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
        cmd.creation_flags(CREATE_NEW_PROCESS_GROUP);
    }

    cmd.spawn().map_err(|source| ExecutorError::Spawn {
        command: plan.program.clone(),
        source,
    })
}

/// Line-tee the child's stdout, invoking `on_line` for every line
/// (spec.md §4.4 Dispatch step 5: "blocking `readline`, not iterator
/// semantics, to avoid read-ahead buffering" — `tokio`'s `BufReader::
/// read_line` reads exactly one line per call with no hidden read-ahead,
/// satisfying the same requirement in async form). Returns the full
/// captured output for post-exit inspection.
pub async fn tee_stdout<F: FnMut(&str)>(
    stdout: tokio::process::ChildStdout,
    mut on_line: F,
) -> String {
    let mut reader = BufReader::new(stdout);
    let mut captured = String::new();
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {
                on_line(line.trim_end());
                captured.push_str(&line);
            }
            Err(e) => {
                debug!("stdout read error: {e}");
                break;
            }
        }
    }
    captured
}
