//! Daemon configuration: CLI flag > environment variable > hardcoded
//! default, in the shape of the teacher's `GatorConfig::resolve` chain
//! (`gator-cli/src/config.rs`), but without a config-file layer since
//! spec.md §6 defines only a CLI-flag and environment-variable surface.

use std::path::PathBuf;

/// Tuning knobs for the daemon core, resolved once at startup and then
/// threaded immutably through every component via [`crate::DaemonContext`].
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub project_dir: PathBuf,
    pub max_concurrent_tasks: usize,
    pub stuck_timeout_secs: u64,
    pub check_interval_secs: u64,
    pub max_recovery: u32,
    pub status_file: PathBuf,
    pub pid_file: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
    pub use_worktrees: bool,
    pub headless: bool,
    pub use_external_cli: bool,
    pub external_cli_path: Option<PathBuf>,

    /// Watcher debounce window (spec.md §4.2, default 2s).
    pub watcher_debounce_secs: u64,
    /// Max entries in the watcher's debounce map before pruning
    /// (spec.md §4.2, fixed at 500 — not independently configurable
    /// since no CLI flag or env var names it).
    pub watcher_debounce_prune_at: usize,

    /// Auto-verify sibling cap per parent (spec.md §4.4, §9 Open
    /// Question (b): configurable, default 3).
    pub auto_verify_cap: u32,

    /// `MAX_CHILD_DEPTH_OVERRIDE` (spec.md §6, default 2).
    pub max_child_depth: u32,

    pub mcts: MctsConfig,
}

/// MCTS-specific tuning (spec.md §4.7, §4.8).
#[derive(Debug, Clone)]
pub struct MctsConfig {
    /// UCB1 exploration constant `C` (default √2).
    pub exploration_constant: f64,
    /// Cost-penalty exponent `w` (default -0.07).
    pub cost_penalty_weight: f64,
    /// Accept threshold (§9 Open Question (b): configurable, default 0.7).
    pub accept_threshold: f64,
    /// Convergence delta (default 0.02).
    pub convergence_threshold: f64,
    /// Number of diverse ideas requested on the first expand round
    /// (default 4).
    pub initial_ideas: usize,
    pub max_wall_seconds: u64,
    pub max_iterations: u32,
    pub max_branches: u32,
    /// Simulate poll interval (default 30s).
    pub poll_interval_secs: u64,
    /// Simulate per-round cap (default 30 min).
    pub simulate_cap_secs: u64,
}

impl Default for MctsConfig {
    fn default() -> Self {
        MctsConfig {
            exploration_constant: std::f64::consts::SQRT_2,
            cost_penalty_weight: -0.07,
            accept_threshold: 0.7,
            convergence_threshold: 0.02,
            initial_ideas: 4,
            max_wall_seconds: 3600,
            max_iterations: 20,
            max_branches: 32,
            poll_interval_secs: 30,
            simulate_cap_secs: 30 * 60,
        }
    }
}

/// Raw CLI flags as parsed by `specdaemon-cli`, passed in here so the
/// resolve chain stays testable without depending on `clap`.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub project_dir: Option<PathBuf>,
    pub max_concurrent: Option<usize>,
    pub stuck_timeout: Option<u64>,
    pub check_interval: Option<u64>,
    pub max_recovery: Option<u32>,
    pub status_file: Option<PathBuf>,
    pub pid_file: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
    pub use_worktrees: bool,
    pub headless: Option<bool>,
    pub use_external_cli: bool,
    pub external_cli_path: Option<PathBuf>,
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

impl DaemonConfig {
    /// CLI flag > environment variable > hardcoded default, field by
    /// field, mirroring `GatorConfig::resolve`.
    pub fn resolve(cli: CliOverrides) -> anyhow::Result<Self> {
        let project_dir = cli
            .project_dir
            .or_else(|| env_parsed::<PathBuf>("SPECDAEMON_PROJECT_DIR"))
            .ok_or_else(|| anyhow::anyhow!("--project-dir is required"))?;

        let max_child_depth = env_parsed::<u32>("MAX_CHILD_DEPTH_OVERRIDE").unwrap_or(2);

        let status_file = cli.status_file.unwrap_or_else(|| {
            project_dir.join(".auto-claude/specs/.daemon_status.json")
        });

        Ok(DaemonConfig {
            max_concurrent_tasks: cli
                .max_concurrent
                .or_else(|| env_parsed("SPECDAEMON_MAX_CONCURRENT"))
                .unwrap_or(4),
            stuck_timeout_secs: cli
                .stuck_timeout
                .or_else(|| env_parsed("SPECDAEMON_STUCK_TIMEOUT"))
                .unwrap_or(600),
            check_interval_secs: cli
                .check_interval
                .or_else(|| env_parsed("SPECDAEMON_CHECK_INTERVAL"))
                .unwrap_or(30),
            max_recovery: cli
                .max_recovery
                .or_else(|| env_parsed("SPECDAEMON_MAX_RECOVERY"))
                .unwrap_or(3),
            status_file,
            pid_file: cli.pid_file,
            log_file: cli.log_file,
            use_worktrees: cli.use_worktrees,
            headless: cli.headless.unwrap_or(true),
            use_external_cli: cli.use_external_cli,
            external_cli_path: cli.external_cli_path,
            watcher_debounce_secs: 2,
            watcher_debounce_prune_at: 500,
            auto_verify_cap: 3,
            max_child_depth,
            mcts: MctsConfig::default(),
            project_dir,
        })
    }

    pub fn specs_dir(&self) -> PathBuf {
        self.project_dir.join(".auto-claude/specs")
    }

    pub fn daemon_state_path(&self) -> PathBuf {
        self.specs_dir().join(".daemon_state.json")
    }

    pub fn project_index_path(&self) -> PathBuf {
        self.project_dir.join(".auto-claude/project_index.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_fails_without_project_dir() {
        // SAFETY: test runs single-threaded w.r.t. this env var; no other
        // test in this module touches it.
        unsafe {
            std::env::remove_var("SPECDAEMON_PROJECT_DIR");
        }
        let err = DaemonConfig::resolve(CliOverrides::default()).unwrap_err();
        assert!(err.to_string().contains("--project-dir"));
    }

    #[test]
    fn resolve_applies_defaults() {
        let cfg = DaemonConfig::resolve(CliOverrides {
            project_dir: Some(PathBuf::from("/tmp/proj")),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(cfg.max_concurrent_tasks, 4);
        assert_eq!(cfg.stuck_timeout_secs, 600);
        assert_eq!(cfg.max_child_depth, 2);
        assert_eq!(cfg.auto_verify_cap, 3);
    }

    #[test]
    fn cli_override_wins_over_default() {
        let cfg = DaemonConfig::resolve(CliOverrides {
            project_dir: Some(PathBuf::from("/tmp/proj")),
            max_concurrent: Some(9),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(cfg.max_concurrent_tasks, 9);
    }
}
