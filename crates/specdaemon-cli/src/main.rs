//! `specdaemon`: the task-daemon launcher (spec.md §6). A thin binary —
//! parse flags, build a [`specdaemon_core::DaemonContext`], and run the
//! watcher/scheduler/stuck-checker/status loops until interrupted.
//!
//! Modeled on `gator-cli/src/main.rs`'s `#[tokio::main]` shape (clap
//! derive, `tracing_subscriber::fmt` with an `EnvFilter`, anyhow at the
//! top level), reduced to a single command since this CLI's surface is
//! the daemon launcher contract, not a rich operator command suite.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use specdaemon_core::config::CliOverrides;
use specdaemon_core::executor::registry::AgentRegistry;
use specdaemon_core::status::{StatusStats, StatusSnapshot};
use specdaemon_core::watcher::SpecWatcher;
use specdaemon_core::DaemonContext;

#[derive(Parser)]
#[command(name = "specdaemon", about = "Watches a spec directory and dispatches agent subprocesses")]
struct Cli {
    /// Project root containing `.auto-claude/specs/`.
    #[arg(long)]
    project_dir: PathBuf,
    /// Maximum concurrently running tasks.
    #[arg(long)]
    max_concurrent: Option<usize>,
    /// Seconds of silence before a running task is considered stuck.
    #[arg(long)]
    stuck_timeout: Option<u64>,
    /// Seconds between stuck-checker sweeps.
    #[arg(long)]
    check_interval: Option<u64>,
    /// Recovery attempts before a stuck task is marked terminal `error`.
    #[arg(long)]
    max_recovery: Option<u32>,
    /// Status file path (default `<project_dir>/.auto-claude/specs/.daemon_status.json`).
    #[arg(long)]
    status_file: Option<PathBuf>,
    /// Write the daemon's PID to this file on startup.
    #[arg(long)]
    pid_file: Option<PathBuf>,
    /// Also log to this file in addition to stderr.
    #[arg(long)]
    log_file: Option<PathBuf>,
    /// Run impl-class tasks in an isolated git worktree.
    #[arg(long)]
    use_worktrees: bool,
    /// Run the browser validator headless.
    #[arg(long, conflicts_with = "no_headless")]
    headless: bool,
    /// Run the browser validator headed.
    #[arg(long)]
    no_headless: bool,
    /// Dispatch unregistered task types through the external CLI runner
    /// instead of the default pipeline script.
    #[arg(long)]
    use_external_cli: bool,
    /// Path to the external agent-runner executable.
    #[arg(long)]
    external_cli_path: Option<PathBuf>,
}

impl Cli {
    fn into_overrides(self) -> CliOverrides {
        CliOverrides {
            project_dir: Some(self.project_dir),
            max_concurrent: self.max_concurrent,
            stuck_timeout: self.stuck_timeout,
            check_interval: self.check_interval,
            max_recovery: self.max_recovery,
            status_file: self.status_file,
            pid_file: self.pid_file,
            log_file: self.log_file,
            use_worktrees: self.use_worktrees,
            headless: if self.no_headless {
                Some(false)
            } else if self.headless {
                Some(true)
            } else {
                None
            },
            use_external_cli: self.use_external_cli,
            external_cli_path: self.external_cli_path,
        }
    }
}

fn init_logging(log_file: Option<&PathBuf>) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
            tracing_subscriber::fmt().with_env_filter(filter).with_writer(file).with_ansi(false).init();
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
    Ok(())
}

fn write_pid_file(path: &PathBuf) -> anyhow::Result<()> {
    std::fs::write(path, std::process::id().to_string())?;
    Ok(())
}

async fn build_heartbeat_snapshot(ctx: &HeartbeatCtx, ws_port: Option<u16>) -> StatusSnapshot {
    let core = &ctx.core;
    StatusSnapshot {
        project_dir: ctx.config.project_dir.clone(),
        running: true,
        started_at: ctx.status.started_at(),
        config: serde_json::json!({
            "max_concurrent_tasks": ctx.config.max_concurrent_tasks,
            "stuck_timeout_secs": ctx.config.stuck_timeout_secs,
            "check_interval_secs": ctx.config.check_interval_secs,
            "max_recovery": ctx.config.max_recovery,
            "use_worktrees": ctx.config.use_worktrees,
            "headless": ctx.config.headless,
        }),
        running_tasks: core.running_snapshot().await,
        queued_tasks: core.queued_ids().await,
        stats: StatusStats {
            running: core.running_count().await,
            queued: core.queued_count().await,
            completed: ctx.state.completed_count().await,
        },
        timestamp: chrono::Utc::now(),
        ws_port,
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    init_logging(cli.log_file.as_ref())?;

    if let Some(pid_file) = &cli.pid_file {
        write_pid_file(pid_file)?;
    }

    let pid_file = cli.pid_file.clone();
    let config = specdaemon_core::config::DaemonConfig::resolve(cli.into_overrides())?;
    let ctx = DaemonContext::build(config, AgentRegistry::new())?;

    std::fs::create_dir_all(ctx.config.specs_dir())?;
    ctx.core.scan_and_enqueue().await?;

    let cancel = ctx.core.cancellation_token();

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let watcher = SpecWatcher::start(
        &ctx.config.specs_dir(),
        std::time::Duration::from_secs(ctx.config.watcher_debounce_secs),
        ctx.config.watcher_debounce_prune_at,
        tx,
    )?;

    let watcher_core = Arc::clone(&ctx.core);
    let watcher_cancel = cancel.clone();
    let watcher_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = watcher_cancel.cancelled() => break,
                event = rx.recv() => {
                    let Some(changed) = event else { break };
                    tracing::debug!(spec_id = %changed.spec_id, "spec change observed, rescanning");
                    if let Err(e) = watcher_core.scan_and_enqueue().await {
                        tracing::warn!("rescan after spec change failed: {e}");
                    }
                }
            }
        }
    });

    let (listener, ws_port) = match specdaemon_core::status::server::bind_first_free().await {
        Some((listener, port)) => (Some(listener), Some(port)),
        None => {
            tracing::warn!("no free port in 18800..18810, push channel disabled");
            (None, None)
        }
    };

    let server_cancel = cancel.clone();
    let server_task = listener.map(|listener| {
        let router = specdaemon_core::status::server::router(Arc::clone(&ctx.status));
        tokio::spawn(async move {
            let _ = axum::serve(listener, router)
                .with_graceful_shutdown(async move { server_cancel.cancelled().await })
                .await;
        })
    });

    let heartbeat_ctx = ctx_for_heartbeat(&ctx);
    let heartbeat_cancel = cancel.clone();
    let heartbeat_status = Arc::clone(&ctx.status);
    let heartbeat_task = tokio::spawn(async move {
        heartbeat_status
            .run_heartbeat(heartbeat_cancel, || build_heartbeat_snapshot(&heartbeat_ctx, ws_port))
            .await;
    });

    let scheduler_core = Arc::clone(&ctx.core);
    let scheduler_task = tokio::spawn(async move { scheduler_core.run_scheduler_loop().await });

    let stuck_core = Arc::clone(&ctx.core);
    let stuck_task = tokio::spawn(async move { stuck_core.run_stuck_checker_loop().await });

    wait_for_shutdown_signal(&cancel).await;

    ctx.core.stop().await;
    watcher.stop();
    let _ = scheduler_task.await;
    let _ = stuck_task.await;
    let _ = watcher_task.await;
    let _ = heartbeat_task.await;
    if let Some(server_task) = server_task {
        let _ = server_task.await;
    }

    if let Some(pid_file) = pid_file {
        let _ = std::fs::remove_file(pid_file);
    }

    Ok(())
}

/// `DaemonContext` doesn't implement `Clone`; wrap the handful of `Arc`
/// fields the heartbeat task needs to move into its own `tokio::spawn`.
fn ctx_for_heartbeat(ctx: &DaemonContext) -> Arc<HeartbeatCtx> {
    Arc::new(HeartbeatCtx {
        config: Arc::clone(&ctx.config),
        state: Arc::clone(&ctx.state),
        status: Arc::clone(&ctx.status),
        core: Arc::clone(&ctx.core),
    })
}

struct HeartbeatCtx {
    config: Arc<specdaemon_core::config::DaemonConfig>,
    state: Arc<specdaemon_core::state::StateStore>,
    status: Arc<specdaemon_core::status::StatusPublisher>,
    core: Arc<specdaemon_core::scheduler::DaemonCore>,
}

async fn wait_for_shutdown_signal(cancel: &CancellationToken) {
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received interrupt, shutting down");
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("specdaemon: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
