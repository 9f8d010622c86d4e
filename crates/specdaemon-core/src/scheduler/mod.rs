//! C4 Scheduler / Daemon Core (spec.md §4.4): priority queue, dependency
//! gating, concurrency limit, lifecycle, stuck detection, auto-verify
//! chain, status publishing.
//!
//! The dispatch-loop/per-task `tokio::spawn` + `mpsc` result-funnel shape
//! is adapted from `gator-core/src/orchestrator/mod.rs::run_orchestrator`;
//! the per-task lifecycle sequencing (spawn -> transition -> collect
//! output -> evaluate) from `gator-core/src/lifecycle/mod.rs::
//! run_agent_lifecycle`; the allowed-transition bookkeeping from
//! `gator-core/src/state/mod.rs::TaskStateMachine`, re-expressed over a
//! plan file instead of a Postgres row.

pub mod queue;
pub mod recover;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering as AtomicOrdering};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, Notify, Semaphore};
use tokio::time::Instant as TokioInstant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::DaemonConfig;
use crate::executor::{self, registry::AgentRegistry};
use crate::model::{PlanStatus, TaskType};
use crate::planfile;
use crate::state::{StateStore, matcher};
use crate::status::StatusPublisher;

pub use queue::{QueuedTask, ReadyQueue};

/// Everything a running task's output-reader and the stuck-checker need
/// to share, guarded individually via atomics so neither blocks the
/// daemon lock.
struct RunningTaskHandle {
    spec_dir: PathBuf,
    task_type: TaskType,
    parent_task: Option<String>,
    pid: u32,
    started_at: chrono::DateTime<Utc>,
    last_update_epoch_ms: Arc<AtomicI64>,
    recovering: Arc<AtomicBool>,
}

fn now_epoch_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// The daemon core. Constructed once and shared (via `Arc`) across the
/// scheduler loop, stuck checker, and watcher callback — playing the role
/// of `DaemonContext` (SPEC_FULL.md §1 SUPPLEMENT).
pub struct DaemonCore {
    pub config: Arc<DaemonConfig>,
    pub state: Arc<StateStore>,
    pub registry: Arc<AgentRegistry>,
    pub status: Arc<StatusPublisher>,
    queue: Mutex<ReadyQueue>,
    running: Mutex<HashMap<String, RunningTaskHandle>>,
    semaphore: Arc<Semaphore>,
    ready_notify: Notify,
    /// Per-parent auto-verify sibling counts (spec.md §4.4 Auto-verify
    /// chain, cap 3).
    verify_counts: Mutex<HashMap<String, u32>>,
    cancel: CancellationToken,
}

impl DaemonCore {
    pub fn new(
        config: Arc<DaemonConfig>,
        state: Arc<StateStore>,
        registry: Arc<AgentRegistry>,
        status: Arc<StatusPublisher>,
    ) -> Arc<Self> {
        let max = config.max_concurrent_tasks;
        Arc::new(DaemonCore {
            config,
            state,
            registry,
            status,
            queue: Mutex::new(ReadyQueue::new()),
            running: Mutex::new(HashMap::new()),
            semaphore: Arc::new(Semaphore::new(max)),
            ready_notify: Notify::new(),
            verify_counts: Mutex::new(HashMap::new()),
            cancel: CancellationToken::new(),
        })
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn enqueue(&self, task: QueuedTask) {
        let mut q = self.queue.lock().await;
        q.push(task);
        self.ready_notify.notify_waiters();
    }

    pub async fn running_count(&self) -> usize {
        self.running.lock().await.len()
    }

    pub async fn queued_count(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Spec IDs currently queued, for the status file's `queued_tasks`.
    pub async fn queued_ids(&self) -> Vec<String> {
        self.queue.lock().await.iter().map(|t| t.spec_id.clone()).collect()
    }

    /// A snapshot of currently-running tasks, for the status file's
    /// `running_tasks` map.
    pub async fn running_snapshot(&self) -> HashMap<String, crate::status::TaskState> {
        self.running
            .lock()
            .await
            .iter()
            .map(|(id, h)| {
                let last_update = chrono::DateTime::from_timestamp_millis(
                    h.last_update_epoch_ms.load(AtomicOrdering::Relaxed),
                )
                .unwrap_or(h.started_at);
                (
                    id.clone(),
                    crate::status::TaskState {
                        spec_id: id.clone(),
                        task_type: h.task_type.as_str().to_string(),
                        started_at: h.started_at,
                        last_update,
                    },
                )
            })
            .collect()
    }

    /// Startup scan (spec.md §4.4 "Scanning and repair on startup"):
    /// walk every spec directory, queue tasks in a queue-class status,
    /// and record already-completed tasks into the completion set.
    pub async fn scan_and_enqueue(&self) -> anyhow::Result<()> {
        let specs_dir = self.config.specs_dir();
        if !specs_dir.exists() {
            return Ok(());
        }
        let mut entries = tokio::fs::read_dir(&specs_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let spec_dir = entry.path();
            if !spec_dir.is_dir() {
                continue;
            }
            let Some(spec_id) = spec_dir.file_name().and_then(|n| n.to_str()).map(str::to_string)
            else {
                continue;
            };
            if !planfile::is_schedulable(&spec_dir) {
                // I1: invisible to scheduling.
                continue;
            }
            let plan = match planfile::read_plan(&spec_dir) {
                Ok(p) => p,
                Err(e) => {
                    warn!(spec_id, "failed to read plan during startup scan: {e}");
                    continue;
                }
            };
            if plan.status.is_completed() {
                self.state.mark_completed(&spec_id).await?;
                continue;
            }
            if plan.status.is_queue_class() {
                self.enqueue(QueuedTask {
                    spec_id,
                    spec_dir,
                    priority: plan.priority,
                    task_type: plan.task_type,
                    depends_on: plan.depends_on,
                    parent_task: plan.parent_task,
                    queued_at: plan.created_at,
                })
                .await;
            }
        }
        Ok(())
    }

    /// The scheduler loop (spec.md §4.4): wait for a slot + a ready task,
    /// dispatch, repeat until `stop`.
    pub async fn run_scheduler_loop(self: &Arc<Self>) {
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = self.ready_notify.notified() => {}
                _ = tokio::time::sleep(Duration::from_secs(1)) => {}
            }

            if self.semaphore.available_permits() == 0 {
                continue;
            }

            // Snapshot the completion set once, outside the queue lock, so
            // `pop_ready`'s synchronous predicate can evaluate the §4.1
            // matcher against a fixed point-in-time view for every
            // candidate it considers (it must pick the first *ready* task
            // in priority order, not merely the first task overall).
            let completed = self.state.completed_snapshot().await;
            let picked = {
                let mut q = self.queue.lock().await;
                // Evict stale queue entries whose plan status became
                // completed or running externally (spec.md §4.4).
                self.evict_stale_locked(&mut q).await;

                q.pop_ready(|t| matcher::are_dependencies_met(&t.depends_on, &completed))
            };

            let Some(task) = picked else { continue };
            let permit = match Arc::clone(&self.semaphore).try_acquire_owned() {
                Ok(p) => p,
                Err(_) => {
                    self.enqueue(task).await;
                    continue;
                }
            };

            let this = Arc::clone(self);
            tokio::spawn(async move {
                let _permit = permit;
                this.dispatch(task).await;
                this.ready_notify.notify_waiters();
            });
        }
    }

    async fn evict_stale_locked(&self, q: &mut ReadyQueue) {
        let ids: Vec<String> = q.iter().map(|t| t.spec_id.clone()).collect();
        for id in ids {
            let Some(task) = q.iter().find(|t| t.spec_id == id) else {
                continue;
            };
            let plan = planfile::read_plan(&task.spec_dir);
            if let Ok(plan) = plan {
                if plan.status.is_completed() {
                    q.remove(&id);
                    let _ = self.state.mark_completed(&id).await;
                } else if plan.status == PlanStatus::InProgress && !self.is_running(&id).await {
                    // Completed/started by an external actor; drop from
                    // our queue, it is no longer ours to schedule.
                    q.remove(&id);
                }
            }
        }
    }

    async fn is_running(&self, spec_id: &str) -> bool {
        self.running.lock().await.contains_key(spec_id)
    }

    /// Dispatch (spec.md §4.4 "Dispatch", seven steps).
    async fn dispatch(self: &Arc<Self>, task: QueuedTask) {
        // 1. Re-read the plan file; skip if terminal/unexpected.
        let plan = match planfile::read_plan(&task.spec_dir) {
            Ok(p) => p,
            Err(e) => {
                warn!(spec_id = %task.spec_id, "dispatch: plan unreadable: {e}");
                return;
            }
        };
        if plan.status.is_completed() {
            let _ = self.state.mark_completed(&task.spec_id).await;
            return;
        }
        if !plan.status.is_queue_class() {
            debug!(spec_id = %task.spec_id, status = %plan.status, "dispatch: not in a queue-class status, skipping");
            return;
        }

        // `mcts` specs drive the in-process MCTS Orchestrator (C8) rather
        // than an external agent subprocess: the orchestrator generates its
        // own child specs (branches), which re-enter this very dispatch
        // loop as ordinary `impl`-typed tasks (spec.md §2 "MCTS Orchestrator
        // ... uses the daemon as its executor substrate").
        if task.task_type == TaskType::Mcts {
            self.dispatch_mcts(task, plan).await;
            return;
        }

        // `verify` specs run the in-process Validator Pipeline (C6)
        // directly rather than spawning an opaque agent subprocess: the
        // pipeline's build/browser/api/database checks are implemented in
        // this crate, and the auto-verify chain exists specifically to
        // invoke them.
        if task.task_type == TaskType::Verify {
            self.dispatch_verify(task, plan).await;
            return;
        }

        // 2 & 3. Build the command (execution mode is embedded in
        // resolution) and spawn.
        let command = match executor::resolve_command(
            task.task_type,
            &task.spec_id,
            &self.config.project_dir,
            &self.registry,
            &self.config,
        ) {
            Ok(c) => c,
            Err(e) => {
                self.fail_task(&task, &plan, &format!("spawn failure: {e}")).await;
                return;
            }
        };
        let mut child = match executor::spawn(&command, &task.spec_dir) {
            Ok(c) => c,
            Err(e) => {
                self.fail_task(&task, &plan, &format!("spawn failure: {e}")).await;
                return;
            }
        };
        let pid = child.id().unwrap_or(0);

        // 4. Record a TaskState and transition the plan to in_progress.
        let mut plan = plan;
        plan.status = PlanStatus::InProgress;
        plan.touch();
        if let Err(e) = planfile::write_plan(&task.spec_dir, &plan) {
            warn!(spec_id = %task.spec_id, "failed to persist in_progress transition: {e}");
        }
        self.status.mark_dirty();

        let last_update = Arc::new(AtomicI64::new(now_epoch_ms()));
        let recovering = Arc::new(AtomicBool::new(false));
        self.running.lock().await.insert(
            task.spec_id.clone(),
            RunningTaskHandle {
                spec_dir: task.spec_dir.clone(),
                task_type: task.task_type,
                parent_task: task.parent_task.clone(),
                pid,
                started_at: Utc::now(),
                last_update_epoch_ms: Arc::clone(&last_update),
                recovering: Arc::clone(&recovering),
            },
        );

        // 5. Per-task output reader, line-by-line, bumping last_update.
        let stdout = child.stdout.take();
        let tee_last_update = Arc::clone(&last_update);
        let tee_handle = stdout.map(|out| {
            tokio::spawn(async move {
                executor::tee_stdout(out, move |_line| {
                    tee_last_update.store(now_epoch_ms(), AtomicOrdering::Relaxed);
                })
                .await
            })
        });

        let exit_status = child.wait().await;
        if let Some(handle) = tee_handle {
            let _ = handle.await;
        }

        // Remove from the running map before evaluating the race guard so
        // the stuck-checker stops looking at it immediately.
        self.running.lock().await.remove(&task.spec_id);

        if recovering.load(AtomicOrdering::Relaxed) {
            // recover() already re-enqueued; nothing left to do here.
            return;
        }

        // 6. On exit, under the daemon lock (the per-spec plan file is
        // our serialization point; see module docs).
        match exit_status {
            Ok(status) if status.success() => {
                self.on_task_success(&task).await;
            }
            _ => {
                // Re-read so we don't clobber a `complete` status a
                // design task may have set for itself before a
                // non-zero-exit cleanup failure (spec.md §4.4 step 6).
                if let Ok(current) = planfile::read_plan(&task.spec_dir) {
                    if current.status.is_completed() {
                        let _ = self.state.mark_completed(&task.spec_id).await;
                        self.status.mark_dirty();
                        return;
                    }
                }
                self.mark_error(&task, "agent subprocess exited non-zero").await;
            }
        }
        self.status.mark_dirty();
    }

    /// Dispatch a `mcts`-typed spec: run the in-process MCTS Orchestrator
    /// (§4.8) to completion instead of spawning an external subprocess.
    /// Deliberately NOT registered in `self.running` — that map's entries
    /// are keyed by a killable OS pid (`recover`/`stop` signal the process
    /// group), and an in-process search has none; its own wall-time,
    /// iteration, and branch budgets (P8) bound its runtime instead of the
    /// stuck-detector.
    async fn dispatch_mcts(self: &Arc<Self>, task: QueuedTask, plan: crate::model::PlanRecord) {
        let mut plan = plan;
        plan.status = PlanStatus::InProgress;
        plan.touch();
        if let Err(e) = planfile::write_plan(&task.spec_dir, &plan) {
            warn!(spec_id = %task.spec_id, "failed to persist in_progress transition: {e}");
        }
        self.status.mark_dirty();

        let root_depth = self.state.depth_of(task.spec_id.clone()).await;
        let result = crate::mcts::run_mcts_search(&self.config, &task.spec_dir, root_depth, &self.cancel).await;

        match result {
            Ok(mcts_result) => {
                info!(spec_id = %task.spec_id, "mcts search finished: {}", mcts_result.summary);
                if let Ok(mut current) = planfile::read_plan(&task.spec_dir) {
                    current.status = PlanStatus::HumanReview;
                    current.context = serde_json::json!({
                        "mcts_best_node_id": mcts_result.best_node_id,
                        "mcts_best_score": mcts_result.best_score,
                        "mcts_iterations": mcts_result.iterations,
                        "mcts_branches": mcts_result.branches,
                        "mcts_summary": mcts_result.summary,
                    });
                    current.touch();
                    let _ = planfile::write_plan(&task.spec_dir, &current);
                }
                let _ = self.state.mark_completed(&task.spec_id).await;
            }
            Err(e) => {
                self.mark_error(&task, &format!("mcts search failed: {e}")).await;
            }
        }
        self.status.mark_dirty();
    }

    /// Dispatch a `verify` spec: run the Validator Pipeline (§4.6) against
    /// the project directly, persist `validator_results.json` and
    /// `qa_report.md`, and transition the plan on the aggregate verdict.
    /// Like `dispatch_mcts`, never registered in `self.running` — there is
    /// no child OS process to track or kill.
    async fn dispatch_verify(self: &Arc<Self>, task: QueuedTask, plan: crate::model::PlanRecord) {
        let mut plan = plan;
        plan.status = PlanStatus::InProgress;
        plan.touch();
        if let Err(e) = planfile::write_plan(&task.spec_dir, &plan) {
            warn!(spec_id = %task.spec_id, "failed to persist in_progress transition: {e}");
        }
        self.status.mark_dirty();

        let capabilities = crate::validator::detect_capabilities(&self.config.project_dir);
        let results =
            crate::validator::run_validators(&self.config.project_dir, &task.spec_dir, &capabilities).await;
        let passed = results.iter().all(|r| r.passed);

        if let Err(e) = crate::state::persist::atomic_write_json(&task.spec_dir.join("validator_results.json"), &results)
        {
            warn!(spec_id = %task.spec_id, "failed to persist validator_results.json: {e}");
        }
        if let Err(e) = std::fs::write(task.spec_dir.join("qa_report.md"), render_qa_report(&results, passed)) {
            warn!(spec_id = %task.spec_id, "failed to persist qa_report.md: {e}");
        }

        if let Ok(mut current) = planfile::read_plan(&task.spec_dir) {
            if passed {
                current.status = PlanStatus::HumanReview;
                current.touch();
                let _ = planfile::write_plan(&task.spec_dir, &current);
                let _ = self.state.mark_completed(&task.spec_id).await;
            } else {
                let summary = results
                    .iter()
                    .flat_map(|r| r.issues.iter())
                    .find(|i| i.severity == "major")
                    .map(|i| i.description.clone())
                    .unwrap_or_else(|| "validator pipeline reported a failure".to_string());
                current.status = PlanStatus::Error;
                current.last_error = Some(summary.clone());
                current.touch();
                let _ = planfile::write_plan(&task.spec_dir, &current);
                let _ = self.state.record_error(&task.spec_id, &summary).await;
            }
        }
        self.status.mark_dirty();
    }

    async fn on_task_success(self: &Arc<Self>, task: &QueuedTask) {
        // Re-read to respect whatever terminal status the agent itself
        // wrote (e.g. human_review); only force a status if still queue
        // class (defensive: agents are expected to self-transition).
        let mut plan = match planfile::read_plan(&task.spec_dir) {
            Ok(p) => p,
            Err(_) => return,
        };
        if plan.status.is_queue_class() || plan.status == PlanStatus::InProgress {
            plan.status = PlanStatus::HumanReview;
            plan.touch();
            let _ = planfile::write_plan(&task.spec_dir, &plan);
        }
        if plan.status.is_completed() || plan.status == PlanStatus::HumanReview {
            let _ = self.state.mark_completed(&task.spec_id).await;
        }

        if task.task_type.is_impl_like() {
            self.queue_auto_verify(task).await;
        } else if task.task_type == TaskType::ErrorCheck {
            if let Some(parent) = &task.parent_task {
                self.queue_auto_verify_for(parent, &task.spec_dir).await;
            }
        }
    }

    async fn fail_task(&self, task: &QueuedTask, plan: &crate::model::PlanRecord, reason: &str) {
        let mut plan = plan.clone();
        plan.status = PlanStatus::Error;
        plan.last_error = Some(reason.to_string());
        plan.touch();
        let _ = planfile::write_plan(&task.spec_dir, &plan);
        let _ = self.state.record_error(&task.spec_id, reason).await;
        self.status.mark_dirty();
    }

    async fn mark_error(&self, task: &QueuedTask, reason: &str) {
        if let Ok(mut plan) = planfile::read_plan(&task.spec_dir) {
            plan.status = PlanStatus::Error;
            plan.last_error = Some(reason.to_string());
            plan.touch();
            let _ = planfile::write_plan(&task.spec_dir, &plan);
        }
        let _ = self.state.record_error(&task.spec_id, reason).await;
    }

    /// Auto-verify chain (spec.md §4.4): synthesize `verify-<id>` (or
    /// `verify-<id>-N`), capped at `auto_verify_cap` siblings per parent.
    async fn queue_auto_verify(self: &Arc<Self>, task: &QueuedTask) {
        self.queue_auto_verify_for(&task.spec_id, &task.spec_dir).await;
    }

    async fn queue_auto_verify_for(self: &Arc<Self>, parent_id: &str, parent_dir: &Path) {
        let mut counts = self.verify_counts.lock().await;
        let count = counts.entry(parent_id.to_string()).or_insert(0);
        if *count >= self.config.auto_verify_cap {
            info!(parent_id, "auto-verify cap reached, not queueing another verify sibling");
            return;
        }
        *count += 1;
        let attempt = *count;
        drop(counts);

        let verify_id = if attempt == 1 {
            format!("verify-{parent_id}")
        } else {
            format!("verify-{parent_id}-{attempt}")
        };
        let specs_dir = match parent_dir.parent() {
            Some(p) => p.to_path_buf(),
            None => return,
        };
        let verify_dir = specs_dir.join(&verify_id);
        if let Err(e) = crate::spec_factory::create_verify_spec(&verify_dir, parent_id) {
            warn!(parent_id, "failed to create auto-verify spec: {e}");
            return;
        }
        let _ = self.state.add_child(parent_id, &verify_id).await;
        self.enqueue(QueuedTask {
            spec_id: verify_id,
            spec_dir: verify_dir,
            priority: crate::model::Priority::High,
            task_type: TaskType::Verify,
            depends_on: vec![parent_id.to_string()],
            parent_task: Some(parent_id.to_string()),
            queued_at: Utc::now(),
        })
        .await;
    }

    /// The periodic stuck checker (spec.md §4.4 "Stuck detection").
    pub async fn run_stuck_checker_loop(self: &Arc<Self>) {
        let interval = Duration::from_secs(self.config.check_interval_secs);
        let mut next = TokioInstant::now() + interval;
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep_until(next) => {}
            }
            next = TokioInstant::now() + interval;

            let stuck_timeout_ms = (self.config.stuck_timeout_secs * 1000) as i64;
            let now = now_epoch_ms();
            let stuck: Vec<(String, u32, PathBuf)> = {
                let running = self.running.lock().await;
                running
                    .iter()
                    .filter(|(_, h)| now - h.last_update_epoch_ms.load(AtomicOrdering::Relaxed) > stuck_timeout_ms)
                    .map(|(id, h)| (id.clone(), h.pid, h.spec_dir.clone()))
                    .collect()
            };
            for (spec_id, _pid, _dir) in stuck {
                self.recover(&spec_id).await;
            }
        }
    }

    /// Recover (spec.md §4.4, five steps).
    async fn recover(self: &Arc<Self>, spec_id: &str) {
        let count = match self.state.increment_recovery_count(spec_id).await {
            Ok(c) => c,
            Err(e) => {
                error!(spec_id, "failed to increment recovery count: {e}");
                return;
            }
        };

        let (pid, spec_dir, recovering) = {
            let running = self.running.lock().await;
            match running.get(spec_id) {
                Some(h) => (h.pid, h.spec_dir.clone(), Arc::clone(&h.recovering)),
                None => return, // already exited between scan and recover
            }
        };

        if count > self.config.max_recovery {
            recovering.store(true, AtomicOrdering::Relaxed);
            if let Ok(mut plan) = planfile::read_plan(&spec_dir) {
                plan.status = PlanStatus::Error;
                plan.last_error = Some("Max recovery".to_string());
                plan.touch();
                let _ = planfile::write_plan(&spec_dir, &plan);
            }
            let _ = self.state.record_error(spec_id, "Max recovery").await;
            recover::kill_process_tree(pid, Duration::from_secs(10)).await;
            self.running.lock().await.remove(spec_id);
            self.status.mark_dirty();
            return;
        }

        // 2. Race guard: the output-reader skips its post-exit logic.
        recovering.store(true, AtomicOrdering::Relaxed);

        // 3. Kill the process tree.
        recover::kill_process_tree(pid, Duration::from_secs(10)).await;

        // 4. Bounded cleanup wait, interruptible by stop.
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = tokio::time::sleep(Duration::from_millis(500)) => {}
        }
        self.running.lock().await.remove(spec_id);

        // 5. Reset the plan to queue and re-enqueue.
        if let Ok(mut plan) = planfile::read_plan(&spec_dir) {
            plan.status = PlanStatus::Queue;
            plan.touch();
            if planfile::write_plan(&spec_dir, &plan).is_ok() {
                self.enqueue(QueuedTask {
                    spec_id: spec_id.to_string(),
                    spec_dir,
                    priority: plan.priority,
                    task_type: plan.task_type,
                    depends_on: plan.depends_on,
                    parent_task: plan.parent_task,
                    queued_at: Utc::now(),
                })
                .await;
            }
        }
        self.status.mark_dirty();
    }

    /// Cooperative shutdown (spec.md §5 "Cancellation"): flip the stop
    /// flag, wake the queue, kill all running trees.
    pub async fn stop(&self) {
        self.cancel.cancel();
        self.ready_notify.notify_waiters();
        let running: Vec<u32> = self.running.lock().await.values().map(|h| h.pid).collect();
        for pid in running {
            recover::kill_process_tree(pid, Duration::from_secs(5)).await;
        }
    }
}

/// Render `qa_report.md` from validator results (spec.md §4.10 reads this
/// back via `parse_qa_approval`'s "approved"/"not approved" heuristic, so
/// the overall verdict line must say one or the other plainly).
fn render_qa_report(results: &[crate::validator::ValidatorResult], passed: bool) -> String {
    let mut out = String::from("# QA Report\n\n");
    out.push_str(if passed {
        "Status: approved\n\n"
    } else {
        "Status: not approved\n\n"
    });
    for result in results {
        out.push_str(&result.report_section);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PlanRecord, Priority};
    use tempfile::tempdir;

    fn test_config(project_dir: &Path) -> Arc<DaemonConfig> {
        Arc::new(
            DaemonConfig::resolve(crate::config::CliOverrides {
                project_dir: Some(project_dir.to_path_buf()),
                ..Default::default()
            })
            .unwrap(),
        )
    }

    async fn test_core(project_dir: &Path) -> Arc<DaemonCore> {
        let config = test_config(project_dir);
        let state = Arc::new(StateStore::load(config.daemon_state_path()).unwrap());
        let registry = Arc::new(AgentRegistry::new());
        let status = Arc::new(StatusPublisher::new(config.status_file.clone()));
        DaemonCore::new(config, state, registry, status)
    }

    #[tokio::test]
    async fn scan_and_enqueue_skips_specs_without_plan_file() {
        let dir = tempdir().unwrap();
        let specs = dir.path().join(".auto-claude/specs");
        std::fs::create_dir_all(specs.join("001-no-plan")).unwrap();
        let core = test_core(dir.path()).await;
        core.scan_and_enqueue().await.unwrap();
        assert_eq!(core.queued_count().await, 0);
    }

    #[tokio::test]
    async fn scan_and_enqueue_records_completed_and_queues_ready() {
        let dir = tempdir().unwrap();
        let specs = dir.path().join(".auto-claude/specs");
        let done_dir = specs.join("001-done");
        let queued_dir = specs.join("002-queued");
        std::fs::create_dir_all(&done_dir).unwrap();
        std::fs::create_dir_all(&queued_dir).unwrap();

        let mut done_plan = PlanRecord::new(TaskType::Impl, Priority::Normal, None);
        done_plan.status = PlanStatus::Complete;
        planfile::write_plan(&done_dir, &done_plan).unwrap();

        let queued_plan = PlanRecord::new(TaskType::Impl, Priority::Normal, None);
        planfile::write_plan(&queued_dir, &queued_plan).unwrap();

        let core = test_core(dir.path()).await;
        core.scan_and_enqueue().await.unwrap();
        assert!(core.state.is_completed("001-done").await);
        assert_eq!(core.queued_count().await, 1);
    }

    #[tokio::test]
    async fn dispatch_runs_true_and_marks_human_review() {
        let dir = tempdir().unwrap();
        let specs = dir.path().join(".auto-claude/specs");
        let spec_dir = specs.join("001-a");
        std::fs::create_dir_all(&spec_dir).unwrap();
        let plan = PlanRecord::new(TaskType::Impl, Priority::Normal, None);
        planfile::write_plan(&spec_dir, &plan).unwrap();

        let mut registry = AgentRegistry::new();
        registry.register(
            TaskType::Impl,
            crate::executor::registry::AgentRegistryEntry {
                script_path: Some(PathBuf::from("true")),
                ..Default::default()
            },
        );
        let config = test_config(dir.path());
        let state = Arc::new(StateStore::load(config.daemon_state_path()).unwrap());
        let status = Arc::new(StatusPublisher::new(config.status_file.clone()));
        let core = DaemonCore::new(config, state, Arc::new(registry), status);

        core.dispatch(QueuedTask {
            spec_id: "001-a".to_string(),
            spec_dir: spec_dir.clone(),
            priority: Priority::Normal,
            task_type: TaskType::Impl,
            depends_on: vec![],
            parent_task: None,
            queued_at: Utc::now(),
        })
        .await;

        let after = planfile::read_plan(&spec_dir).unwrap();
        assert_eq!(after.status, PlanStatus::HumanReview);
        assert!(core.state.is_completed("001-a").await);
        // impl-like success must synthesize a verify sibling.
        assert!(specs.join("verify-001-a").exists());
    }

    #[tokio::test]
    async fn dispatch_runs_mcts_tasks_in_process_instead_of_spawning() {
        let dir = tempdir().unwrap();
        let specs = dir.path().join(".auto-claude/specs");
        let spec_dir = specs.join("001-search");
        std::fs::create_dir_all(&spec_dir).unwrap();
        std::fs::write(spec_dir.join("spec.md"), "# search task").unwrap();
        let plan = PlanRecord::new(TaskType::Mcts, Priority::Normal, None);
        planfile::write_plan(&spec_dir, &plan).unwrap();

        // No registry entry and no external-cli binary on PATH: a
        // non-mcts dispatch would hit a spawn failure. The mcts branch
        // never calls the executor at all, so this still completes.
        let core = test_core(dir.path()).await;

        core.dispatch(QueuedTask {
            spec_id: "001-search".to_string(),
            spec_dir: spec_dir.clone(),
            priority: Priority::Normal,
            task_type: TaskType::Mcts,
            depends_on: vec![],
            parent_task: None,
            queued_at: Utc::now(),
        })
        .await;

        let after = planfile::read_plan(&spec_dir).unwrap();
        assert_eq!(after.status, PlanStatus::HumanReview);
        assert!(after.context.get("mcts_summary").is_some());
        assert!(core.state.is_completed("001-search").await);
        // The in-process search has no OS pid to track; it must not be
        // left dangling in the running map after dispatch returns.
        assert_eq!(core.running_count().await, 0);
    }

    #[tokio::test]
    async fn dispatch_runs_verify_tasks_through_the_validator_pipeline() {
        let dir = tempdir().unwrap();
        let specs = dir.path().join(".auto-claude/specs");
        let spec_dir = specs.join("verify-001-a");
        std::fs::create_dir_all(&spec_dir).unwrap();
        let plan = PlanRecord::new(TaskType::Verify, Priority::Normal, Some("001-a".to_string()));
        planfile::write_plan(&spec_dir, &plan).unwrap();

        // No project_index.json: the build validator has nothing to run
        // and reports passed=true; no other validator is applicable
        // without detected capabilities, so the pipeline trivially passes.
        let core = test_core(dir.path()).await;

        core.dispatch(QueuedTask {
            spec_id: "verify-001-a".to_string(),
            spec_dir: spec_dir.clone(),
            priority: Priority::Normal,
            task_type: TaskType::Verify,
            depends_on: vec![],
            parent_task: Some("001-a".to_string()),
            queued_at: Utc::now(),
        })
        .await;

        let after = planfile::read_plan(&spec_dir).unwrap();
        assert_eq!(after.status, PlanStatus::HumanReview);
        assert!(core.state.is_completed("verify-001-a").await);
        assert!(spec_dir.join("validator_results.json").exists());
        let report = std::fs::read_to_string(spec_dir.join("qa_report.md")).unwrap();
        assert!(report.contains("Status: approved"));
        assert_eq!(core.running_count().await, 0);
    }

    #[tokio::test]
    async fn scheduler_loop_skips_a_higher_priority_task_whose_dependency_is_unmet() {
        let dir = tempdir().unwrap();
        let specs = dir.path().join(".auto-claude/specs");
        let blocked_dir = specs.join("001-urgent-blocked");
        let ready_dir = specs.join("002-normal-ready");
        std::fs::create_dir_all(&blocked_dir).unwrap();
        std::fs::create_dir_all(&ready_dir).unwrap();
        planfile::write_plan(&blocked_dir, &PlanRecord::new(TaskType::Impl, Priority::Critical, None))
            .unwrap();
        planfile::write_plan(&ready_dir, &PlanRecord::new(TaskType::Impl, Priority::Normal, None)).unwrap();

        let mut registry = AgentRegistry::new();
        registry.register(
            TaskType::Impl,
            crate::executor::registry::AgentRegistryEntry {
                script_path: Some(PathBuf::from("true")),
                ..Default::default()
            },
        );
        let config = test_config(dir.path());
        let state = Arc::new(StateStore::load(config.daemon_state_path()).unwrap());
        let status = Arc::new(StatusPublisher::new(config.status_file.clone()));
        let core = DaemonCore::new(config, state, Arc::new(registry), status);

        // Priority::Critical sorts ahead of Priority::Normal, but its
        // dependency never resolves: P2/I3 require the scheduler to skip
        // it and dispatch the lower-priority, dependency-satisfied task
        // instead of blocking the whole queue on the unready head.
        core.enqueue(QueuedTask {
            spec_id: "001-urgent-blocked".to_string(),
            spec_dir: blocked_dir.clone(),
            priority: Priority::Critical,
            task_type: TaskType::Impl,
            depends_on: vec!["never-completes".to_string()],
            parent_task: None,
            queued_at: Utc::now(),
        })
        .await;
        core.enqueue(QueuedTask {
            spec_id: "002-normal-ready".to_string(),
            spec_dir: ready_dir.clone(),
            priority: Priority::Normal,
            task_type: TaskType::Impl,
            depends_on: vec![],
            parent_task: None,
            queued_at: Utc::now(),
        })
        .await;

        let loop_core = Arc::clone(&core);
        let handle = tokio::spawn(async move { loop_core.run_scheduler_loop().await });

        let deadline = TokioInstant::now() + Duration::from_secs(5);
        while TokioInstant::now() < deadline && !core.state.is_completed("002-normal-ready").await {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        core.cancel.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;

        assert!(core.state.is_completed("002-normal-ready").await);
        assert!(!core.state.is_completed("001-urgent-blocked").await);
        assert_eq!(core.queued_count().await, 1);
        let still_blocked = planfile::read_plan(&blocked_dir).unwrap();
        assert!(!still_blocked.status.is_completed());
    }
}
