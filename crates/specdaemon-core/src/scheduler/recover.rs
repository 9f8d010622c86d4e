//! Process-tree kill sequence (spec.md §4.4 Recover step 3, §5 "Process
//! tree safety"): SIGTERM the group, wait, then SIGKILL. Adapted from the
//! teacher's worktree/invariant subprocess-management idiom, generalized
//! to whole process groups since tasks are spawned via `setsid` (see
//! `executor::spawn`).

use std::time::Duration;

use tracing::warn;

/// Kill the process group rooted at `pid` (which, since the child calls
/// `setsid()`, is also its own process group id). On Unix: SIGTERM, wait
/// up to `grace`, then SIGKILL if still alive. On Windows: `taskkill /F
/// /T /PID` terminates the whole tree in one step.
pub async fn kill_process_tree(pid: u32, grace: Duration) {
    #[cfg(unix)]
    {
        // SAFETY: `pid` was obtained from a `Child` we spawned with
        // `setsid()`, so `-(pid as i32)` is a valid process group id to
        // signal.
        unsafe {
            libc::kill(-(pid as i32), libc::SIGTERM);
        }
        tokio::time::sleep(grace).await;
        let still_alive = unsafe { libc::kill(pid as i32, 0) == 0 };
        if still_alive {
            warn!(pid, "process group survived SIGTERM, sending SIGKILL");
            unsafe {
                libc::kill(-(pid as i32), libc::SIGKILL);
            }
        }
    }
    #[cfg(windows)]
    {
        let _ = tokio::process::Command::new("taskkill")
            .args(["/F", "/T", "/PID", &pid.to_string()])
            .output()
            .await;
        let _ = grace;
    }
}
