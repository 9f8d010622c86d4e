//! Read/write helpers for a spec directory's `implementation_plan.json`
//! (spec.md §3, §5 "Shared-resource policy": written by multiple actors,
//! always through atomic temp-file-rename).

use std::path::Path;
use std::time::Duration;

use crate::error::PlanFileError;
use crate::model::PlanRecord;
use crate::state::persist::atomic_write_json;

pub const PLAN_FILE_NAME: &str = "implementation_plan.json";

pub fn plan_path(spec_dir: &Path) -> std::path::PathBuf {
    spec_dir.join(PLAN_FILE_NAME)
}

/// Read a spec directory's plan file, retrying once after ~100ms on a
/// transient I/O error (spec.md §7 "Transient I/O": Windows file-lock
/// window on plan read).
pub fn read_plan(spec_dir: &Path) -> Result<PlanRecord, PlanFileError> {
    let path = plan_path(spec_dir);
    if !path.exists() {
        return Err(PlanFileError::Missing(spec_dir.to_path_buf()));
    }
    match read_plan_once(&path) {
        Ok(plan) => Ok(plan),
        Err(_) => {
            std::thread::sleep(Duration::from_millis(100));
            read_plan_once(&path)
        }
    }
}

fn read_plan_once(path: &Path) -> Result<PlanRecord, PlanFileError> {
    let raw = std::fs::read(path).map_err(|source| PlanFileError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&raw).map_err(|source| PlanFileError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Write a spec directory's plan file atomically.
pub fn write_plan(spec_dir: &Path, plan: &PlanRecord) -> Result<(), PlanFileError> {
    let path = plan_path(spec_dir);
    atomic_write_json(&path, plan).map_err(|source| PlanFileError::Write { path, source })
}

/// Does `spec_dir` have a plan file at all? A spec directory without one
/// is invisible to scheduling (invariant I1).
pub fn is_schedulable(spec_dir: &Path) -> bool {
    plan_path(spec_dir).exists()
}
