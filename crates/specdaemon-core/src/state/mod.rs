//! C1 State Store: a durable, thread-safe JSON snapshot of the completion
//! set, recovery counters, error history, and parent→child hierarchy
//! (spec.md §4.1).
//!
//! Guarded by a single `tokio::sync::Mutex`, playing the role of the
//! "daemon lock" for state-store mutations (spec.md §5); every mutation
//! immediately persists via [`persist::atomic_write_json`], matching the
//! teacher's state-machine idiom (`gator-core/src/state/mod.rs`) but
//! re-expressed over a flat file instead of a Postgres row.

pub mod matcher;
pub mod persist;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::StateStoreError;
use crate::model::DaemonStateFile;

pub struct StateStore {
    path: PathBuf,
    inner: Mutex<DaemonStateFile>,
}

impl StateStore {
    /// Load the daemon state from `path`, creating a fresh (empty) state
    /// if the file does not exist yet.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, StateStoreError> {
        let path = path.into();
        let state = if path.exists() {
            persist::read_json(&path).map_err(|source| match source.kind() {
                std::io::ErrorKind::InvalidData => StateStoreError::Parse {
                    path: path.clone(),
                    source,
                },
                _ => StateStoreError::Read {
                    path: path.clone(),
                    source,
                },
            })?
        } else {
            DaemonStateFile::new()
        };
        Ok(StateStore {
            path,
            inner: Mutex::new(state),
        })
    }

    fn persist_locked(&self, state: &DaemonStateFile) -> Result<(), StateStoreError> {
        persist::atomic_write_json(&self.path, state).map_err(|source| StateStoreError::Write {
            path: self.path.clone(),
            source,
        })
    }

    /// Mark `id` completed (invariant I2: idempotent — re-marking is a
    /// no-op beyond bumping `last_updated`).
    pub async fn mark_completed(&self, id: &str) -> Result<(), StateStoreError> {
        let mut state = self.inner.lock().await;
        if !state.completed_tasks.iter().any(|c| c == id) {
            state.completed_tasks.push(id.to_string());
            debug!(spec_id = id, "marked completed");
        }
        state.last_updated = Utc::now();
        self.persist_locked(&state)
    }

    pub async fn is_completed(&self, id: &str) -> bool {
        let state = self.inner.lock().await;
        state.completed_tasks.iter().any(|c| c == id)
    }

    /// Size of the completion set, for the status snapshot's `stats.completed`.
    pub async fn completed_count(&self) -> usize {
        self.inner.lock().await.completed_tasks.len()
    }

    /// Evaluate the §4.1 dependency-met matcher against the current
    /// completion set.
    pub async fn are_dependencies_met(&self, deps: &[String]) -> bool {
        let state = self.inner.lock().await;
        let completed: HashSet<String> = state.completed_tasks.iter().cloned().collect();
        matcher::are_dependencies_met(deps, &completed)
    }

    /// A point-in-time copy of the completion set, for callers (the
    /// scheduler's ready-pick) that need to evaluate the matcher
    /// synchronously against a fixed snapshot across several candidates
    /// without re-acquiring this store's lock per candidate.
    pub async fn completed_snapshot(&self) -> HashSet<String> {
        let state = self.inner.lock().await;
        state.completed_tasks.iter().cloned().collect()
    }

    pub async fn recovery_count(&self, id: &str) -> u32 {
        let state = self.inner.lock().await;
        *state.recovery_counts.get(id).unwrap_or(&0)
    }

    /// Increment and return the new recovery count (I5: monotonically
    /// increasing, bounded by the caller against `max_recovery`).
    pub async fn increment_recovery_count(&self, id: &str) -> Result<u32, StateStoreError> {
        let mut state = self.inner.lock().await;
        let count = state.recovery_counts.entry(id.to_string()).or_insert(0);
        *count += 1;
        let new_count = *count;
        state.last_updated = Utc::now();
        self.persist_locked(&state)?;
        Ok(new_count)
    }

    pub async fn reset_recovery_count(&self, id: &str) -> Result<(), StateStoreError> {
        let mut state = self.inner.lock().await;
        state.recovery_counts.remove(id);
        state.last_updated = Utc::now();
        self.persist_locked(&state)
    }

    pub async fn record_error(&self, id: &str, text: &str) -> Result<(), StateStoreError> {
        let mut state = self.inner.lock().await;
        *state.error_counts.entry(id.to_string()).or_insert(0) += 1;
        state.last_errors.insert(id.to_string(), text.to_string());
        state.last_updated = Utc::now();
        self.persist_locked(&state)
    }

    pub async fn last_error(&self, id: &str) -> Option<String> {
        let state = self.inner.lock().await;
        state.last_errors.get(id).cloned()
    }

    pub async fn add_child(&self, parent: &str, child: &str) -> Result<(), StateStoreError> {
        let mut state = self.inner.lock().await;
        let children = state.task_hierarchy.entry(parent.to_string()).or_default();
        if !children.iter().any(|c| c == child) {
            children.push(child.to_string());
        }
        state.last_updated = Utc::now();
        self.persist_locked(&state)
    }

    /// Parent-chain depth of `id`: the number of ancestors (used by the
    /// Spec Factory's depth guard, I6, and the MCTS depth guard).
    pub async fn depth_of(&self, mut id: String) -> u32 {
        let state = self.inner.lock().await;
        let mut depth = 0;
        loop {
            let parent = state
                .task_hierarchy
                .iter()
                .find(|(_, children)| children.iter().any(|c| c == &id))
                .map(|(parent, _)| parent.clone());
            match parent {
                Some(p) => {
                    depth += 1;
                    id = p;
                }
                None => break,
            }
        }
        depth
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn mark_completed_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = StateStore::load(dir.path().join("state.json")).unwrap();
        store.mark_completed("001-a").await.unwrap();
        store.mark_completed("001-a").await.unwrap();
        assert!(store.is_completed("001-a").await);
        let state = store.inner.lock().await;
        assert_eq!(state.completed_tasks.len(), 1);
    }

    #[tokio::test]
    async fn recovery_count_increments_and_resets() {
        let dir = tempdir().unwrap();
        let store = StateStore::load(dir.path().join("state.json")).unwrap();
        assert_eq!(store.increment_recovery_count("001-a").await.unwrap(), 1);
        assert_eq!(store.increment_recovery_count("001-a").await.unwrap(), 2);
        store.reset_recovery_count("001-a").await.unwrap();
        assert_eq!(store.recovery_count("001-a").await, 0);
    }

    #[tokio::test]
    async fn reloading_preserves_state() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        {
            let store = StateStore::load(&path).unwrap();
            store.mark_completed("001-a").await.unwrap();
            store.record_error("002-b", "boom").await.unwrap();
        }
        let reloaded = StateStore::load(&path).unwrap();
        assert!(reloaded.is_completed("001-a").await);
        assert_eq!(reloaded.last_error("002-b").await.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn depth_of_walks_parent_chain() {
        let dir = tempdir().unwrap();
        let store = StateStore::load(dir.path().join("state.json")).unwrap();
        store.add_child("001-root", "002-child").await.unwrap();
        store.add_child("002-child", "003-grandchild").await.unwrap();
        assert_eq!(store.depth_of("001-root".to_string()).await, 0);
        assert_eq!(store.depth_of("002-child".to_string()).await, 1);
        assert_eq!(store.depth_of("003-grandchild".to_string()).await, 2);
    }
}
