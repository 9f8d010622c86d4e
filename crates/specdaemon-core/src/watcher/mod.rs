//! C2 Watcher: debounced change notifications for `implementation_plan.json`
//! inside any spec directory (spec.md §4.2).
//!
//! Built on `notify`'s `RecommendedWatcher`, sourced from the
//! `iridite-tandem` example pack repo (`src-tauri/src/file_watcher.rs`),
//! the only repo in the corpus that does filesystem watching: an mpsc
//! channel drained on a dedicated blocking thread, since `notify`'s
//! callback is not `Send`-friendly across an async boundary.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

use crate::planfile::PLAN_FILE_NAME;

/// A debounced change notification: the spec directory's id (its
/// directory name) and its full path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecChanged {
    pub spec_id: String,
    pub spec_dir: PathBuf,
}

pub struct SpecWatcher {
    // Dropping the watcher stops the underlying OS watch and drops the
    // event sender it owns, which ends the background thread's receive
    // loop (`for res in raw_rx` returns once the last sender is gone).
    watcher: Mutex<Option<RecommendedWatcher>>,
    handle: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl SpecWatcher {
    /// Start watching `specs_dir` recursively, emitting debounced
    /// `SpecChanged` events on `tx`. `debounce` is the per-spec-ID window
    /// (spec.md default 2s); `prune_at` is the debounce-map size at which
    /// stale (> 60s) entries are pruned (spec.md default 500).
    pub fn start(
        specs_dir: &Path,
        debounce: Duration,
        prune_at: usize,
        tx: UnboundedSender<SpecChanged>,
    ) -> notify::Result<Self> {
        std::fs::create_dir_all(specs_dir).ok();

        let (raw_tx, raw_rx) = std::sync::mpsc::channel::<notify::Result<Event>>();
        let mut watcher = RecommendedWatcher::new(raw_tx, notify::Config::default())?;
        watcher.watch(specs_dir, RecursiveMode::Recursive)?;

        let specs_dir = specs_dir.to_path_buf();
        let handle = std::thread::spawn(move || {
            let mut last_fired: HashMap<String, Instant> = HashMap::new();
            for res in raw_rx {
                match res {
                    Ok(event) => {
                        if !matches!(
                            event.kind,
                            EventKind::Create(_) | EventKind::Modify(_)
                        ) {
                            continue;
                        }
                        for path in &event.paths {
                            let Some(spec_id) = spec_id_for_plan_path(&specs_dir, path) else {
                                continue;
                            };
                            if debounced(&mut last_fired, &spec_id, debounce) {
                                continue;
                            }
                            prune_stale(&mut last_fired, prune_at);
                            let spec_dir = specs_dir.join(&spec_id);
                            if tx
                                .send(SpecChanged {
                                    spec_id: spec_id.clone(),
                                    spec_dir,
                                })
                                .is_err()
                            {
                                // Receiver gone; nothing left to do.
                                return;
                            }
                        }
                    }
                    Err(e) => warn!("watch error: {e}"),
                }
            }
            debug!("watcher event channel closed");
        });

        Ok(SpecWatcher {
            watcher: Mutex::new(Some(watcher)),
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Stop the watcher. Idempotent: concurrent/repeated calls never join
    /// the background thread twice.
    pub fn stop(&self) {
        // Drop the watcher first so its owned event sender goes away and
        // the background thread's receive loop ends.
        let _ = self
            .watcher
            .lock()
            .expect("watcher lock poisoned")
            .take();

        let handle = self
            .handle
            .lock()
            .expect("watcher handle lock poisoned")
            .take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

/// If `path` is a spec directory's plan file directly under `specs_dir`,
/// return that spec's id (its directory name).
fn spec_id_for_plan_path(specs_dir: &Path, path: &Path) -> Option<String> {
    if path.file_name()?.to_str()? != PLAN_FILE_NAME {
        return None;
    }
    let parent = path.parent()?;
    let rel = parent.strip_prefix(specs_dir).ok()?;
    // Only the direct spec directory, e.g. `001-slug/implementation_plan.json`,
    // not a nested artifact directory.
    if rel.components().count() != 1 {
        return None;
    }
    rel.to_str().map(|s| s.to_string())
}

/// Returns true if this spec id fired within the debounce window and
/// should be dropped.
fn debounced(last_fired: &mut HashMap<String, Instant>, spec_id: &str, window: Duration) -> bool {
    let now = Instant::now();
    if let Some(last) = last_fired.get(spec_id) {
        if now.duration_since(*last) < window {
            return true;
        }
    }
    last_fired.insert(spec_id.to_string(), now);
    false
}

/// Prune the debounce map once it exceeds `prune_at` entries, removing
/// entries older than 60s (spec.md §4.2).
fn prune_stale(last_fired: &mut HashMap<String, Instant>, prune_at: usize) {
    if last_fired.len() <= prune_at {
        return;
    }
    let cutoff = Duration::from_secs(60);
    let now = Instant::now();
    last_fired.retain(|_, t| now.duration_since(*t) < cutoff);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_id_extracted_only_for_direct_plan_file() {
        let specs_dir = Path::new("/proj/.auto-claude/specs");
        assert_eq!(
            spec_id_for_plan_path(
                specs_dir,
                &specs_dir.join("001-slug/implementation_plan.json")
            ),
            Some("001-slug".to_string())
        );
        assert_eq!(
            spec_id_for_plan_path(specs_dir, &specs_dir.join("001-slug/spec.md")),
            None
        );
        assert_eq!(
            spec_id_for_plan_path(
                specs_dir,
                &specs_dir.join("001-slug/screenshots/implementation_plan.json")
            ),
            None
        );
    }

    #[test]
    fn debounce_drops_events_within_window() {
        let mut map = HashMap::new();
        assert!(!debounced(&mut map, "001-a", Duration::from_secs(2)));
        assert!(debounced(&mut map, "001-a", Duration::from_secs(2)));
    }

    #[test]
    fn prune_removes_only_stale_entries_past_threshold() {
        let mut map = HashMap::new();
        map.insert("fresh".to_string(), Instant::now());
        map.insert(
            "stale".to_string(),
            Instant::now() - Duration::from_secs(120),
        );
        prune_stale(&mut map, 1);
        assert!(map.contains_key("fresh"));
        assert!(!map.contains_key("stale"));
    }

    #[test]
    fn prune_is_noop_below_threshold() {
        let mut map = HashMap::new();
        map.insert(
            "stale".to_string(),
            Instant::now() - Duration::from_secs(120),
        );
        prune_stale(&mut map, 500);
        assert!(map.contains_key("stale"));
    }
}
