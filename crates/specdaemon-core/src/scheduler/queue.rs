//! The ready queue: a min-heap ordered by `(priority asc, queued_at asc)`
//! (spec.md §4.4 Queue, property P5).

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};

use crate::model::{Priority, TaskType};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedTask {
    pub spec_id: String,
    pub spec_dir: PathBuf,
    pub priority: Priority,
    pub task_type: TaskType,
    pub depends_on: Vec<String>,
    pub parent_task: Option<String>,
    pub queued_at: DateTime<Utc>,
}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// `BinaryHeap` is a max-heap; we want the *lowest* priority (critical=0
/// first) and the *earliest* `queued_at` first, so this impl is reversed
/// relative to the natural field ordering.
impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.queued_at.cmp(&self.queued_at))
    }
}

#[derive(Debug, Default)]
pub struct ReadyQueue {
    heap: BinaryHeap<QueuedTask>,
}

impl ReadyQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, task: QueuedTask) {
        self.heap.push(task);
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueuedTask> {
        self.heap.iter()
    }

    /// Remove and return the task matching `spec_id`, if queued.
    pub fn remove(&mut self, spec_id: &str) -> Option<QueuedTask> {
        let items: Vec<QueuedTask> = self.heap.drain().collect();
        let mut found = None;
        for item in items {
            if found.is_none() && item.spec_id == spec_id {
                found = Some(item);
            } else {
                self.heap.push(item);
            }
        }
        found
    }

    /// Pop the highest-priority task for which `is_ready` returns true,
    /// leaving all other queued tasks in place (spec.md §4.4 "pick the
    /// first ready task from the queue under priority order").
    pub fn pop_ready<F: Fn(&QueuedTask) -> bool>(&mut self, is_ready: F) -> Option<QueuedTask> {
        let mut items: Vec<QueuedTask> = self.heap.drain().collect();
        items.sort(); // BinaryHeap's Ord already encodes desired priority.
        items.reverse(); // highest-priority (by our Ord) first.

        let mut picked = None;
        let mut rest = Vec::with_capacity(items.len());
        for item in items {
            if picked.is_none() && is_ready(&item) {
                picked = Some(item);
            } else {
                rest.push(item);
            }
        }
        self.heap = rest.into_iter().collect();
        picked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn task(id: &str, priority: Priority, queued_at: DateTime<Utc>) -> QueuedTask {
        QueuedTask {
            spec_id: id.to_string(),
            spec_dir: PathBuf::from(id),
            priority,
            task_type: TaskType::Impl,
            depends_on: Vec::new(),
            parent_task: None,
            queued_at,
        }
    }

    #[test]
    fn lower_priority_value_pops_first() {
        let now = Utc::now();
        let mut q = ReadyQueue::new();
        q.push(task("low", Priority::Low, now));
        q.push(task("critical", Priority::Critical, now));
        q.push(task("normal", Priority::Normal, now));
        let picked = q.pop_ready(|_| true).unwrap();
        assert_eq!(picked.spec_id, "critical");
    }

    #[test]
    fn ties_broken_by_earlier_queued_at() {
        let now = Utc::now();
        let mut q = ReadyQueue::new();
        q.push(task("later", Priority::Normal, now + chrono::Duration::seconds(5)));
        q.push(task("earlier", Priority::Normal, now));
        let picked = q.pop_ready(|_| true).unwrap();
        assert_eq!(picked.spec_id, "earlier");
    }

    #[test]
    fn pop_ready_skips_not_ready_tasks_but_leaves_them_queued() {
        let now = Utc::now();
        let mut q = ReadyQueue::new();
        q.push(task("blocked", Priority::Critical, now));
        q.push(task("ready", Priority::Low, now));
        let picked = q.pop_ready(|t| t.spec_id == "ready").unwrap();
        assert_eq!(picked.spec_id, "ready");
        assert_eq!(q.len(), 1);
        assert_eq!(q.iter().next().unwrap().spec_id, "blocked");
    }

    #[test]
    fn remove_takes_matching_task_only() {
        let now = Utc::now();
        let mut q = ReadyQueue::new();
        q.push(task("a", Priority::Normal, now));
        q.push(task("b", Priority::Normal, now));
        let removed = q.remove("a").unwrap();
        assert_eq!(removed.spec_id, "a");
        assert_eq!(q.len(), 1);
    }
}
