//! C10 Lesson Store (spec.md §4.10 "Lessons"): an append-only
//! `mcts_lessons.json` journal, merged by lesson id.
//!
//! Grounded on `original_source/.../mcts/lesson_extractor.py::_save_lessons`
//! (read-existing, dedupe-by-id, `write_json_atomic`).

use std::path::Path;

use crate::error::MctsError;
use crate::model::Lesson;
use crate::state::persist::{atomic_write_json, read_json};

pub const LESSONS_FILE_NAME: &str = "mcts_lessons.json";

pub fn lessons_path(spec_dir: &Path) -> std::path::PathBuf {
    spec_dir.join(LESSONS_FILE_NAME)
}

pub fn load(spec_dir: &Path) -> Vec<Lesson> {
    read_json(&lessons_path(spec_dir)).unwrap_or_default()
}

/// Merge `new_lessons` into the journal, keeping the first-seen entry for
/// any id that already exists (spec.md §4.10: "Writing merges by `id`").
pub fn append(spec_dir: &Path, new_lessons: Vec<Lesson>) -> Result<Vec<Lesson>, MctsError> {
    let mut existing = load(spec_dir);
    let known_ids: std::collections::HashSet<&str> = existing.iter().map(|l| l.id.as_str()).collect();
    let fresh: Vec<Lesson> = new_lessons
        .into_iter()
        .filter(|l| !known_ids.contains(l.id.as_str()))
        .collect();
    existing.extend(fresh.iter().cloned());
    atomic_write_json(&lessons_path(spec_dir), &existing)?;
    Ok(existing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn lesson(id: &str) -> Lesson {
        Lesson {
            id: id.to_string(),
            node_id: "n-1".to_string(),
            title: "title".to_string(),
            summary: "summary".to_string(),
            findings: vec!["finding".to_string()],
            key_takeaway: "takeaway".to_string(),
            detection_signals: vec!["signal".to_string()],
        }
    }

    #[test]
    fn load_returns_empty_when_no_file() {
        let dir = tempdir().unwrap();
        assert!(load(dir.path()).is_empty());
    }

    #[test]
    fn append_dedupes_by_id() {
        let dir = tempdir().unwrap();
        append(dir.path(), vec![lesson("a")]).unwrap();
        let merged = append(dir.path(), vec![lesson("a"), lesson("b")]).unwrap();
        assert_eq!(merged.len(), 2);
        assert_eq!(load(dir.path()).len(), 2);
    }
}
