//! Atomic JSON read/write helpers shared by the State Store, plan files,
//! the status publisher, and the MCTS tree/lesson journal (spec.md I9,
//! P9; §5 "Shared-resource policy").

use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Read a JSON file, tolerating a leading UTF-8 BOM (spec.md §4.1
/// "Persistence").
pub fn read_json<T: DeserializeOwned>(path: &Path) -> std::io::Result<T> {
    let raw = std::fs::read(path)?;
    let text = strip_bom(&raw);
    serde_json::from_str(text).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

fn strip_bom(raw: &[u8]) -> &str {
    const BOM: [u8; 3] = [0xEF, 0xBB, 0xBF];
    let bytes = if raw.starts_with(&BOM) { &raw[3..] } else { raw };
    std::str::from_utf8(bytes).unwrap_or("")
}

/// Write `value` to `path` atomically: serialize to a temp file unique per
/// (pid, thread), then rename over the canonical path. Partial files never
/// replace the canonical file (spec.md I9).
pub fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let pid = std::process::id();
    let tid = thread_id();
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("state");
    let tmp_path = path.with_file_name(format!(".{file_name}.{pid}.{tid}.tmp"));

    let body = serde_json::to_vec_pretty(value)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    std::fs::write(&tmp_path, body)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

fn thread_id() -> u64 {
    // std::thread::ThreadId has no stable numeric accessor; hash its Debug
    // form, which is unique per live thread and sufficient for temp-file
    // collision avoidance.
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    format!("{:?}", std::thread::current().id()).hash(&mut hasher);
    hasher.finish()
}
