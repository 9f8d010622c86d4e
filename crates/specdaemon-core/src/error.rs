//! Structured error types for library-facing components.
//!
//! Application-level orchestration code (the scheduler loop, the CLI) uses
//! `anyhow` for context-chained propagation; the components below expose
//! named error variants so callers can match on failure kind per the
//! recovery table in spec.md §7.

use std::path::PathBuf;

use thiserror::Error;

/// Errors from the [`crate::state::StateStore`].
#[derive(Debug, Error)]
pub enum StateStoreError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path} as JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from a plan-file read/write (shared across components since the
/// plan file is written by multiple actors; see spec.md §5).
#[derive(Debug, Error)]
pub enum PlanFileError {
    #[error("spec directory {0:?} has no implementation_plan.json")]
    Missing(PathBuf),
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from [`crate::spec_factory`].
#[derive(Debug, Error)]
pub enum SpecFactoryError {
    #[error("parent spec {0:?} already has child specs recorded: {1:?}")]
    AlreadyBatched(String, Vec<String>),
    #[error("parent spec {0:?} is already complete")]
    ParentComplete(String),
    #[error("creating a child at depth {depth} would exceed MAX_CHILD_DEPTH ({max})")]
    DepthExceeded { depth: u32, max: u32 },
    #[error("design-class task type {0:?} is not permitted at depth >= 2")]
    DesignAtDepth(String),
    #[error("spec directory {0:?} already exists")]
    AlreadyExists(PathBuf),
    #[error(transparent)]
    PlanFile(#[from] PlanFileError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors raised while building or spawning a task's command line.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("no agent registry entry and no default pipeline script configured for task type {0:?}")]
    NoResolution(String),
    #[error("failed to spawn {command:?}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from the MCTS tree/budget layer.
#[derive(Debug, Error)]
pub enum MctsError {
    #[error("node {0} not found in tree")]
    NodeNotFound(String),
    #[error(transparent)]
    PlanFile(#[from] PlanFileError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
