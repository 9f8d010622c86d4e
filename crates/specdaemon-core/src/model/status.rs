//! Plan `status` field: a disjoint set of lifecycle classes, each with
//! several accepted spellings (spec.md §3, §GLOSSARY "Queue status /
//! Completed status / Error status").
//!
//! Follows the teacher's string-backed-enum idiom (manual `Display` +
//! `FromStr` with a dedicated parse-error type) rather than deriving a
//! database column type, since this crate has no SQL layer.

use std::fmt;
use std::str::FromStr;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Lifecycle class of a plan's `status` field.
///
/// Serialized/deserialized manually rather than via `#[serde(rename_all)]`
/// because incoming plan files may use any of several accepted spellings
/// per class (written by an upstream planning agent); `Display` always
/// emits the canonical spelling for a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlanStatus {
    /// Ready to be picked up by the scheduler (`queue`, `backlog`, `queued`).
    Queue,
    /// A child process is currently executing this spec.
    InProgress,
    /// Automated (agent/validator) review in progress.
    AiReview,
    /// Awaiting an operator decision.
    HumanReview,
    /// Terminal success (`done`, `completed`, `merged`, `pr_created`,
    /// `complete`).
    Complete,
    /// Terminal failure (`error`, `failed`, `stuck`).
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanStatusParseError(pub String);

impl fmt::Display for PlanStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid plan status: {:?}", self.0)
    }
}

impl std::error::Error for PlanStatusParseError {}

impl PlanStatus {
    /// Is this status a member of the "completed" class per invariant I2?
    pub fn is_completed(self) -> bool {
        matches!(self, PlanStatus::Complete)
    }

    /// Is this status a member of the "queue" class (eligible to be
    /// scheduled)?
    pub fn is_queue_class(self) -> bool {
        matches!(self, PlanStatus::Queue)
    }

    /// Is this status a terminal error?
    pub fn is_error(self) -> bool {
        matches!(self, PlanStatus::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PlanStatus::Queue => "queue",
            PlanStatus::InProgress => "in_progress",
            PlanStatus::AiReview => "ai_review",
            PlanStatus::HumanReview => "human_review",
            PlanStatus::Complete => "complete",
            PlanStatus::Error => "error",
        }
    }
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlanStatus {
    type Err = PlanStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "queue" | "backlog" | "queued" => Ok(PlanStatus::Queue),
            "in_progress" | "coding" => Ok(PlanStatus::InProgress),
            "ai_review" => Ok(PlanStatus::AiReview),
            "human_review" => Ok(PlanStatus::HumanReview),
            "done" | "completed" | "merged" | "pr_created" | "complete" => {
                Ok(PlanStatus::Complete)
            }
            "error" | "failed" | "stuck" => Ok(PlanStatus::Error),
            other => Err(PlanStatusParseError(other.to_owned())),
        }
    }
}

impl Serialize for PlanStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

struct PlanStatusVisitor;

impl Visitor<'_> for PlanStatusVisitor {
    type Value = PlanStatus;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a plan status string")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        PlanStatus::from_str(v).map_err(de::Error::custom)
    }
}

impl<'de> Deserialize<'de> for PlanStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_str(PlanStatusVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_map_to_canonical_class() {
        for alias in ["queue", "backlog", "queued"] {
            assert_eq!(PlanStatus::from_str(alias).unwrap(), PlanStatus::Queue);
        }
        for alias in ["done", "completed", "merged", "pr_created", "complete"] {
            assert_eq!(PlanStatus::from_str(alias).unwrap(), PlanStatus::Complete);
        }
        for alias in ["error", "failed", "stuck"] {
            assert_eq!(PlanStatus::from_str(alias).unwrap(), PlanStatus::Error);
        }
    }

    #[test]
    fn case_insensitive() {
        assert_eq!(PlanStatus::from_str("QUEUE").unwrap(), PlanStatus::Queue);
    }

    #[test]
    fn unknown_status_errors() {
        assert!(PlanStatus::from_str("bogus").is_err());
    }

    #[test]
    fn display_round_trips_canonical_spelling() {
        assert_eq!(PlanStatus::Queue.to_string(), "queue");
        assert_eq!(
            PlanStatus::from_str(&PlanStatus::Complete.to_string()).unwrap(),
            PlanStatus::Complete
        );
    }

    #[test]
    fn deserializes_aliases_from_json() {
        let v: PlanStatus = serde_json::from_str("\"pr_created\"").unwrap();
        assert_eq!(v, PlanStatus::Complete);
        assert_eq!(serde_json::to_string(&PlanStatus::Queue).unwrap(), "\"queue\"");
    }
}
