//! Plan `taskType` field (spec.md §3).

use std::fmt;
use std::str::FromStr;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskType {
    Design,
    Architecture,
    Mcts,
    Research,
    Review,
    Impl,
    Frontend,
    Backend,
    Database,
    Api,
    Test,
    Integration,
    Docs,
    Verify,
    ErrorCheck,
    Default,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskTypeParseError(pub String);

impl fmt::Display for TaskTypeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid task type: {:?}", self.0)
    }
}

impl std::error::Error for TaskTypeParseError {}

impl TaskType {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::Design => "design",
            TaskType::Architecture => "architecture",
            TaskType::Mcts => "mcts",
            TaskType::Research => "research",
            TaskType::Review => "review",
            TaskType::Impl => "impl",
            TaskType::Frontend => "frontend",
            TaskType::Backend => "backend",
            TaskType::Database => "database",
            TaskType::Api => "api",
            TaskType::Test => "test",
            TaskType::Integration => "integration",
            TaskType::Docs => "docs",
            TaskType::Verify => "verify",
            TaskType::ErrorCheck => "error_check",
            TaskType::Default => "default",
        }
    }

    /// Design-class task types (spec.md I6): forbidden at depth >= 2, and
    /// dispatched in "plan mode" by the executor (spec.md §4.4 step 2).
    pub fn is_design_class(self) -> bool {
        matches!(
            self,
            TaskType::Design | TaskType::Architecture | TaskType::Mcts
        )
    }

    /// Task types dispatched in "plan mode" rather than headless
    /// (spec.md §4.4 Dispatch step 2: design/architecture/planning/
    /// research/review). "planning" has no corresponding `TaskType`
    /// variant in spec.md's enumerated set and is treated as an alias of
    /// `design` at parse time.
    pub fn is_plan_mode(self) -> bool {
        matches!(
            self,
            TaskType::Design
                | TaskType::Architecture
                | TaskType::Research
                | TaskType::Review
        )
    }

    /// "impl-like" task types that trigger auto-verify on success
    /// (spec.md §4.4 Dispatch step 6).
    pub fn is_impl_like(self) -> bool {
        matches!(
            self,
            TaskType::Impl
                | TaskType::Frontend
                | TaskType::Backend
                | TaskType::Database
                | TaskType::Api
                | TaskType::Integration
        )
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = TaskTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "design" | "planning" => Ok(TaskType::Design),
            "architecture" => Ok(TaskType::Architecture),
            "mcts" => Ok(TaskType::Mcts),
            "research" => Ok(TaskType::Research),
            "review" => Ok(TaskType::Review),
            "impl" => Ok(TaskType::Impl),
            "frontend" => Ok(TaskType::Frontend),
            "backend" => Ok(TaskType::Backend),
            "database" => Ok(TaskType::Database),
            "api" => Ok(TaskType::Api),
            "test" => Ok(TaskType::Test),
            "integration" => Ok(TaskType::Integration),
            "docs" => Ok(TaskType::Docs),
            "verify" => Ok(TaskType::Verify),
            "error_check" => Ok(TaskType::ErrorCheck),
            "default" => Ok(TaskType::Default),
            other => Err(TaskTypeParseError(other.to_owned())),
        }
    }
}

impl Serialize for TaskType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

struct TaskTypeVisitor;

impl Visitor<'_> for TaskTypeVisitor {
    type Value = TaskType;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a task type string")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        TaskType::from_str(v).map_err(de::Error::custom)
    }
}

impl<'de> Deserialize<'de> for TaskType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_str(TaskTypeVisitor)
    }
}

/// Priority level (spec.md §3: 0 critical .. 3 low). Lower value dispatches
/// first (spec.md §4.4 Queue ordering, P5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Priority {
    Critical = 0,
    High = 1,
    Normal = 2,
    Low = 3,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_variant() {
        for s in [
            "design",
            "architecture",
            "mcts",
            "research",
            "review",
            "impl",
            "frontend",
            "backend",
            "database",
            "api",
            "test",
            "integration",
            "docs",
            "verify",
            "error_check",
            "default",
        ] {
            let parsed = TaskType::from_str(s).unwrap();
            assert_eq!(parsed.to_string(), s);
        }
    }

    #[test]
    fn priority_orders_critical_first() {
        let mut v = vec![Priority::Low, Priority::Critical, Priority::Normal];
        v.sort();
        assert_eq!(v, vec![Priority::Critical, Priority::Normal, Priority::Low]);
    }

    #[test]
    fn design_class_matches_i6() {
        assert!(TaskType::Design.is_design_class());
        assert!(TaskType::Architecture.is_design_class());
        assert!(TaskType::Mcts.is_design_class());
        assert!(!TaskType::Impl.is_design_class());
    }
}
