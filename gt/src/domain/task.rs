//! Task record, completion state and resolution outcome
//!
//! A task starts `Pending` and moves exactly once to `Completed` or `Failed`.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::user::UserId;

/// Store-assigned task identifier (monotonic, never reused)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub i64);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

/// Completion state of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Created, awaiting resolution
    #[default]
    Pending,
    /// Resolved as done
    Completed,
    /// Resolved as not done
    Failed,
}

impl TaskState {
    /// Column value used by the store
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Completed and failed tasks never change again
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TaskState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Unknown task state: {}", s)),
        }
    }
}

/// Outcome text was not one of complete/completed/fail/failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid outcome '{0}': expected 'complete' or 'fail'")]
pub struct InvalidOutcome(pub String);

/// Requested resolution of a pending task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Completed,
    Failed,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for Outcome {
    type Err = InvalidOutcome;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        debug!(%s, "Outcome::from_str: called");
        match s.trim().to_lowercase().as_str() {
            "complete" | "completed" => Ok(Self::Completed),
            "fail" | "failed" => Ok(Self::Failed),
            _ => Err(InvalidOutcome(s.to_string())),
        }
    }
}

impl From<Outcome> for TaskState {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Completed => Self::Completed,
            Outcome::Failed => Self::Failed,
        }
    }
}

/// A dated task owned by a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,

    /// Owning user
    pub owner: UserId,

    /// Free-form text, immutable after creation
    pub description: String,

    pub state: TaskState,

    /// Calendar day the task was assigned to
    pub assigned: NaiveDate,
}

impl Task {
    pub fn is_pending(&self) -> bool {
        self.state == TaskState::Pending
    }
}
