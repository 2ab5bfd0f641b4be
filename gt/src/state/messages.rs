//! State manager messages
//!
//! Commands and responses for the actor pattern.

use chrono::NaiveDate;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::domain::{InvalidOutcome, Outcome, Task, TaskId, TaskState, User, UserId};
use crate::store::{Resolution, StoreError};

/// Errors from state operations
#[derive(Debug, Error)]
pub enum StateError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Task {task_id} already resolved as {state}")]
    AlreadyResolved { task_id: TaskId, state: TaskState },

    #[error(transparent)]
    InvalidOutcome(#[from] InvalidOutcome),

    #[error("Store error: {0}")]
    StoreError(String),

    #[error("Channel error")]
    ChannelError,
}

impl From<StoreError> for StateError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => Self::NotFound(what),
            StoreError::AlreadyResolved { task_id, state } => Self::AlreadyResolved { task_id, state },
            e => Self::StoreError(e.to_string()),
        }
    }
}

/// Response from state operations
pub type StateResponse<T> = Result<T, StateError>;

/// Commands sent to the StateManager actor
#[derive(Debug)]
pub enum StateCommand {
    // User operations
    UpsertUser {
        id: UserId,
        display_name: String,
        reply: oneshot::Sender<StateResponse<()>>,
    },
    GetUser {
        id: UserId,
        reply: oneshot::Sender<StateResponse<Option<User>>>,
    },
    GetPoints {
        id: UserId,
        reply: oneshot::Sender<StateResponse<i64>>,
    },

    // Task operations
    CreateTask {
        user_id: UserId,
        description: String,
        date: NaiveDate,
        reply: oneshot::Sender<StateResponse<TaskId>>,
    },
    ResolveTask {
        task_id: TaskId,
        outcome: Outcome,
        reply: oneshot::Sender<StateResponse<Resolution>>,
    },
    GetTask {
        task_id: TaskId,
        reply: oneshot::Sender<StateResponse<Option<Task>>>,
    },
    ListTasks {
        user_id: UserId,
        date: NaiveDate,
        pending_only: bool,
        reply: oneshot::Sender<StateResponse<Vec<Task>>>,
    },

    // Shutdown (closes the store before replying)
    Shutdown {
        reply: oneshot::Sender<StateResponse<()>>,
    },
}
