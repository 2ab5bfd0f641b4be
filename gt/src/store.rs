//! SQLite-backed store for users and tasks
//!
//! Every mutation runs inside its own IMMEDIATE transaction. An early return
//! drops the transaction, which rolls it back; only `commit()` persists.

use std::path::Path;
use std::time::Duration;

use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior, params};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::domain::{Outcome, Task, TaskId, TaskState, User, UserId};
use crate::ledger::{self, LedgerEffect};

const SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS users (
    user_id TEXT PRIMARY KEY NOT NULL,
    display_name TEXT NOT NULL,
    total_points INTEGER NOT NULL DEFAULT 0,
    current_streak INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS tasks (
    task_id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL,
    description TEXT NOT NULL,
    state TEXT NOT NULL DEFAULT 'pending' CHECK (state IN ('pending', 'completed', 'failed')),
    date_assigned TEXT NOT NULL,
    FOREIGN KEY (user_id) REFERENCES users(user_id)
);

CREATE INDEX IF NOT EXISTS idx_tasks_user_date_state ON tasks(user_id, date_assigned, state);
"#;

const TASK_COLUMNS: &str = "task_id, user_id, description, state, date_assigned";

/// Errors from store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Task {task_id} already resolved as {state}")]
    AlreadyResolved { task_id: TaskId, state: TaskState },

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Connection tuning
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// How long a writer waits for another connection's lock
    pub busy_timeout: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_millis(5000),
        }
    }
}

/// Result of a successful resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    /// The task in its terminal state
    pub task: Task,
    /// The owner after the effect was applied
    pub user: User,
    pub effect: LedgerEffect,
}

/// Raw task row before decoding state and date
struct TaskRow {
    id: i64,
    user_id: String,
    description: String,
    state: String,
    date_assigned: String,
}

impl TaskRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            description: row.get(2)?,
            state: row.get(3)?,
            date_assigned: row.get(4)?,
        })
    }
}

impl TryFrom<TaskRow> for Task {
    type Error = StoreError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let state = row.state.parse::<TaskState>().map_err(StoreError::Corrupt)?;
        let assigned = row
            .date_assigned
            .parse::<NaiveDate>()
            .map_err(|e| StoreError::Corrupt(format!("task {} date '{}': {}", row.id, row.date_assigned, e)))?;
        Ok(Task {
            id: TaskId(row.id),
            owner: UserId::from(row.user_id),
            description: row.description,
            state,
            assigned,
        })
    }
}

fn user_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: UserId::from(row.get::<_, String>(0)?),
        display_name: row.get(1)?,
        total_points: row.get(2)?,
        current_streak: row.get(3)?,
    })
}

/// Persistent store of users and tasks
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (or create) the database at `path` and apply the schema
    pub fn open(path: impl AsRef<Path>, options: &StoreOptions) -> StoreResult<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), ?options, "Store::open: called");
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::init(conn, options)
    }

    /// Private in-memory database, mainly for tests
    pub fn open_in_memory() -> StoreResult<Self> {
        debug!("Store::open_in_memory: called");
        Self::init(Connection::open_in_memory()?, &StoreOptions::default())
    }

    fn init(conn: Connection, options: &StoreOptions) -> StoreResult<Self> {
        conn.busy_timeout(options.busy_timeout)?;
        conn.execute_batch(SCHEMA)?;
        info!("Store schema ready");
        Ok(Self { conn })
    }

    /// Close the connection, surfacing any error from SQLite
    pub fn close(self) -> StoreResult<()> {
        debug!("Store::close: called");
        self.conn.close().map_err(|(_, e)| StoreError::Sqlite(e))
    }

    fn write_tx(&mut self) -> StoreResult<Transaction<'_>> {
        Ok(self.conn.transaction_with_behavior(TransactionBehavior::Immediate)?)
    }

    /// Create the user if absent, otherwise refresh the display name
    pub fn upsert_user(&mut self, id: &UserId, display_name: &str) -> StoreResult<()> {
        debug!(%id, %display_name, "upsert_user: called");
        let tx = self.write_tx()?;
        tx.execute(
            "INSERT INTO users (user_id, display_name, total_points, current_streak)
             VALUES (?1, ?2, 0, 0)
             ON CONFLICT(user_id) DO UPDATE SET display_name = excluded.display_name",
            params![id.as_str(), display_name],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Create a pending task for an existing user
    pub fn create_task(&mut self, user_id: &UserId, description: &str, date: NaiveDate) -> StoreResult<TaskId> {
        debug!(%user_id, %date, "create_task: called");
        let tx = self.write_tx()?;
        let exists = tx
            .query_row(
                "SELECT 1 FROM users WHERE user_id = ?1",
                params![user_id.as_str()],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        if !exists {
            debug!(%user_id, "create_task: user does not exist");
            return Err(StoreError::NotFound(format!("User {}", user_id)));
        }
        tx.execute(
            "INSERT INTO tasks (user_id, description, state, date_assigned) VALUES (?1, ?2, 'pending', ?3)",
            params![user_id.as_str(), description, date.to_string()],
        )?;
        let id = TaskId(tx.last_insert_rowid());
        tx.commit()?;
        info!(task_id = %id, %user_id, "Task created");
        Ok(id)
    }

    /// Move a pending task to its terminal state and apply the ledger effect to its owner
    ///
    /// Both writes commit together. A task that is not pending is left untouched.
    pub fn resolve_task(&mut self, task_id: TaskId, outcome: Outcome) -> StoreResult<Resolution> {
        debug!(%task_id, %outcome, "resolve_task: called");
        let tx = self.write_tx()?;

        let mut task: Task = tx
            .query_row(
                &format!("SELECT {} FROM tasks WHERE task_id = ?1", TASK_COLUMNS),
                params![task_id.0],
                TaskRow::from_row,
            )
            .optional()?
            .ok_or_else(|| StoreError::NotFound(format!("Task {}", task_id)))?
            .try_into()?;

        if task.state.is_terminal() {
            debug!(%task_id, state = %task.state, "resolve_task: task already resolved");
            return Err(StoreError::AlreadyResolved {
                task_id,
                state: task.state,
            });
        }

        let new_state = TaskState::from(outcome);
        let updated = tx.execute(
            "UPDATE tasks SET state = ?1 WHERE task_id = ?2 AND state = 'pending'",
            params![new_state.as_str(), task_id.0],
        )?;
        if updated == 0 {
            debug!(%task_id, "resolve_task: lost check-and-set");
            let state = tx
                .query_row("SELECT state FROM tasks WHERE task_id = ?1", params![task_id.0], |row| {
                    row.get::<_, String>(0)
                })?
                .parse::<TaskState>()
                .map_err(StoreError::Corrupt)?;
            return Err(StoreError::AlreadyResolved { task_id, state });
        }
        task.state = new_state;

        let mut user = tx
            .query_row(
                "SELECT user_id, display_name, total_points, current_streak FROM users WHERE user_id = ?1",
                params![task.owner.as_str()],
                user_from_row,
            )
            .optional()?
            .ok_or_else(|| StoreError::Corrupt(format!("task {} owner {} missing", task_id, task.owner)))?;

        let effect = ledger::effect_of(outcome);
        effect.apply(&mut user);
        tx.execute(
            "UPDATE users SET total_points = ?1, current_streak = ?2 WHERE user_id = ?3",
            params![user.total_points, user.current_streak, user.id.as_str()],
        )?;

        tx.commit()?;
        info!(
            %task_id,
            user_id = %user.id,
            %outcome,
            total_points = user.total_points,
            current_streak = user.current_streak,
            "Task resolved"
        );
        Ok(Resolution { task, user, effect })
    }

    /// Total points for a user; unknown users have zero
    pub fn get_points(&self, user_id: &UserId) -> StoreResult<i64> {
        debug!(%user_id, "get_points: called");
        let points = self
            .conn
            .query_row(
                "SELECT total_points FROM users WHERE user_id = ?1",
                params![user_id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(points.unwrap_or(0))
    }

    pub fn get_user(&self, user_id: &UserId) -> StoreResult<Option<User>> {
        debug!(%user_id, "get_user: called");
        Ok(self
            .conn
            .query_row(
                "SELECT user_id, display_name, total_points, current_streak FROM users WHERE user_id = ?1",
                params![user_id.as_str()],
                user_from_row,
            )
            .optional()?)
    }

    pub fn get_task(&self, task_id: TaskId) -> StoreResult<Option<Task>> {
        debug!(%task_id, "get_task: called");
        self.conn
            .query_row(
                &format!("SELECT {} FROM tasks WHERE task_id = ?1", TASK_COLUMNS),
                params![task_id.0],
                TaskRow::from_row,
            )
            .optional()?
            .map(Task::try_from)
            .transpose()
    }

    /// Pending tasks for a user on a given day, ascending by id
    pub fn list_pending_tasks(&self, user_id: &UserId, date: NaiveDate) -> StoreResult<Vec<Task>> {
        debug!(%user_id, %date, "list_pending_tasks: called");
        self.query_tasks(
            &format!(
                "SELECT {} FROM tasks WHERE user_id = ?1 AND date_assigned = ?2 AND state = 'pending' ORDER BY task_id",
                TASK_COLUMNS
            ),
            user_id,
            date,
        )
    }

    /// Every task for a user on a given day regardless of state, ascending by id
    pub fn list_tasks(&self, user_id: &UserId, date: NaiveDate) -> StoreResult<Vec<Task>> {
        debug!(%user_id, %date, "list_tasks: called");
        self.query_tasks(
            &format!(
                "SELECT {} FROM tasks WHERE user_id = ?1 AND date_assigned = ?2 ORDER BY task_id",
                TASK_COLUMNS
            ),
            user_id,
            date,
        )
    }

    fn query_tasks(&self, sql: &str, user_id: &UserId, date: NaiveDate) -> StoreResult<Vec<Task>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map(params![user_id.as_str(), date.to_string()], TaskRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(Task::try_from).collect()
    }
}
