//! Goaltracker - daily goal tracking core
//!
//! Users register daily tasks, then mark each one completed or failed.
//! Completing earns points and extends a streak; failing costs more points
//! than completing earns and resets the streak.
//!
//! # Modules
//!
//! - [`domain`] - User and Task types
//! - [`ledger`] - Point and streak effects of a resolution
//! - [`store`] - SQLite persistence with per-operation transactions
//! - [`state`] - Actor handle shared by concurrent event handlers
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface
//!
//! # Example
//!
//! ```ignore
//! use goaltracker::{Outcome, StateManager, UserId};
//!
//! let state = StateManager::spawn("goals.db", &Default::default(), 256)?;
//! state.upsert_user("alice", "Alice").await?;
//! let task = state.create_task(&UserId::from("alice"), "exercise", today).await?;
//! let resolution = state.resolve_task(task, Outcome::Completed).await?;
//! assert_eq!(resolution.user.total_points, 100);
//! ```

pub mod cli;
pub mod config;
pub mod domain;
pub mod ledger;
pub mod state;
pub mod store;

// Re-export commonly used types
pub use config::Config;
pub use domain::{InvalidOutcome, Outcome, Task, TaskId, TaskState, User, UserId};
pub use ledger::{COMPLETION_REWARD, FAILURE_PENALTY, LedgerEffect, StreakEffect};
pub use state::{StateError, StateEvent, StateManager, StateResponse};
pub use store::{Resolution, Store, StoreError, StoreOptions};
