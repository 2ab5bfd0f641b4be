//! Domain types for goal tracking
//!
//! - [`User`] - a platform user with cumulative points and a streak
//! - [`Task`] - a dated task owned by a user, resolved exactly once

mod task;
mod user;

pub use task::{InvalidOutcome, Outcome, Task, TaskId, TaskState};
pub use user::{User, UserId};
