//! State management with actor pattern
//!
//! StateManager owns the Store and processes messages via channels,
//! giving concurrent event handlers one process-wide handle with an
//! explicit spawn/shutdown lifecycle.

mod manager;
mod messages;

pub use manager::{DEFAULT_CHANNEL_CAPACITY, StateEvent, StateManager};
pub use messages::{StateCommand, StateError, StateResponse};
