//! StateManager - actor that owns the Store
//!
//! Processes commands via channels so concurrent callers share one connection.
//! The actor runs on the blocking pool since every store call is synchronous SQLite.

use std::path::Path;

use chrono::NaiveDate;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::domain::{Outcome, Task, TaskId, User, UserId};
use crate::store::{Resolution, Store, StoreOptions};

use super::messages::{StateCommand, StateError, StateResponse};

/// Default command queue depth
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Event broadcast after a state change commits
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateEvent {
    /// A user interacted (created or display name refreshed)
    UserSeen { user_id: UserId },
    /// A new pending task was stored
    TaskCreated { task_id: TaskId, user_id: UserId },
    /// A task reached its terminal state and the owner was scored
    TaskResolved {
        task_id: TaskId,
        user_id: UserId,
        outcome: Outcome,
        total_points: i64,
        current_streak: u32,
    },
}

/// Handle to send commands to the StateManager
#[derive(Clone)]
pub struct StateManager {
    tx: mpsc::Sender<StateCommand>,
    /// Broadcast sender for state change notifications
    event_tx: broadcast::Sender<StateEvent>,
}

impl StateManager {
    /// Open the database and spawn the actor
    pub fn spawn(db_path: impl AsRef<Path>, options: &StoreOptions, capacity: usize) -> eyre::Result<Self> {
        debug!(db_path = %db_path.as_ref().display(), capacity, "spawn: called");
        let store = Store::open(db_path.as_ref(), options)?;
        Ok(Self::spawn_with_store(store, capacity))
    }

    /// Spawn the actor around an already opened store
    pub fn spawn_with_store(store: Store, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (event_tx, _) = broadcast::channel(64);

        let actor_events = event_tx.clone();
        tokio::task::spawn_blocking(move || actor_loop(store, rx, actor_events));

        info!("StateManager spawned");
        Self { tx, event_tx }
    }

    /// Subscribe to state change events
    pub fn subscribe_events(&self) -> broadcast::Receiver<StateEvent> {
        self.event_tx.subscribe()
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<StateResponse<T>>) -> StateCommand) -> StateResponse<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| StateError::ChannelError)?;
        reply_rx.await.map_err(|_| StateError::ChannelError)?
    }

    // === User operations ===

    /// Record that a user was seen, creating them on first contact
    pub async fn upsert_user(&self, id: impl Into<UserId>, display_name: impl Into<String>) -> StateResponse<()> {
        let id = id.into();
        let display_name = display_name.into();
        debug!(%id, %display_name, "upsert_user: called");
        self.request(|reply| StateCommand::UpsertUser {
            id,
            display_name,
            reply,
        })
        .await
    }

    pub async fn get_user(&self, id: &UserId) -> StateResponse<Option<User>> {
        debug!(%id, "get_user: called");
        self.request(|reply| StateCommand::GetUser { id: id.clone(), reply })
            .await
    }

    /// Get a user, returning error if not found
    pub async fn get_user_required(&self, id: &UserId) -> StateResponse<User> {
        debug!(%id, "get_user_required: called");
        self.get_user(id)
            .await?
            .ok_or_else(|| StateError::NotFound(format!("User {}", id)))
    }

    /// Total points, zero for users never seen
    pub async fn get_points(&self, id: &UserId) -> StateResponse<i64> {
        debug!(%id, "get_points: called");
        self.request(|reply| StateCommand::GetPoints { id: id.clone(), reply })
            .await
    }

    // === Task operations ===

    /// Create a pending task for an existing user
    pub async fn create_task(
        &self,
        user_id: &UserId,
        description: impl Into<String>,
        date: NaiveDate,
    ) -> StateResponse<TaskId> {
        let description = description.into();
        debug!(%user_id, %date, "create_task: called");
        self.request(|reply| StateCommand::CreateTask {
            user_id: user_id.clone(),
            description,
            date,
            reply,
        })
        .await
    }

    /// Resolve a pending task and score its owner
    pub async fn resolve_task(&self, task_id: TaskId, outcome: Outcome) -> StateResponse<Resolution> {
        debug!(%task_id, %outcome, "resolve_task: called");
        self.request(|reply| StateCommand::ResolveTask {
            task_id,
            outcome,
            reply,
        })
        .await
    }

    /// Resolve with an outcome given as text (`complete`, `fail`, ...)
    pub async fn resolve_task_str(&self, task_id: TaskId, outcome: &str) -> StateResponse<Resolution> {
        debug!(%task_id, %outcome, "resolve_task_str: called");
        let outcome: Outcome = outcome.parse()?;
        self.resolve_task(task_id, outcome).await
    }

    pub async fn get_task(&self, task_id: TaskId) -> StateResponse<Option<Task>> {
        debug!(%task_id, "get_task: called");
        self.request(|reply| StateCommand::GetTask { task_id, reply }).await
    }

    /// Pending tasks assigned to `user_id` on `date`
    pub async fn list_pending_tasks(&self, user_id: &UserId, date: NaiveDate) -> StateResponse<Vec<Task>> {
        debug!(%user_id, %date, "list_pending_tasks: called");
        self.request(|reply| StateCommand::ListTasks {
            user_id: user_id.clone(),
            date,
            pending_only: true,
            reply,
        })
        .await
    }

    /// All tasks assigned to `user_id` on `date`, in any state
    pub async fn list_tasks(&self, user_id: &UserId, date: NaiveDate) -> StateResponse<Vec<Task>> {
        debug!(%user_id, %date, "list_tasks: called");
        self.request(|reply| StateCommand::ListTasks {
            user_id: user_id.clone(),
            date,
            pending_only: false,
            reply,
        })
        .await
    }

    /// Stop the actor and close the store
    pub async fn shutdown(&self) -> StateResponse<()> {
        debug!("shutdown: called");
        self.request(|reply| StateCommand::Shutdown { reply }).await
    }
}

/// The actor loop that owns the Store and processes commands
///
/// Events are sent here, right after the store commits, so they arrive in
/// commit order even when the caller stops waiting for the reply.
fn actor_loop(mut store: Store, mut rx: mpsc::Receiver<StateCommand>, event_tx: broadcast::Sender<StateEvent>) {
    debug!("StateManager actor started");

    while let Some(cmd) = rx.blocking_recv() {
        match cmd {
            StateCommand::UpsertUser {
                id,
                display_name,
                reply,
            } => {
                debug!(%id, "actor_loop: UpsertUser command");
                let result = store.upsert_user(&id, &display_name).map_err(StateError::from);
                if result.is_ok() {
                    let _ = event_tx.send(StateEvent::UserSeen { user_id: id });
                }
                let _ = reply.send(result);
            }

            StateCommand::GetUser { id, reply } => {
                debug!(%id, "actor_loop: GetUser command");
                let _ = reply.send(store.get_user(&id).map_err(StateError::from));
            }

            StateCommand::GetPoints { id, reply } => {
                debug!(%id, "actor_loop: GetPoints command");
                let _ = reply.send(store.get_points(&id).map_err(StateError::from));
            }

            StateCommand::CreateTask {
                user_id,
                description,
                date,
                reply,
            } => {
                debug!(%user_id, %date, "actor_loop: CreateTask command");
                let result = store
                    .create_task(&user_id, &description, date)
                    .map_err(StateError::from);
                if let Ok(task_id) = result {
                    let _ = event_tx.send(StateEvent::TaskCreated { task_id, user_id });
                }
                let _ = reply.send(result);
            }

            StateCommand::ResolveTask {
                task_id,
                outcome,
                reply,
            } => {
                debug!(%task_id, %outcome, "actor_loop: ResolveTask command");
                let result = store.resolve_task(task_id, outcome).map_err(StateError::from);
                if let Ok(resolution) = &result {
                    let _ = event_tx.send(StateEvent::TaskResolved {
                        task_id,
                        user_id: resolution.user.id.clone(),
                        outcome,
                        total_points: resolution.user.total_points,
                        current_streak: resolution.user.current_streak,
                    });
                }
                let _ = reply.send(result);
            }

            StateCommand::GetTask { task_id, reply } => {
                debug!(%task_id, "actor_loop: GetTask command");
                let _ = reply.send(store.get_task(task_id).map_err(StateError::from));
            }

            StateCommand::ListTasks {
                user_id,
                date,
                pending_only,
                reply,
            } => {
                debug!(%user_id, %date, pending_only, "actor_loop: ListTasks command");
                let result = if pending_only {
                    store.list_pending_tasks(&user_id, date)
                } else {
                    store.list_tasks(&user_id, date)
                };
                let _ = reply.send(result.map_err(StateError::from));
            }

            StateCommand::Shutdown { reply } => {
                info!("StateManager shutting down");
                let _ = reply.send(store.close().map_err(StateError::from));
                return;
            }
        }
    }

    warn!("StateManager actor stopped without shutdown; all handles dropped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskState;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::tempdir;

    fn day(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn in_memory() -> StateManager {
        StateManager::spawn_with_store(Store::open_in_memory().unwrap(), DEFAULT_CHANNEL_CAPACITY)
    }

    #[tokio::test]
    async fn test_state_manager_user_lifecycle() {
        let manager = in_memory();
        let alice = UserId::from("alice");

        manager.upsert_user("alice", "Alice").await.unwrap();
        assert_eq!(manager.get_points(&alice).await.unwrap(), 0);

        manager.upsert_user("alice", "Al").await.unwrap();
        let user = manager.get_user_required(&alice).await.unwrap();
        assert_eq!(user.display_name, "Al");

        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_state_manager_alice_scenario() {
        let temp = tempdir().unwrap();
        let manager =
            StateManager::spawn(temp.path().join("goals.db"), &StoreOptions::default(), DEFAULT_CHANNEL_CAPACITY)
                .unwrap();
        let alice = UserId::from("alice");

        manager.upsert_user("alice", "Alice").await.unwrap();
        let first = manager.create_task(&alice, "exercise", day("2024-01-01")).await.unwrap();
        assert_eq!(first, TaskId(1));
        manager.resolve_task(first, Outcome::Completed).await.unwrap();
        assert_eq!(manager.get_points(&alice).await.unwrap(), 100);
        assert_eq!(manager.get_user_required(&alice).await.unwrap().current_streak, 1);

        let second = manager.create_task(&alice, "read", day("2024-01-01")).await.unwrap();
        assert_eq!(second, TaskId(2));
        manager.resolve_task(second, Outcome::Failed).await.unwrap();
        assert_eq!(manager.get_points(&alice).await.unwrap(), -10);
        assert_eq!(manager.get_user_required(&alice).await.unwrap().current_streak, 0);

        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_get_points_unknown_user() {
        let manager = in_memory();
        assert_eq!(manager.get_points(&UserId::from("stranger")).await.unwrap(), 0);
        assert!(manager.get_user(&UserId::from("stranger")).await.unwrap().is_none());
        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_create_task_for_unknown_user_fails() {
        let manager = in_memory();
        let result = manager
            .create_task(&UserId::from("ghost"), "haunt", day("2024-01-01"))
            .await;
        assert!(matches!(result, Err(StateError::NotFound(_))));
        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_resolve_twice_is_rejected() {
        let manager = in_memory();
        let alice = UserId::from("alice");
        manager.upsert_user("alice", "Alice").await.unwrap();
        let id = manager.create_task(&alice, "exercise", day("2024-01-01")).await.unwrap();

        manager.resolve_task(id, Outcome::Completed).await.unwrap();
        let again = manager.resolve_task(id, Outcome::Failed).await;
        assert!(matches!(
            again,
            Err(StateError::AlreadyResolved {
                task_id,
                state: TaskState::Completed
            }) if task_id == id
        ));

        let user = manager.get_user_required(&alice).await.unwrap();
        assert_eq!(user.total_points, 100);
        assert_eq!(user.current_streak, 1);

        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_resolve_unknown_task() {
        let manager = in_memory();
        let result = manager.resolve_task(TaskId(7), Outcome::Completed).await;
        assert!(matches!(result, Err(StateError::NotFound(_))));
        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_resolve_task_str_invalid_outcome() {
        let manager = in_memory();
        let alice = UserId::from("alice");
        manager.upsert_user("alice", "Alice").await.unwrap();
        let id = manager.create_task(&alice, "exercise", day("2024-01-01")).await.unwrap();

        let result = manager.resolve_task_str(id, "postponed").await;
        assert!(matches!(result, Err(StateError::InvalidOutcome(_))));

        // Task untouched and still resolvable
        assert_eq!(manager.get_task(id).await.unwrap().unwrap().state, TaskState::Pending);
        let resolution = manager.resolve_task_str(id, "fail").await.unwrap();
        assert_eq!(resolution.task.state, TaskState::Failed);

        manager.shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_resolution_single_winner() {
        let manager = in_memory();
        let alice = UserId::from("alice");
        manager.upsert_user("alice", "Alice").await.unwrap();
        let id = manager.create_task(&alice, "exercise", day("2024-01-01")).await.unwrap();

        let done = Arc::new(AtomicBool::new(false));
        let reader = tokio::spawn({
            let manager = manager.clone();
            let alice = alice.clone();
            let done = done.clone();
            async move {
                // The task is listed as pending until it resolves, then never again
                let mut seen_resolved = false;
                let mut reads = 0;
                while !done.load(Ordering::SeqCst) || reads == 0 {
                    let pending = manager.list_pending_tasks(&alice, day("2024-01-01")).await.unwrap();
                    assert!(pending.iter().all(|t| t.state == TaskState::Pending));
                    let listed = pending.iter().any(|t| t.id == id);
                    assert!(!(seen_resolved && listed), "resolved task listed as pending again");
                    seen_resolved |= !listed;
                    reads += 1;
                    tokio::task::yield_now().await;
                }
                reads
            }
        });

        let complete = tokio::spawn({
            let manager = manager.clone();
            async move { manager.resolve_task(id, Outcome::Completed).await }
        });
        let fail = tokio::spawn({
            let manager = manager.clone();
            async move { manager.resolve_task(id, Outcome::Failed).await }
        });
        let results = [complete.await.unwrap(), fail.await.unwrap()];
        done.store(true, Ordering::SeqCst);
        assert!(reader.await.unwrap() > 0);

        let winners: Vec<&Resolution> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert_eq!(winners.len(), 1);
        assert!(
            results
                .iter()
                .any(|r| matches!(r, Err(StateError::AlreadyResolved { .. })))
        );

        let points = manager.get_points(&alice).await.unwrap();
        assert_eq!(points, winners[0].effect.point_delta);
        assert!(
            manager
                .list_pending_tasks(&alice, day("2024-01-01"))
                .await
                .unwrap()
                .is_empty()
        );

        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_list_pending_excludes_resolved() {
        let manager = in_memory();
        let alice = UserId::from("alice");
        manager.upsert_user("alice", "Alice").await.unwrap();
        let keep = manager.create_task(&alice, "keep", day("2024-01-01")).await.unwrap();
        let done = manager.create_task(&alice, "done", day("2024-01-01")).await.unwrap();
        manager.resolve_task(done, Outcome::Completed).await.unwrap();

        let pending = manager.list_pending_tasks(&alice, day("2024-01-01")).await.unwrap();
        assert_eq!(pending.iter().map(|t| t.id).collect::<Vec<_>>(), vec![keep]);

        let all = manager.list_tasks(&alice, day("2024-01-01")).await.unwrap();
        assert_eq!(all.len(), 2);

        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_events_broadcast_on_changes() {
        let manager = in_memory();
        let mut event_rx = manager.subscribe_events();
        let alice = UserId::from("alice");

        manager.upsert_user("alice", "Alice").await.unwrap();
        let id = manager.create_task(&alice, "exercise", day("2024-01-01")).await.unwrap();
        manager.resolve_task(id, Outcome::Completed).await.unwrap();
        // Failed operations emit nothing
        let _ = manager.resolve_task(id, Outcome::Failed).await;

        assert_eq!(
            event_rx.try_recv().unwrap(),
            StateEvent::UserSeen {
                user_id: alice.clone()
            }
        );
        assert_eq!(
            event_rx.try_recv().unwrap(),
            StateEvent::TaskCreated {
                task_id: id,
                user_id: alice.clone()
            }
        );
        match event_rx.try_recv().unwrap() {
            StateEvent::TaskResolved {
                task_id,
                outcome,
                total_points,
                current_streak,
                ..
            } => {
                assert_eq!(task_id, id);
                assert_eq!(outcome, Outcome::Completed);
                assert_eq!(total_points, 100);
                assert_eq!(current_streak, 1);
            }
            other => panic!("Expected TaskResolved event, got {:?}", other),
        }
        assert!(event_rx.try_recv().is_err());

        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_resolution_event_sent_when_caller_gives_up() {
        use std::future::Future;
        use std::task::{Context, Waker};

        let manager = in_memory();
        let alice = UserId::from("alice");
        manager.upsert_user("alice", "Alice").await.unwrap();
        let id = manager.create_task(&alice, "exercise", day("2024-01-01")).await.unwrap();
        let mut event_rx = manager.subscribe_events();

        // One poll hands the command to the actor, then the caller walks away
        let mut resolve = Box::pin(manager.resolve_task(id, Outcome::Completed));
        let mut cx = Context::from_waker(Waker::noop());
        let _ = resolve.as_mut().poll(&mut cx);
        drop(resolve);

        // Commands are handled in order, so the resolution has committed by now
        assert_eq!(manager.get_points(&alice).await.unwrap(), 100);
        match event_rx.try_recv().unwrap() {
            StateEvent::TaskResolved {
                task_id,
                user_id,
                total_points,
                ..
            } => {
                assert_eq!(task_id, id);
                assert_eq!(user_id, alice);
                assert_eq!(total_points, 100);
            }
            other => panic!("Expected TaskResolved event, got {:?}", other),
        }

        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_requests_after_shutdown_fail() {
        let manager = in_memory();
        manager.shutdown().await.unwrap();

        let result = manager.get_points(&UserId::from("alice")).await;
        assert!(matches!(result, Err(StateError::ChannelError)));
    }
}
