//! Read-modify-write access to room records over any [`RoomStore`] backend.

use std::sync::Arc;

use futures::stream::BoxStream;
use thiserror::Error;
use tracing::debug;

use crate::dao::{
    models::{RoomState, Versioned},
    room_store::{RoomEvent, RoomStore},
    storage::{StorageError, StorageResult},
};

/// Default number of compare-and-swap attempts before giving up.
pub const DEFAULT_UPDATE_ATTEMPTS: u32 = 5;

/// Failure of [`RoomRepository::apply_update`].
#[derive(Debug, Error)]
pub enum UpdateError<E> {
    /// The mutation refused the freshly read record; nothing was written.
    #[error("update rejected: {0}")]
    Rejected(E),
    /// The store failed or the retry budget ran out.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Room access layer adding read-modify-write semantics on top of a [`RoomStore`].
#[derive(Clone)]
pub struct RoomRepository {
    store: Arc<dyn RoomStore>,
    max_attempts: u32,
}

impl RoomRepository {
    /// Repository using [`DEFAULT_UPDATE_ATTEMPTS`] compare-and-swap attempts.
    pub fn new(store: Arc<dyn RoomStore>) -> Self {
        Self::with_attempts(store, DEFAULT_UPDATE_ATTEMPTS)
    }

    /// Repository retrying conflicting updates at most `max_attempts` times.
    pub fn with_attempts(store: Arc<dyn RoomStore>, max_attempts: u32) -> Self {
        Self {
            store,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Create the room with a fresh record unless one already exists.
    ///
    /// Losing a create race to another participant is not an error.
    pub async fn ensure_room(&self, room_id: &str) -> StorageResult<()> {
        match self.store.load(room_id).await {
            Ok(_) => Ok(()),
            Err(StorageError::NotFound { .. }) => {
                match self.store.create(room_id, RoomState::fresh()).await {
                    Ok(_) => {
                        debug!(room_id, "created room record");
                        Ok(())
                    }
                    Err(StorageError::AlreadyExists { .. }) => Ok(()),
                    Err(err) => Err(err),
                }
            }
            Err(err) => Err(err),
        }
    }

    /// Fetch the current record.
    pub async fn load(&self, room_id: &str) -> StorageResult<Versioned> {
        self.store.load(room_id).await
    }

    /// Replace the whole record.
    pub async fn replace(&self, room_id: &str, state: RoomState) -> StorageResult<Versioned> {
        self.store.replace(room_id, state).await
    }

    /// Subscribe to the record's snapshots.
    pub fn subscribe(&self, room_id: &str) -> BoxStream<'static, RoomEvent> {
        self.store.subscribe(room_id)
    }

    /// Atomically apply `mutate` to the current record.
    ///
    /// `mutate` always sees the freshly read record; it returns `Ok(None)` to leave the
    /// record untouched, `Ok(Some(next))` to commit `next`, or an error to reject. A
    /// commit that loses against a concurrent writer is retried from a fresh read.
    pub async fn apply_update<F, E>(
        &self,
        room_id: &str,
        mut mutate: F,
    ) -> Result<Versioned, UpdateError<E>>
    where
        F: FnMut(&RoomState) -> Result<Option<RoomState>, E> + Send,
        E: Send,
    {
        for attempt in 1..=self.max_attempts {
            let current = self.store.load(room_id).await?;
            let Some(next) = mutate(&current.state).map_err(UpdateError::Rejected)? else {
                return Ok(current);
            };

            match self
                .store
                .compare_and_swap(room_id, current.revision.clone(), next)
                .await
            {
                Ok(committed) => return Ok(committed),
                Err(StorageError::Conflict { .. }) => {
                    debug!(room_id, attempt, "room update conflicted; retrying on fresh read");
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(StorageError::ConcurrentUpdateFailed {
            room_id: room_id.to_owned(),
            attempts: self.max_attempts,
        }
        .into())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use futures::{FutureExt, future::BoxFuture};

    use super::*;
    use crate::dao::{
        models::{ParticipantId, ParticipantState, Revision},
        room_store::memory::MemoryRoomStore,
    };

    /// Store that lets a competing writer commit right before every CAS.
    struct AlwaysRacing {
        inner: MemoryRoomStore,
        race_once: AtomicBool,
        race_forever: bool,
    }

    impl AlwaysRacing {
        fn new(race_forever: bool) -> Self {
            Self {
                inner: MemoryRoomStore::new(),
                race_once: AtomicBool::new(true),
                race_forever,
            }
        }
    }

    impl RoomStore for AlwaysRacing {
        fn create(
            &self,
            room_id: &str,
            initial: RoomState,
        ) -> BoxFuture<'static, StorageResult<Versioned>> {
            self.inner.create(room_id, initial)
        }

        fn load(&self, room_id: &str) -> BoxFuture<'static, StorageResult<Versioned>> {
            self.inner.load(room_id)
        }

        fn compare_and_swap(
            &self,
            room_id: &str,
            expected: Revision,
            next: RoomState,
        ) -> BoxFuture<'static, StorageResult<Versioned>> {
            let race = self.race_forever || self.race_once.swap(false, Ordering::SeqCst);
            let inner = self.inner.clone();
            let room_id = room_id.to_owned();
            async move {
                if race {
                    let current = inner.load(&room_id).await?;
                    let mut rival = current.state.clone();
                    rival.participants.insert(
                        ParticipantId::new(format!("rival-{}", current.revision)),
                        ParticipantState::joined("Rival"),
                    );
                    inner
                        .compare_and_swap(&room_id, current.revision, rival)
                        .await?;
                }
                inner.compare_and_swap(&room_id, expected, next).await
            }
            .boxed()
        }

        fn replace(
            &self,
            room_id: &str,
            state: RoomState,
        ) -> BoxFuture<'static, StorageResult<Versioned>> {
            self.inner.replace(room_id, state)
        }

        fn subscribe(&self, room_id: &str) -> BoxStream<'static, RoomEvent> {
            self.inner.subscribe(room_id)
        }

        fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
            self.inner.health_check()
        }

        fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
            self.inner.try_reconnect()
        }
    }

    fn join(id: &'static str) -> impl FnMut(&RoomState) -> Result<Option<RoomState>, ()> {
        move |state| {
            let mut next = state.clone();
            next.participants
                .insert(ParticipantId::new(id), ParticipantState::joined(id));
            Ok(Some(next))
        }
    }

    #[tokio::test]
    async fn ensure_room_is_idempotent() {
        let repository = RoomRepository::new(Arc::new(MemoryRoomStore::new()));
        repository.ensure_room("r1").await.unwrap();
        let first = repository.load("r1").await.unwrap();

        repository.ensure_room("r1").await.unwrap();
        let second = repository.load("r1").await.unwrap();
        assert_eq!(first.revision, second.revision);
        assert_eq!(second.state, RoomState::fresh());
    }

    #[tokio::test]
    async fn conflicting_update_is_retried_without_losing_the_rival_write() {
        let store = Arc::new(AlwaysRacing::new(false));
        let repository = RoomRepository::new(store.clone());
        repository.ensure_room("r1").await.unwrap();

        let mut calls = 0;
        let committed = repository
            .apply_update("r1", |state| {
                calls += 1;
                join("p1")(state)
            })
            .await
            .unwrap();

        assert_eq!(calls, 2);
        assert_eq!(committed.state.participants.len(), 2);
        assert!(
            committed
                .state
                .participant(&ParticipantId::new("p1"))
                .is_some()
        );
    }

    #[tokio::test]
    async fn retry_budget_is_bounded() {
        let repository = RoomRepository::with_attempts(Arc::new(AlwaysRacing::new(true)), 3);
        repository.ensure_room("r1").await.unwrap();

        let err = repository.apply_update("r1", join("p1")).await.unwrap_err();
        match err {
            UpdateError::Storage(StorageError::ConcurrentUpdateFailed { attempts, .. }) => {
                assert_eq!(attempts, 3)
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn rejected_mutation_writes_nothing() {
        let repository = RoomRepository::new(Arc::new(MemoryRoomStore::new()));
        repository.ensure_room("r1").await.unwrap();
        let before = repository.load("r1").await.unwrap();

        let err = repository
            .apply_update("r1", |_| Err::<Option<RoomState>, _>("nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, UpdateError::Rejected("nope")));
        assert_eq!(repository.load("r1").await.unwrap().revision, before.revision);
    }

    #[tokio::test]
    async fn update_on_missing_room_is_not_found() {
        let repository = RoomRepository::new(Arc::new(MemoryRoomStore::new()));
        let err = repository.apply_update("ghost", join("p1")).await.unwrap_err();
        assert!(matches!(
            err,
            UpdateError::Storage(StorageError::NotFound { .. })
        ));
    }
}
