//! In-process room store used for local play and tests.

use std::{sync::Arc, time::SystemTime};

use async_stream::stream;
use dashmap::DashMap;
use futures::{
    FutureExt,
    future::{self, BoxFuture},
    stream::BoxStream,
};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::debug;

use super::{RoomEvent, RoomStore};
use crate::dao::{
    models::{Revision, RoomState, Versioned},
    storage::{StorageError, StorageResult},
};

const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Room store keeping every record in memory.
///
/// Each room owns a broadcast channel; commits are published while the room entry is
/// locked so subscribers observe writes in commit order.
#[derive(Clone)]
pub struct MemoryRoomStore {
    rooms: Arc<DashMap<String, MemoryRoom>>,
    capacity: usize,
}

struct MemoryRoom {
    current: Option<Versioned>,
    counter: u64,
    events: broadcast::Sender<RoomEvent>,
}

impl MemoryRoom {
    fn new(capacity: usize) -> Self {
        let (events, _receiver) = broadcast::channel(capacity);
        Self {
            current: None,
            counter: 0,
            events,
        }
    }

    fn commit(&mut self, state: RoomState) -> Versioned {
        self.counter += 1;
        let versioned = Versioned {
            revision: Revision::from_counter(self.counter),
            state,
            updated_at: SystemTime::now(),
        };
        self.current = Some(versioned.clone());
        let _ = self.events.send(RoomEvent::Snapshot(versioned.clone()));
        versioned
    }
}

impl Default for MemoryRoomStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRoomStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    /// Create an empty store whose per-room event buffer holds `capacity` snapshots.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            rooms: Arc::new(DashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Drop a room record, as backend-side cleanup would. Subscribers receive `NotFound`.
    pub fn delete(&self, room_id: &str) -> bool {
        let Some(mut room) = self.rooms.get_mut(room_id) else {
            return false;
        };
        let existed = room.current.take().is_some();
        if existed {
            let _ = room.events.send(RoomEvent::NotFound);
        }
        existed
    }

    fn load_now(&self, room_id: &str) -> StorageResult<Versioned> {
        self.rooms
            .get(room_id)
            .and_then(|room| room.current.clone())
            .ok_or_else(|| StorageError::not_found(room_id))
    }

    fn create_now(&self, room_id: &str, initial: RoomState) -> StorageResult<Versioned> {
        let mut room = self
            .rooms
            .entry(room_id.to_owned())
            .or_insert_with(|| MemoryRoom::new(self.capacity));
        if room.current.is_some() {
            return Err(StorageError::already_exists(room_id));
        }
        Ok(room.commit(initial))
    }

    fn compare_and_swap_now(
        &self,
        room_id: &str,
        expected: &Revision,
        next: RoomState,
    ) -> StorageResult<Versioned> {
        let Some(mut room) = self.rooms.get_mut(room_id) else {
            return Err(StorageError::not_found(room_id));
        };
        match room.current.as_ref().map(|current| &current.revision == expected) {
            None => Err(StorageError::not_found(room_id)),
            Some(false) => Err(StorageError::conflict(room_id)),
            Some(true) => Ok(room.commit(next)),
        }
    }

    fn replace_now(&self, room_id: &str, state: RoomState) -> Versioned {
        let mut room = self
            .rooms
            .entry(room_id.to_owned())
            .or_insert_with(|| MemoryRoom::new(self.capacity));
        room.commit(state)
    }
}

impl RoomStore for MemoryRoomStore {
    fn create(
        &self,
        room_id: &str,
        initial: RoomState,
    ) -> BoxFuture<'static, StorageResult<Versioned>> {
        future::ready(self.create_now(room_id, initial)).boxed()
    }

    fn load(&self, room_id: &str) -> BoxFuture<'static, StorageResult<Versioned>> {
        future::ready(self.load_now(room_id)).boxed()
    }

    fn compare_and_swap(
        &self,
        room_id: &str,
        expected: Revision,
        next: RoomState,
    ) -> BoxFuture<'static, StorageResult<Versioned>> {
        future::ready(self.compare_and_swap_now(room_id, &expected, next)).boxed()
    }

    fn replace(
        &self,
        room_id: &str,
        state: RoomState,
    ) -> BoxFuture<'static, StorageResult<Versioned>> {
        future::ready(Ok(self.replace_now(room_id, state))).boxed()
    }

    fn subscribe(&self, room_id: &str) -> BoxStream<'static, RoomEvent> {
        let (initial, mut receiver) = {
            let room = self
                .rooms
                .entry(room_id.to_owned())
                .or_insert_with(|| MemoryRoom::new(self.capacity));
            (room.current.clone(), room.events.subscribe())
        };
        let store = self.clone();
        let room_id = room_id.to_owned();

        Box::pin(stream! {
            let mut last_seen = initial.as_ref().and_then(|v| v.revision.as_counter());
            match initial {
                Some(versioned) => yield RoomEvent::Snapshot(versioned),
                None => yield RoomEvent::NotFound,
            }

            loop {
                match receiver.recv().await {
                    Ok(RoomEvent::Snapshot(versioned)) => {
                        let counter = versioned.revision.as_counter();
                        if counter.is_some() && counter <= last_seen {
                            continue;
                        }
                        last_seen = counter;
                        yield RoomEvent::Snapshot(versioned);
                    }
                    Ok(RoomEvent::NotFound) => yield RoomEvent::NotFound,
                    Err(RecvError::Lagged(skipped)) => {
                        // Resume from the latest committed value; older buffered
                        // snapshots are filtered by revision above.
                        debug!(room_id = %room_id, skipped, "room subscriber lagged; resyncing");
                        match store.load_now(&room_id) {
                            Ok(versioned) => {
                                last_seen = versioned.revision.as_counter();
                                yield RoomEvent::Snapshot(versioned);
                            }
                            Err(_) => yield RoomEvent::NotFound,
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        future::ready(Ok(())).boxed()
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        future::ready(Ok(())).boxed()
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;
    use crate::dao::models::{ParticipantId, ParticipantState};

    fn snapshot(event: RoomEvent) -> Versioned {
        match event {
            RoomEvent::Snapshot(versioned) => versioned,
            RoomEvent::NotFound => panic!("expected snapshot, got NotFound"),
        }
    }

    #[tokio::test]
    async fn create_twice_reports_already_exists() {
        let store = MemoryRoomStore::new();
        store.create("r1", RoomState::fresh()).await.unwrap();

        let err = store.create("r1", RoomState::fresh()).await.unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn load_missing_room_is_not_found() {
        let store = MemoryRoomStore::new();
        let err = store.load("nope").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
    }

    #[tokio::test]
    async fn stale_revision_is_rejected() {
        let store = MemoryRoomStore::new();
        let created = store.create("r1", RoomState::fresh()).await.unwrap();

        let mut next = created.state.clone();
        next.round = 1;
        store
            .compare_and_swap("r1", created.revision.clone(), next.clone())
            .await
            .unwrap();

        let err = store
            .compare_and_swap("r1", created.revision, next)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict { .. }));
    }

    #[tokio::test]
    async fn subscribe_delivers_current_then_changes() {
        let store = MemoryRoomStore::new();
        let mut events = store.subscribe("r1");
        assert_eq!(events.next().await, Some(RoomEvent::NotFound));

        let created = store.create("r1", RoomState::fresh()).await.unwrap();
        assert_eq!(snapshot(events.next().await.unwrap()), created);

        let mut next = created.state.clone();
        next.participants
            .insert(ParticipantId::new("p1"), ParticipantState::joined("Ada"));
        let committed = store
            .compare_and_swap("r1", created.revision, next)
            .await
            .unwrap();
        assert_eq!(snapshot(events.next().await.unwrap()), committed);

        let mut late = store.subscribe("r1");
        assert_eq!(snapshot(late.next().await.unwrap()), committed);
    }

    #[tokio::test]
    async fn lagging_subscriber_resumes_from_latest() {
        let store = MemoryRoomStore::with_capacity(2);
        let mut events = store.subscribe("r1");
        assert_eq!(events.next().await, Some(RoomEvent::NotFound));

        let mut last = store.create("r1", RoomState::fresh()).await.unwrap();
        for round in 1..=5 {
            let mut next = last.state.clone();
            next.round = round;
            last = store
                .compare_and_swap("r1", last.revision.clone(), next)
                .await
                .unwrap();
        }

        let mut seen = Vec::new();
        while let Some(event) = events.next().await {
            let versioned = snapshot(event);
            seen.push(versioned.state.round);
            if versioned == last {
                break;
            }
        }
        assert_eq!(seen.last(), Some(&5));
        assert!(seen.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[tokio::test]
    async fn delete_notifies_subscribers() {
        let store = MemoryRoomStore::new();
        store.create("r1", RoomState::fresh()).await.unwrap();
        let mut events = store.subscribe("r1");
        events.next().await.unwrap();

        assert!(store.delete("r1"));
        assert_eq!(events.next().await, Some(RoomEvent::NotFound));
        assert!(store.load("r1").await.is_err());
    }
}
