mod backend;
#[cfg(feature = "couch-store")]
pub mod couchdb;
pub mod memory;
#[cfg(feature = "mongo-store")]
pub mod mongodb;
mod polling;

pub use backend::{STORE_BACKEND_ENV, StoreBackend, UnknownBackend};

use futures::{future::BoxFuture, stream::BoxStream};

use crate::dao::{
    models::{Revision, RoomState, Versioned},
    storage::StorageResult,
};

/// Item delivered by [`RoomStore::subscribe`].
#[derive(Debug, Clone, PartialEq)]
pub enum RoomEvent {
    /// Current content of the record.
    Snapshot(Versioned),
    /// The record does not exist (yet, or anymore).
    NotFound,
}

/// Abstraction over the shared backend holding one mutable record per room.
///
/// Writes are either fresh creates, full replacements, or compare-and-swap commits
/// against the revision a caller read. Read-modify-write sequences go through
/// [`RoomRepository::apply_update`](crate::dao::room::RoomRepository::apply_update),
/// never through an unconditional overwrite.
pub trait RoomStore: Send + Sync {
    /// Create the record, failing with `AlreadyExists` when one is present.
    fn create(
        &self,
        room_id: &str,
        initial: RoomState,
    ) -> BoxFuture<'static, StorageResult<Versioned>>;

    /// Read the record, failing with `NotFound` when absent.
    fn load(&self, room_id: &str) -> BoxFuture<'static, StorageResult<Versioned>>;

    /// Commit `next` only if the stored revision is still `expected`.
    ///
    /// Fails with `Conflict` when the record moved on and `NotFound` when it vanished.
    fn compare_and_swap(
        &self,
        room_id: &str,
        expected: Revision,
        next: RoomState,
    ) -> BoxFuture<'static, StorageResult<Versioned>>;

    /// Replace the whole record, creating it when absent.
    fn replace(&self, room_id: &str, state: RoomState)
    -> BoxFuture<'static, StorageResult<Versioned>>;

    /// Stream the current record followed by every committed change.
    ///
    /// Dropping the stream unsubscribes.
    fn subscribe(&self, room_id: &str) -> BoxStream<'static, RoomEvent>;

    /// Cheap connectivity probe.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;

    /// Re-establish the backend connection after a failed health check.
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
