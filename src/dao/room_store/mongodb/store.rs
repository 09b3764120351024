use std::sync::Arc;

use futures::{future::BoxFuture, stream::BoxStream};
use mongodb::{
    Client, Collection, Database,
    bson::doc,
    error::{Error as MongoError, ErrorKind, WriteFailure},
};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{
    config::MongoConfig,
    connection::establish_connection,
    error::{MongoDaoError, MongoResult},
    models::{MongoRoomDocument, doc_id, doc_id_at},
};
use crate::dao::{
    models::{Revision, RoomState, Versioned},
    room_store::{RoomEvent, RoomStore, polling::poll_room},
    storage::{StorageError, StorageResult},
};

const ROOM_COLLECTION_NAME: &str = "rooms";
const DUPLICATE_KEY: i32 = 11000;
const MAX_REPLACE_ATTEMPTS: u32 = 8;

/// MongoDB-backed [`RoomStore`].
#[derive(Clone)]
pub struct MongoRoomStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    state: RwLock<MongoState>,
    config: MongoConfig,
}

struct MongoState {
    #[allow(dead_code)]
    client: Client,
    database: Database,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = {
            let guard = self.state.read().await;
            guard.database.clone()
        };

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (client, database) =
            establish_connection(&self.config.options, &self.config.database_name).await?;
        let mut guard = self.state.write().await;
        guard.client = client;
        guard.database = database;
        info!("MongoDB connection re-established");
        Ok(())
    }
}

impl MongoRoomStore {
    /// Connect to MongoDB. Rooms are keyed by `_id`, so no extra index is needed.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (client, database) =
            establish_connection(&config.options, &config.database_name).await?;

        Ok(Self {
            inner: Arc::new(MongoInner {
                state: RwLock::new(MongoState { client, database }),
                config,
            }),
        })
    }

    async fn collection(&self) -> Collection<MongoRoomDocument> {
        let guard = self.inner.state.read().await;
        guard
            .database
            .collection::<MongoRoomDocument>(ROOM_COLLECTION_NAME)
    }

    async fn find(&self, room_id: &str) -> MongoResult<Option<MongoRoomDocument>> {
        self.collection()
            .await
            .find_one(doc_id(room_id))
            .await
            .map_err(|source| MongoDaoError::LoadRoom {
                room_id: room_id.to_owned(),
                source,
            })
    }

    async fn load_room(&self, room_id: &str) -> StorageResult<Versioned> {
        match self.find(room_id).await? {
            Some(document) => Ok(document.into()),
            None => Err(StorageError::not_found(room_id)),
        }
    }

    async fn insert_room(&self, room_id: &str, state: RoomState) -> StorageResult<Versioned> {
        let document = MongoRoomDocument::new(room_id, 1, state);
        match self.collection().await.insert_one(&document).await {
            Ok(_) => Ok(document.into()),
            Err(source) if is_duplicate_key(&source) => Err(StorageError::already_exists(room_id)),
            Err(source) => Err(save_error(room_id, source).into()),
        }
    }

    async fn swap_room(
        &self,
        room_id: &str,
        expected: i64,
        state: RoomState,
    ) -> StorageResult<Versioned> {
        let document = MongoRoomDocument::new(room_id, expected + 1, state);
        let result = self
            .collection()
            .await
            .replace_one(doc_id_at(room_id, expected), &document)
            .await
            .map_err(|source| save_error(room_id, source))?;

        if result.matched_count == 1 {
            return Ok(document.into());
        }
        match self.find(room_id).await? {
            Some(_) => Err(StorageError::conflict(room_id)),
            None => Err(StorageError::not_found(room_id)),
        }
    }

    async fn compare_and_swap_room(
        &self,
        room_id: &str,
        expected: Revision,
        state: RoomState,
    ) -> StorageResult<Versioned> {
        let Some(version) = expected.as_counter().and_then(|v| i64::try_from(v).ok()) else {
            return Err(StorageError::conflict(room_id));
        };
        self.swap_room(room_id, version, state).await
    }

    /// Overwrite the room while still bumping `version`, so pending CAS writers conflict.
    async fn replace_room(&self, room_id: &str, state: RoomState) -> StorageResult<Versioned> {
        for _ in 0..MAX_REPLACE_ATTEMPTS {
            let outcome = match self.find(room_id).await? {
                Some(current) => self.swap_room(room_id, current.version, state.clone()).await,
                None => self.insert_room(room_id, state.clone()).await,
            };
            match outcome {
                Err(StorageError::Conflict { .. })
                | Err(StorageError::AlreadyExists { .. })
                | Err(StorageError::NotFound { .. }) => {
                    debug!(room_id, "room replace raced with another writer; retrying");
                }
                other => return other,
            }
        }

        Err(StorageError::ConcurrentUpdateFailed {
            room_id: room_id.to_owned(),
            attempts: MAX_REPLACE_ATTEMPTS,
        })
    }
}

impl RoomStore for MongoRoomStore {
    fn create(
        &self,
        room_id: &str,
        initial: RoomState,
    ) -> BoxFuture<'static, StorageResult<Versioned>> {
        let store = self.clone();
        let room_id = room_id.to_owned();
        Box::pin(async move { store.insert_room(&room_id, initial).await })
    }

    fn load(&self, room_id: &str) -> BoxFuture<'static, StorageResult<Versioned>> {
        let store = self.clone();
        let room_id = room_id.to_owned();
        Box::pin(async move { store.load_room(&room_id).await })
    }

    fn compare_and_swap(
        &self,
        room_id: &str,
        expected: Revision,
        next: RoomState,
    ) -> BoxFuture<'static, StorageResult<Versioned>> {
        let store = self.clone();
        let room_id = room_id.to_owned();
        Box::pin(async move { store.compare_and_swap_room(&room_id, expected, next).await })
    }

    fn replace(
        &self,
        room_id: &str,
        state: RoomState,
    ) -> BoxFuture<'static, StorageResult<Versioned>> {
        let store = self.clone();
        let room_id = room_id.to_owned();
        Box::pin(async move { store.replace_room(&room_id, state).await })
    }

    fn subscribe(&self, room_id: &str) -> BoxStream<'static, RoomEvent> {
        let store = self.clone();
        let every = self.inner.config.poll_interval;
        poll_room(room_id.to_owned(), every, {
            let room_id = room_id.to_owned();
            move || store.load(&room_id)
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move { inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move { inner.reconnect().await.map_err(Into::into) })
    }
}

fn save_error(room_id: &str, source: MongoError) -> MongoDaoError {
    MongoDaoError::SaveRoom {
        room_id: room_id.to_owned(),
        source,
    }
}

fn is_duplicate_key(err: &MongoError) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write)) if write.code == DUPLICATE_KEY
    )
}
