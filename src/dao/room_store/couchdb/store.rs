use std::sync::Arc;

use futures::{future::BoxFuture, stream::BoxStream};
use reqwest::{Client, Method, StatusCode};
use tracing::debug;

use crate::dao::{
    models::{Revision, RoomState, Versioned},
    room_store::{RoomEvent, RoomStore, polling::poll_room},
    storage::{StorageError, StorageResult},
};

use super::{
    config::CouchConfig,
    error::{CouchDaoError, CouchResult},
    models::{CouchRoomDocument, PutResponse, room_doc_id},
};

const MAX_REPLACE_ATTEMPTS: u32 = 8;

/// CouchDB-backed [`RoomStore`]; compare-and-swap relies on `_rev` preconditions.
#[derive(Clone)]
pub struct CouchRoomStore {
    client: Client,
    base_url: Arc<str>,
    database: Arc<str>,
    auth: Option<(Arc<str>, Arc<str>)>,
    config: Arc<CouchConfig>,
}

/// Outcome of a document `PUT`.
enum PutOutcome {
    Stored(Versioned),
    Conflict,
}

impl CouchRoomStore {
    /// Establish a connection to CouchDB and ensure the database exists.
    pub async fn connect(config: CouchConfig) -> CouchResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|source| CouchDaoError::Client { source })?;

        let base_url = Arc::<str>::from(config.base_url.trim_end_matches('/'));
        let database = Arc::<str>::from(config.database.as_str());
        let auth = config
            .username
            .clone()
            .zip(config.password.clone())
            .map(|(u, p)| (Arc::<str>::from(u), Arc::<str>::from(p)));

        let store = Self {
            client,
            base_url,
            database,
            auth,
            config: Arc::new(config),
        };

        store.ensure_database().await?;
        Ok(store)
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.auth {
            Some((ref user, ref pass)) => builder.basic_auth(user.as_ref(), Some(pass.as_ref())),
            None => builder,
        }
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}/{}", self.base_url, self.database, path);
        self.authorize(self.client.request(method, url))
    }

    async fn ensure_database(&self) -> CouchResult<()> {
        let database = self.database.to_string();
        let url = format!("{}/{}", self.base_url, self.database);

        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(|source| CouchDaoError::Database {
                action: "query",
                database: database.clone(),
                source,
            })?;

        match response.status() {
            StatusCode::OK => Ok(()),
            StatusCode::NOT_FOUND => {
                let create = self
                    .authorize(self.client.put(&url))
                    .send()
                    .await
                    .map_err(|source| CouchDaoError::Database {
                        action: "create",
                        database: database.clone(),
                        source,
                    })?;
                // 412: created concurrently by another instance.
                if create.status().is_success() || create.status() == StatusCode::PRECONDITION_FAILED
                {
                    Ok(())
                } else {
                    Err(CouchDaoError::DatabaseStatus {
                        database,
                        status: create.status(),
                    })
                }
            }
            other => Err(CouchDaoError::DatabaseStatus {
                database,
                status: other,
            }),
        }
    }

    async fn get_room(&self, room_id: &str) -> CouchResult<Option<CouchRoomDocument>> {
        let doc_id = room_doc_id(room_id);
        let response = self
            .request(Method::GET, &doc_id)
            .send()
            .await
            .map_err(|source| CouchDaoError::Request {
                room_id: room_id.to_owned(),
                source,
            })?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => response
                .json::<CouchRoomDocument>()
                .await
                .map(Some)
                .map_err(|source| CouchDaoError::Decode {
                    room_id: room_id.to_owned(),
                    source,
                }),
            status => Err(CouchDaoError::UnexpectedStatus {
                room_id: room_id.to_owned(),
                status,
            }),
        }
    }

    /// `PUT` the room; without `rev` this only succeeds when no live document exists.
    async fn put_room(
        &self,
        room_id: &str,
        rev: Option<String>,
        state: RoomState,
    ) -> CouchResult<PutOutcome> {
        let document = CouchRoomDocument::new(room_id, rev, state);
        let doc_id = document.id.clone();
        let response = self
            .request(Method::PUT, &doc_id)
            .json(&document)
            .send()
            .await
            .map_err(|source| CouchDaoError::Request {
                room_id: room_id.to_owned(),
                source,
            })?;

        match response.status() {
            StatusCode::CONFLICT => Ok(PutOutcome::Conflict),
            status if status.is_success() => {
                let body = response.json::<PutResponse>().await.map_err(|source| {
                    CouchDaoError::Decode {
                        room_id: room_id.to_owned(),
                        source,
                    }
                })?;
                Ok(PutOutcome::Stored(document.into_versioned(body.rev)))
            }
            status => Err(CouchDaoError::UnexpectedStatus {
                room_id: room_id.to_owned(),
                status,
            }),
        }
    }

    async fn load_room(&self, room_id: &str) -> StorageResult<Versioned> {
        let document = self
            .get_room(room_id)
            .await?
            .ok_or_else(|| StorageError::not_found(room_id))?;
        let rev = document.rev.clone().unwrap_or_default();
        Ok(document.into_versioned(rev))
    }

    async fn create_room(&self, room_id: &str, state: RoomState) -> StorageResult<Versioned> {
        match self.put_room(room_id, None, state).await? {
            PutOutcome::Stored(versioned) => Ok(versioned),
            PutOutcome::Conflict => Err(StorageError::already_exists(room_id)),
        }
    }

    async fn compare_and_swap_room(
        &self,
        room_id: &str,
        expected: Revision,
        state: RoomState,
    ) -> StorageResult<Versioned> {
        match self
            .put_room(room_id, Some(expected.as_str().to_owned()), state)
            .await?
        {
            PutOutcome::Stored(versioned) => Ok(versioned),
            PutOutcome::Conflict => match self.get_room(room_id).await? {
                Some(_) => Err(StorageError::conflict(room_id)),
                None => Err(StorageError::not_found(room_id)),
            },
        }
    }

    async fn replace_room(&self, room_id: &str, state: RoomState) -> StorageResult<Versioned> {
        for _ in 0..MAX_REPLACE_ATTEMPTS {
            let rev = self.get_room(room_id).await?.and_then(|document| document.rev);
            match self.put_room(room_id, rev, state.clone()).await? {
                PutOutcome::Stored(versioned) => return Ok(versioned),
                PutOutcome::Conflict => {
                    debug!(room_id, "room replace raced with another writer; retrying");
                }
            }
        }

        Err(StorageError::ConcurrentUpdateFailed {
            room_id: room_id.to_owned(),
            attempts: MAX_REPLACE_ATTEMPTS,
        })
    }

    async fn ping(&self) -> CouchResult<()> {
        let database = self.database.to_string();
        let url = format!("{}/{}", self.base_url, self.database);
        let response = self
            .authorize(self.client.head(&url))
            .send()
            .await
            .map_err(|source| CouchDaoError::Database {
                action: "ping",
                database: database.clone(),
                source,
            })?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(CouchDaoError::DatabaseStatus {
                database,
                status: response.status(),
            })
        }
    }
}

impl RoomStore for CouchRoomStore {
    fn create(
        &self,
        room_id: &str,
        initial: RoomState,
    ) -> BoxFuture<'static, StorageResult<Versioned>> {
        let store = self.clone();
        let room_id = room_id.to_owned();
        Box::pin(async move { store.create_room(&room_id, initial).await })
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
        let every = self.config.poll_interval;
        poll_room(room_id.to_owned(), every, {
            let room_id = room_id.to_owned();
            move || store.load(&room_id)
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.ensure_database().await.map_err(Into::into) })
    }
}
