//! Error types of the CouchDB room store.

use reqwest::StatusCode;
use thiserror::Error;

/// Result alias for CouchDB room store internals.
pub type CouchResult<T> = Result<T, CouchDaoError>;

#[derive(Debug, Error)]
pub enum CouchDaoError {
    #[error("missing CouchDB environment variable `{var}`")]
    MissingEnvVar { var: &'static str },
    #[error("failed to build CouchDB client")]
    Client {
        #[source]
        source: reqwest::Error,
    },
    /// A database-level request (`query`, `create`, `ping`) could not be sent.
    #[error("CouchDB database `{database}` {action} failed")]
    Database {
        action: &'static str,
        database: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("unexpected status {status} from CouchDB database `{database}`")]
    DatabaseStatus { database: String, status: StatusCode },
    /// A room document request could not be sent.
    #[error("CouchDB request for room `{room_id}` failed")]
    Request {
        room_id: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("unexpected status {status} from CouchDB for room `{room_id}`")]
    UnexpectedStatus { room_id: String, status: StatusCode },
    /// The room document did not decode into a [`RoomState`](crate::dao::models::RoomState).
    #[error("malformed CouchDB document for room `{room_id}`")]
    Decode {
        room_id: String,
        #[source]
        source: reqwest::Error,
    },
}
