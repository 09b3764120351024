use std::error::Error;
use thiserror::Error;

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error raised by room stores regardless of the underlying database.
#[derive(Debug, Error)]
pub enum StorageError {
    /// No record exists for the room.
    #[error("room `{room_id}` not found")]
    NotFound { room_id: String },
    /// A fresh create lost against an existing record.
    #[error("room `{room_id}` already exists")]
    AlreadyExists { room_id: String },
    /// The record changed between read and write.
    #[error("room `{room_id}` was modified concurrently")]
    Conflict { room_id: String },
    /// The compare-and-swap retry budget ran out.
    #[error("room `{room_id}` update failed after {attempts} concurrent attempt(s)")]
    ConcurrentUpdateFailed { room_id: String, attempts: u32 },
    #[error("storage unavailable: {message}")]
    Unavailable {
        message: String,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
}

impl StorageError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Unavailable {
            message,
            source: Box::new(source),
        }
    }

    pub(crate) fn not_found(room_id: &str) -> Self {
        StorageError::NotFound {
            room_id: room_id.to_owned(),
        }
    }

    pub(crate) fn conflict(room_id: &str) -> Self {
        StorageError::Conflict {
            room_id: room_id.to_owned(),
        }
    }

    pub(crate) fn already_exists(room_id: &str) -> Self {
        StorageError::AlreadyExists {
            room_id: room_id.to_owned(),
        }
    }

    /// Whether retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StorageError::Unavailable { .. } | StorageError::ConcurrentUpdateFailed { .. }
        )
    }
}
