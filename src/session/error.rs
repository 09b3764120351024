use thiserror::Error;

use crate::{
    dao::{room::UpdateError, storage::StorageError},
    session::{identity::InvalidParticipantId, rules::RuleError, state_machine::InvalidTransition},
};

/// Errors surfaced by [`RoomSession`](super::RoomSession) operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// A game rule refused the operation.
    #[error(transparent)]
    Rule(#[from] RuleError),
    /// The room record does not exist.
    #[error("room `{0}` not found")]
    RoomNotFound(String),
    /// The operation needs a joined session.
    #[error("session is not joined to a room")]
    NotJoined,
    /// Caller-supplied input was rejected before reaching the store.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// The local phase does not allow the operation.
    #[error(transparent)]
    InvalidState(#[from] InvalidTransition),
    /// A `leave` or `play_again` overtook this operation; its result was discarded.
    #[error("session moved on before the operation completed")]
    Superseded,
    /// Transient failure still present after local retries.
    #[error("transient failure after {attempts} attempt(s): {source}")]
    Transient {
        /// Number of attempts made.
        attempts: u32,
        /// Last error observed.
        #[source]
        source: StorageError,
    },
    /// Non-transient storage failure.
    #[error(transparent)]
    Storage(StorageError),
}

impl SessionError {
    /// Whether the caller may retry the same operation later.
    pub fn is_transient(&self) -> bool {
        matches!(self, SessionError::Transient { .. })
    }
}

impl From<StorageError> for SessionError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { room_id } => SessionError::RoomNotFound(room_id),
            other => SessionError::Storage(other),
        }
    }
}

impl From<UpdateError<RuleError>> for SessionError {
    fn from(err: UpdateError<RuleError>) -> Self {
        match err {
            UpdateError::Rejected(rule) => SessionError::Rule(rule),
            UpdateError::Storage(storage) => storage.into(),
        }
    }
}

impl From<InvalidParticipantId> for SessionError {
    fn from(err: InvalidParticipantId) -> Self {
        SessionError::InvalidInput(err.to_string())
    }
}
