use thiserror::Error;
use uuid::Uuid;

use crate::dao::models::ParticipantId;

const MAX_ID_LENGTH: usize = 64;

/// Rejected caller-supplied participant identifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid participant id `{0}`: expected 1-64 characters of [A-Za-z0-9_-]")]
pub struct InvalidParticipantId(pub String);

impl ParticipantId {
    /// Fresh random identifier (UUID v4, 122 random bits, simple hex form).
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4().simple().to_string())
    }

    /// Accept an identifier a client kept from an earlier session (e.g. across a reload).
    pub fn parse(raw: &str) -> Result<Self, InvalidParticipantId> {
        let valid = !raw.is_empty()
            && raw.len() <= MAX_ID_LENGTH
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if valid {
            Ok(Self::new(raw))
        } else {
            Err(InvalidParticipantId(raw.to_owned()))
        }
    }
}

/// Identity of the local participant for the lifetime of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    participant_id: ParticipantId,
}

impl SessionIdentity {
    /// Generate a new identity.
    pub fn new() -> Self {
        Self {
            participant_id: ParticipantId::generate(),
        }
    }

    /// Resume an identity the client already holds.
    pub fn resume(participant_id: ParticipantId) -> Self {
        Self { participant_id }
    }

    /// The stable participant identifier.
    pub fn participant_id(&self) -> &ParticipantId {
        &self.participant_id
    }
}

impl Default for SessionIdentity {
    fn default() -> Self {
        Self::new()
    }
}
