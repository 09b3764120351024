use std::{fmt, time::SystemTime};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Opaque participant identifier, generated client-side and stable for a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    /// Wrap an already validated identifier.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Overall outcome of a room. `Won` and `Lost` are terminal until the record is replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoomStatus {
    /// Rounds are still being played.
    InProgress,
    /// The last round was reached with enough combined points.
    Won,
    /// The last round was reached below the win threshold.
    Lost,
}

impl RoomStatus {
    /// Whether the game has ended.
    pub fn is_terminal(self) -> bool {
        !matches!(self, RoomStatus::InProgress)
    }
}

/// Per-participant slice of the shared record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantState {
    /// Name entered by the player when joining.
    pub display_name: String,
    /// Option picked for the current round, if any.
    #[serde(default)]
    pub current_choice: Option<String>,
    /// Number of matched rounds since the record was created.
    #[serde(default)]
    pub score: u32,
}

impl ParticipantState {
    /// A participant that just joined: no choice, no points.
    pub fn joined(display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            current_choice: None,
            score: 0,
        }
    }
}

/// The single shared record kept per room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomState {
    /// Index into the prompt catalog.
    pub round: u32,
    /// Current outcome.
    pub status: RoomStatus,
    /// Participants keyed by their session identifier.
    #[serde(default)]
    pub participants: IndexMap<ParticipantId, ParticipantState>,
}

impl Default for RoomState {
    fn default() -> Self {
        Self::fresh()
    }
}

impl RoomState {
    /// Record used when a room is created or replayed.
    pub fn fresh() -> Self {
        Self {
            round: 0,
            status: RoomStatus::InProgress,
            participants: IndexMap::new(),
        }
    }

    /// Sum of every participant's score.
    pub fn team_score(&self) -> u32 {
        self.participants.values().map(|p| p.score).sum()
    }

    /// Look up a participant by id.
    pub fn participant(&self, id: &ParticipantId) -> Option<&ParticipantState> {
        self.participants.get(id)
    }

    /// First participant that is not `id`.
    pub fn opponent_of(&self, id: &ParticipantId) -> Option<(&ParticipantId, &ParticipantState)> {
        self.participants.iter().find(|(other, _)| *other != id)
    }

    /// Whether every registered participant has picked an option this round.
    pub fn everyone_chose(&self) -> bool {
        !self.participants.is_empty()
            && self
                .participants
                .values()
                .all(|p| p.current_choice.is_some())
    }
}

/// Backend-specific token identifying one committed version of a record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Revision(String);

impl Revision {
    /// Wrap a backend revision string.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Revision for counter-based backends.
    pub fn from_counter(counter: u64) -> Self {
        Self(counter.to_string())
    }

    /// Parse a counter-based revision back.
    pub fn as_counter(&self) -> Option<u64> {
        self.0.parse().ok()
    }

    /// Monotonic sequence number, when the backend encodes one.
    ///
    /// Counter revisions are the sequence; CouchDB `_rev` values (`N-hash`) carry it
    /// as their prefix.
    pub fn sequence(&self) -> Option<u64> {
        self.as_counter().or_else(|| {
            self.0
                .split_once('-')
                .and_then(|(prefix, _)| prefix.parse().ok())
        })
    }

    /// Borrow the raw revision.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A record together with the revision it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned {
    /// Revision to hand back to `compare_and_swap`.
    pub revision: Revision,
    /// Record content.
    pub state: RoomState,
    /// Commit time as recorded by the backend.
    pub updated_at: SystemTime,
}
