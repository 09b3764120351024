//! Pure game rules evaluated against a freshly read [`RoomState`].
//!
//! Every function returns `Ok(None)` when the record should stay untouched,
//! `Ok(Some(next))` with the record to commit, or the reason the operation is refused.
//! They are meant to run inside [`RoomRepository::apply_update`](crate::dao::room::RoomRepository::apply_update).

use thiserror::Error;

use crate::{
    dao::models::{ParticipantId, ParticipantState, RoomState, RoomStatus},
    session::catalog::PromptCatalog,
};

/// Maximum number of distinct participants in a room.
pub const MAX_PARTICIPANTS: usize = 2;
/// Default combined score needed to win.
pub const DEFAULT_WIN_THRESHOLD: u32 = 5;

/// Why a rule refused an operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleError {
    /// A third distinct participant tried to join.
    #[error("room already has two participants")]
    RoomFull,
    /// The caller is not registered in the room.
    #[error("participant is not part of this room")]
    NotParticipant,
    /// The game reached a terminal status.
    #[error("game is over ({0:?})")]
    GameOver(RoomStatus),
    /// The caller already picked an option this round.
    #[error("a choice was already submitted this round")]
    AlreadyChose,
    /// The option is not offered in the current round.
    #[error("`{option}` is not an option in round {round}")]
    InvalidChoice { round: u32, option: String },
    /// Not every participant has chosen yet.
    #[error("waiting for every participant to choose")]
    NotReady,
    /// Someone else advanced the round first.
    #[error("round was already advanced")]
    AlreadyAdvanced,
}

impl RuleError {
    /// Outcomes that resolve themselves with the next snapshot.
    pub fn is_benign(&self) -> bool {
        matches!(self, RuleError::NotReady | RuleError::AlreadyAdvanced)
    }
}

/// Register `id` in the room, or refresh its display name when it is already there.
pub fn join(
    state: &RoomState,
    id: &ParticipantId,
    display_name: &str,
) -> Result<Option<RoomState>, RuleError> {
    if let Some(existing) = state.participant(id) {
        if existing.display_name == display_name {
            return Ok(None);
        }
        let mut next = state.clone();
        next.participants[id].display_name = display_name.to_owned();
        return Ok(Some(next));
    }

    if state.participants.len() >= MAX_PARTICIPANTS {
        return Err(RuleError::RoomFull);
    }

    let mut next = state.clone();
    next.participants
        .insert(id.clone(), ParticipantState::joined(display_name));
    Ok(Some(next))
}

/// Record `option` for `id`; a pick equal to another participant's scores the round.
///
/// On a match both the caller and every participant holding the same option gain one
/// point, so each player's score counts matched rounds.
pub fn submit_choice(
    state: &RoomState,
    id: &ParticipantId,
    option: &str,
    catalog: &PromptCatalog,
) -> Result<Option<RoomState>, RuleError> {
    if state.status.is_terminal() {
        return Err(RuleError::GameOver(state.status));
    }
    let participant = state.participant(id).ok_or(RuleError::NotParticipant)?;
    if participant.current_choice.is_some() {
        return Err(RuleError::AlreadyChose);
    }
    if !catalog.offers(state.round, option) {
        return Err(RuleError::InvalidChoice {
            round: state.round,
            option: option.to_owned(),
        });
    }

    let mut next = state.clone();
    let mut matched = false;
    for (other_id, other) in next.participants.iter_mut() {
        if other_id != id && other.current_choice.as_deref() == Some(option) {
            other.score += 1;
            matched = true;
        }
    }

    let me = &mut next.participants[id];
    me.current_choice = Some(option.to_owned());
    if matched {
        me.score += 1;
    }
    Ok(Some(next))
}

/// Move past `expected_round`, or end the game when it was the last one.
pub fn advance_round(
    state: &RoomState,
    expected_round: u32,
    catalog: &PromptCatalog,
    win_threshold: u32,
) -> Result<Option<RoomState>, RuleError> {
    if state.status.is_terminal() || state.round != expected_round {
        return Err(RuleError::AlreadyAdvanced);
    }
    if !state.everyone_chose() {
        return Err(RuleError::NotReady);
    }

    let mut next = state.clone();
    for participant in next.participants.values_mut() {
        participant.current_choice = None;
    }

    if catalog.is_last_round(state.round) {
        next.status = if next.team_score() >= win_threshold {
            RoomStatus::Won
        } else {
            RoomStatus::Lost
        };
    } else {
        next.round += 1;
    }
    Ok(Some(next))
}
