use serde::Serialize;
use utoipa::ToSchema;

use crate::{
    dao::models::{ParticipantId, RoomState, RoomStatus},
    session::{
        catalog::{Prompt, PromptCatalog},
        state_machine::SessionPhase,
    },
};

/// Local view of a room, derived from one snapshot and fully replaced by the next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct RoomView {
    /// Current round index.
    pub round: u32,
    /// Room outcome.
    #[schema(value_type = String, example = "IN_PROGRESS")]
    pub status: RoomStatus,
    /// Session phase.
    #[schema(value_type = String, example = "active")]
    pub phase: SessionPhase,
    /// Option the local participant picked this round.
    pub my_choice: Option<String>,
    /// Option the other participant picked this round.
    pub opponent_choice: Option<String>,
    /// Display name of the other participant, once present.
    pub opponent_name: Option<String>,
    /// Matched rounds counted for the local participant.
    pub my_score: u32,
    /// Sum of every participant's score.
    pub team_score: u32,
    /// The local participant chose and the opponent has not yet.
    pub waiting: bool,
    /// Both participants picked the same option.
    pub matched: bool,
    /// The two options of the current round.
    pub prompt: Option<Prompt>,
    /// Whether the local participant is still listed in the room.
    pub joined: bool,
}

impl RoomView {
    /// View of a session that is not attached to any room.
    pub fn detached() -> Self {
        Self {
            round: 0,
            status: RoomStatus::InProgress,
            phase: SessionPhase::Idle,
            my_choice: None,
            opponent_choice: None,
            opponent_name: None,
            my_score: 0,
            team_score: 0,
            waiting: false,
            matched: false,
            prompt: None,
            joined: false,
        }
    }

    /// Derive the view `me` has of `state`.
    pub fn derive(
        state: &RoomState,
        me: &ParticipantId,
        phase: SessionPhase,
        catalog: &PromptCatalog,
    ) -> Self {
        let mine = state.participant(me);
        let opponent = state.opponent_of(me).map(|(_, opponent)| opponent);

        let my_choice = mine.and_then(|p| p.current_choice.clone());
        let opponent_choice = opponent.and_then(|p| p.current_choice.clone());
        let waiting = my_choice.is_some() && opponent_choice.is_none();
        let matched = my_choice.is_some() && my_choice == opponent_choice;

        Self {
            round: state.round,
            status: state.status,
            phase,
            my_score: mine.map_or(0, |p| p.score),
            team_score: state.team_score(),
            opponent_name: opponent.map(|p| p.display_name.clone()),
            my_choice,
            opponent_choice,
            waiting,
            matched,
            prompt: catalog.get(state.round).cloned(),
            joined: mine.is_some(),
        }
    }
}

/// Fired once per round when both participants picked the same option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct MatchEvent {
    /// Round in which the match happened.
    pub round: u32,
    /// The option both participants picked.
    pub option: String,
}

/// Turns the level-triggered `matched` flag into one event per round.
#[derive(Debug, Default)]
pub struct MatchTracker {
    notified_round: Option<u32>,
}

impl MatchTracker {
    /// Feed a freshly derived view; returns the event to emit, if any.
    pub fn observe(&mut self, view: &RoomView) -> Option<MatchEvent> {
        if view.my_choice.is_none() || self.notified_round != Some(view.round) {
            // A cleared choice or a new round re-arms the tracker.
            self.notified_round = None;
        }
        if !view.matched || self.notified_round.is_some() {
            return None;
        }

        self.notified_round = Some(view.round);
        view.my_choice.clone().map(|option| MatchEvent {
            round: view.round,
            option,
        })
    }

    /// Forget any notification, e.g. after the room was replayed.
    pub fn reset(&mut self) {
        self.notified_round = None;
    }
}
