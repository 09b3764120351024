use std::time::Instant;

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Phases a participant's session goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// Not part of any room.
    Idle,
    /// Joined a room that still lacks the second player.
    AwaitingPeer,
    /// Both players are present and rounds are being played.
    Active,
    /// The room ended with enough matches.
    GameWon,
    /// The room ended below the win threshold.
    GameLost,
}

impl SessionPhase {
    /// Whether the session is attached to a room.
    pub fn is_joined(self) -> bool {
        !matches!(self, SessionPhase::Idle)
    }
}

/// How a finished game ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Combined score reached the threshold.
    Won,
    /// Combined score stayed below the threshold.
    Lost,
}

/// Events that can be applied to the session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// The participant was registered in a room.
    Join,
    /// A snapshot showed a second participant.
    PeerJoined,
    /// A snapshot showed a terminal room status.
    Finish(Outcome),
    /// The participant reset the room to play again.
    PlayAgain,
    /// A snapshot no longer lists the participant, or the room vanished.
    Evicted,
    /// The participant left the room locally.
    Leave,
}

/// Error returned when attempting to apply an invalid transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition {
    /// The phase the state machine was in when the invalid event was received.
    pub from: SessionPhase,
    /// The event that cannot be applied from this phase.
    pub event: SessionEvent,
}

/// Errors that can occur when planning a state machine transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    /// A transition is already pending and must be applied or aborted.
    #[error("a session transition is already pending")]
    AlreadyPending,
    /// The requested transition is not valid from the current phase.
    #[error(transparent)]
    InvalidTransition(InvalidTransition),
}

/// Errors that can occur when applying a planned state machine transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplyError {
    /// No transition is currently pending.
    #[error("no session transition is pending")]
    NoPending,
    /// Plan ID does not match the pending plan.
    #[error("pending transition {expected} does not match {got}")]
    IdMismatch {
        /// Expected plan ID.
        expected: PlanId,
        /// Provided plan ID.
        got: PlanId,
    },
    /// State machine phase changed since the plan was created.
    #[error("session phase changed during transition (expected {expected:?}, got {actual:?})")]
    PhaseMismatch {
        /// Phase when plan was created.
        expected: SessionPhase,
        /// Current phase.
        actual: SessionPhase,
    },
}

/// Unique identifier for a planned state transition.
pub type PlanId = Uuid;

/// A planned transition that has been validated but not yet applied.
///
/// Operations that need a store round-trip plan first, do the work, then apply or abort.
#[derive(Debug, Clone)]
pub struct Plan {
    /// Unique identifier for this plan.
    pub id: PlanId,
    /// Phase the state machine is currently in.
    pub from: SessionPhase,
    /// Phase the state machine will transition to.
    pub to: SessionPhase,
    /// Event that triggered this transition.
    pub event: SessionEvent,
    /// Timestamp when this plan was created.
    pub pending_since: Instant,
}

/// Snapshot of the current state machine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    /// Current phase of the state machine.
    pub phase: SessionPhase,
    /// Increments on each applied transition.
    pub version: usize,
    /// Pending transition phase, if a transition is planned but not yet applied.
    pub pending: Option<SessionPhase>,
}

/// Session phase machine: `Idle -> AwaitingPeer -> Active -> GameWon | GameLost -> Idle`.
#[derive(Debug, Clone)]
pub struct SessionStateMachine {
    phase: SessionPhase,
    version: usize,
    pending: Option<Plan>,
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self {
            phase: SessionPhase::Idle,
            version: 0,
            pending: None,
        }
    }
}

impl SessionStateMachine {
    /// Create a new state machine initialised in the idle state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inspect the current phase.
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Create a snapshot of the current state machine state.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            phase: self.phase,
            version: self.version,
            pending: self.pending.as_ref().map(|plan| plan.to),
        }
    }

    /// Validate `event` against the current phase and remember it as the pending plan.
    pub fn plan(&mut self, event: SessionEvent) -> Result<Plan, PlanError> {
        if self.pending.is_some() {
            return Err(PlanError::AlreadyPending);
        }

        let next = self
            .compute_transition(event)
            .map_err(PlanError::InvalidTransition)?;

        let plan = Plan {
            id: Uuid::new_v4(),
            from: self.phase,
            to: next,
            event,
            pending_since: Instant::now(),
        };

        self.pending = Some(plan.clone());

        Ok(plan)
    }

    /// Apply a planned transition, returning the new phase.
    pub fn apply(&mut self, plan_id: PlanId) -> Result<SessionPhase, ApplyError> {
        let plan = self.pending.take().ok_or(ApplyError::NoPending)?;

        if plan.id != plan_id {
            let expected = plan.id;
            self.pending = Some(plan);
            return Err(ApplyError::IdMismatch {
                expected,
                got: plan_id,
            });
        }

        if self.phase != plan.from {
            return Err(ApplyError::PhaseMismatch {
                expected: plan.from,
                actual: self.phase,
            });
        }

        self.phase = plan.to;
        self.version += 1;

        Ok(self.phase)
    }

    /// Drop the pending plan without applying it. Unknown ids are ignored.
    pub fn abort(&mut self, plan_id: PlanId) {
        if self.pending.as_ref().is_some_and(|plan| plan.id == plan_id) {
            self.pending = None;
        }
    }

    /// Drop whatever plan is pending, used when the session is torn down mid-operation.
    pub fn cancel_pending(&mut self) -> Option<Plan> {
        self.pending.take()
    }

    /// Plan and apply `event` in one step, for transitions with no work attached.
    pub fn fire(&mut self, event: SessionEvent) -> Result<SessionPhase, PlanError> {
        let plan = self.plan(event)?;
        self.apply(plan.id)
            .map_err(|_| PlanError::AlreadyPending)
    }

    fn compute_transition(&self, event: SessionEvent) -> Result<SessionPhase, InvalidTransition> {
        use SessionPhase::*;

        let next = match (self.phase, event) {
            (Idle, SessionEvent::Join) => AwaitingPeer,
            (AwaitingPeer, SessionEvent::PeerJoined) => Active,
            (AwaitingPeer | Active, SessionEvent::Finish(Outcome::Won)) => GameWon,
            (AwaitingPeer | Active, SessionEvent::Finish(Outcome::Lost)) => GameLost,
            (AwaitingPeer | Active | GameWon | GameLost, SessionEvent::PlayAgain) => Idle,
            (AwaitingPeer | Active | GameWon | GameLost, SessionEvent::Evicted) => Idle,
            (_, SessionEvent::Leave) => Idle,
            (from, event) => return Err(InvalidTransition { from, event }),
        };

        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fire(sm: &mut SessionStateMachine, event: SessionEvent) -> SessionPhase {
        sm.fire(event).unwrap()
    }

    #[test]
    fn initial_state_is_idle() {
        let sm = SessionStateMachine::new();
        assert_eq!(sm.phase(), SessionPhase::Idle);
    }

    #[test]
    fn full_happy_path_through_game() {
        let mut sm = SessionStateMachine::new();

        assert_eq!(fire(&mut sm, SessionEvent::Join), SessionPhase::AwaitingPeer);
        assert_eq!(fire(&mut sm, SessionEvent::PeerJoined), SessionPhase::Active);
        assert_eq!(
            fire(&mut sm, SessionEvent::Finish(Outcome::Won)),
            SessionPhase::GameWon
        );
        assert_eq!(fire(&mut sm, SessionEvent::PlayAgain), SessionPhase::Idle);
        assert_eq!(sm.snapshot().version, 4);
    }

    #[test]
    fn peer_joined_only_fires_once() {
        let mut sm = SessionStateMachine::new();
        fire(&mut sm, SessionEvent::Join);
        fire(&mut sm, SessionEvent::PeerJoined);

        let err = sm.plan(SessionEvent::PeerJoined).unwrap_err();
        assert_eq!(
            err,
            PlanError::InvalidTransition(InvalidTransition {
                from: SessionPhase::Active,
                event: SessionEvent::PeerJoined,
            })
        );
    }

    #[test]
    fn finished_game_cannot_finish_again() {
        let mut sm = SessionStateMachine::new();
        fire(&mut sm, SessionEvent::Join);
        fire(&mut sm, SessionEvent::Finish(Outcome::Lost));

        assert!(sm.plan(SessionEvent::Finish(Outcome::Won)).is_err());
        assert!(sm.plan(SessionEvent::Join).is_err());
    }

    #[test]
    fn idle_session_cannot_play_again_or_be_evicted() {
        let mut sm = SessionStateMachine::new();
        assert!(sm.plan(SessionEvent::PlayAgain).is_err());
        assert!(sm.plan(SessionEvent::Evicted).is_err());
        assert_eq!(fire(&mut sm, SessionEvent::Leave), SessionPhase::Idle);
    }

    #[test]
    fn pending_plan_blocks_other_transitions() {
        let mut sm = SessionStateMachine::new();
        let plan = sm.plan(SessionEvent::Join).unwrap();
        assert_eq!(sm.snapshot().pending, Some(SessionPhase::AwaitingPeer));
        assert_eq!(sm.plan(SessionEvent::Leave).unwrap_err(), PlanError::AlreadyPending);

        assert_eq!(sm.apply(plan.id), Ok(SessionPhase::AwaitingPeer));
        assert_eq!(sm.snapshot().pending, None);
    }

    #[test]
    fn apply_with_wrong_id_keeps_plan() {
        let mut sm = SessionStateMachine::new();
        let plan = sm.plan(SessionEvent::Join).unwrap();

        let err = sm.apply(Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, ApplyError::IdMismatch { .. }));
        assert_eq!(sm.apply(plan.id), Ok(SessionPhase::AwaitingPeer));
    }

    #[test]
    fn abort_clears_pending() {
        let mut sm = SessionStateMachine::new();
        let plan = sm.plan(SessionEvent::Join).unwrap();
        sm.abort(plan.id);
        assert!(sm.pending.is_none());
        assert_eq!(sm.phase(), SessionPhase::Idle);
    }
}
