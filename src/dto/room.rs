use serde::Serialize;
use serde_with::skip_serializing_none;
use utoipa::ToSchema;

use crate::dao::models::{RoomStatus, Versioned};
use crate::dto::format_system_time;

/// One participant of the room record.
///
/// Participant ids never leave the server; players are identified by join position.
#[skip_serializing_none]
#[derive(Debug, Serialize, ToSchema)]
pub struct ParticipantSummary {
    /// Join order, starting at 0.
    pub seat: usize,
    /// Name entered when joining.
    pub display_name: String,
    /// Option picked this round, if any.
    pub current_choice: Option<String>,
    /// Matched rounds.
    pub score: u32,
}

/// Room record as the store holds it, minus participant ids.
#[derive(Debug, Serialize, ToSchema)]
pub struct RoomRecord {
    /// Room identifier.
    pub room_id: String,
    /// Current round index.
    pub round: u32,
    /// Room outcome.
    #[schema(value_type = String, example = "IN_PROGRESS")]
    pub status: RoomStatus,
    /// Participants in join order.
    pub participants: Vec<ParticipantSummary>,
    /// Sum of every participant's score.
    pub team_score: u32,
    /// Opaque revision token of this version of the record.
    pub revision: String,
    /// RFC 3339 commit time.
    pub updated_at: String,
}

impl RoomRecord {
    /// Public rendition of a stored record.
    pub fn from_versioned(room_id: &str, versioned: &Versioned) -> Self {
        let state = &versioned.state;
        Self {
            room_id: room_id.to_owned(),
            round: state.round,
            status: state.status,
            participants: state
                .participants
                .values()
                .enumerate()
                .map(|(seat, participant)| ParticipantSummary {
                    seat,
                    display_name: participant.display_name.clone(),
                    current_choice: participant.current_choice.clone(),
                    score: participant.score,
                })
                .collect(),
            team_score: state.team_score(),
            revision: versioned.revision.to_string(),
            updated_at: format_system_time(versioned.updated_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use super::*;
    use crate::dao::models::{ParticipantId, ParticipantState, Revision, RoomState};

    #[test]
    fn record_lists_participants_in_join_order() {
        let mut state = RoomState::fresh();
        state
            .participants
            .insert(ParticipantId::new("p1"), ParticipantState::joined("Ada"));
        state
            .participants
            .insert(ParticipantId::new("p2"), ParticipantState::joined("Bo"));
        let versioned = Versioned {
            revision: Revision::from_counter(3),
            state,
            updated_at: SystemTime::UNIX_EPOCH + Duration::from_secs(86_400),
        };

        let record = serde_json::to_value(RoomRecord::from_versioned("r1", &versioned)).unwrap();
        assert_eq!(record["room_id"], "r1");
        assert_eq!(record["status"], "IN_PROGRESS");
        assert_eq!(record["participants"][0]["display_name"], "Ada");
        assert_eq!(record["participants"][1]["seat"], 1);
        assert!(record["participants"][0].get("participant_id").is_none());
        assert!(!record.to_string().contains("p1"));
        assert!(record["participants"][0].get("current_choice").is_none());
        assert_eq!(record["revision"], "3");
        assert_eq!(record["updated_at"], "1970-01-02T00:00:00Z");
    }
}
