use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use utoipa::ToSchema;
use validator::{Validate, ValidationErrors};

use crate::{
    dao::models::RoomStatus,
    dto::validation::{validate_identifier, validate_not_blank},
    session::{AdvanceOutcome, RoomView},
};

const MAX_DISPLAY_NAME_CHARS: usize = 32;

/// Payload used to join (or create) a room.
#[derive(Debug, Deserialize, ToSchema)]
pub struct JoinRoomRequest {
    /// Name shown to the other participant.
    pub display_name: String,
    /// Identifier kept from an earlier session, e.g. after a page reload.
    #[serde(default)]
    pub participant_id: Option<String>,
}

impl Validate for JoinRoomRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if let Err(e) = validate_not_blank(&self.display_name) {
            errors.add("display_name", e);
        } else if self.display_name.trim().chars().count() > MAX_DISPLAY_NAME_CHARS {
            let mut e = validator::ValidationError::new("display_name_length");
            e.message = Some(
                format!("Display name must be at most {MAX_DISPLAY_NAME_CHARS} characters").into(),
            );
            errors.add("display_name", e);
        }

        if let Some(ref id) = self.participant_id {
            if let Err(e) = validate_identifier(id) {
                errors.add("participant_id", e);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Returned once a participant joined a room.
#[derive(Debug, Serialize, ToSchema)]
pub struct JoinRoomResponse {
    /// Identifier to use on every `/sessions/{participant_id}` route.
    pub participant_id: String,
    /// View right after joining.
    pub view: RoomView,
}

/// Pick for the current round.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct SubmitChoiceRequest {
    /// One of the two options of the current round.
    #[validate(length(min = 1, max = 64))]
    pub option: String,
}

/// Result of a round advance request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AdvanceResult {
    /// Moved to the next round.
    Advanced,
    /// The game ended.
    Finished,
    /// Someone has not chosen yet; wait for the next view.
    NotReady,
    /// The other participant advanced first.
    AlreadyAdvanced,
}

/// Response of `POST /sessions/{participant_id}/advance`.
#[skip_serializing_none]
#[derive(Debug, Serialize, ToSchema)]
pub struct AdvanceResponse {
    pub result: AdvanceResult,
    /// Final status, present when `result` is `finished`.
    #[schema(value_type = Option<String>, example = "WON")]
    pub status: Option<RoomStatus>,
    /// Latest view after the request.
    pub view: RoomView,
}

impl AdvanceResponse {
    pub fn new(outcome: AdvanceOutcome, view: RoomView) -> Self {
        let (result, status) = match outcome {
            AdvanceOutcome::Advanced => (AdvanceResult::Advanced, None),
            AdvanceOutcome::Finished(status) => (AdvanceResult::Finished, Some(status)),
            AdvanceOutcome::NotReady => (AdvanceResult::NotReady, None),
            AdvanceOutcome::AlreadyAdvanced => (AdvanceResult::AlreadyAdvanced, None),
        };
        Self {
            result,
            status,
            view,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn join(name: &str, id: Option<&str>) -> JoinRoomRequest {
        JoinRoomRequest {
            display_name: name.into(),
            participant_id: id.map(str::to_owned),
        }
    }

    #[test]
    fn join_request_validation() {
        assert!(join("Ada", None).validate().is_ok());
        assert!(join("Ada", Some("p1")).validate().is_ok());
        assert!(join("  ", None).validate().is_err());
        assert!(join(&"x".repeat(33), None).validate().is_err());
        assert!(join("Ada", Some("bad id")).validate().is_err());
    }

    #[test]
    fn choice_request_validation() {
        assert!(SubmitChoiceRequest { option: "Metro".into() }.validate().is_ok());
        assert!(SubmitChoiceRequest { option: String::new() }.validate().is_err());
        assert!(SubmitChoiceRequest { option: "x".repeat(65) }.validate().is_err());
    }

    #[test]
    fn advance_response_only_carries_status_when_finished() {
        let advanced = serde_json::to_value(AdvanceResponse::new(
            AdvanceOutcome::Advanced,
            RoomView::detached(),
        ))
        .unwrap();
        assert_eq!(advanced["result"], "advanced");
        assert!(advanced.get("status").is_none());

        let finished = serde_json::to_value(AdvanceResponse::new(
            AdvanceOutcome::Finished(RoomStatus::Won),
            RoomView::detached(),
        ))
        .unwrap();
        assert_eq!(finished["result"], "finished");
        assert_eq!(finished["status"], "WON");
    }
}
