use tracing::{debug, info};

use crate::{
    dao::models::ParticipantId,
    dto::{
        room::RoomRecord,
        session::{AdvanceResponse, JoinRoomRequest, JoinRoomResponse, SubmitChoiceRequest},
        validation::validate_identifier,
    },
    error::ServiceError,
    session::{RoomSession, RoomView, SessionIdentity, SessionPhase},
    state::SharedState,
};

/// Join (or create) `room_id`, reusing the caller's live session when it sent its identifier.
pub async fn join(
    state: &SharedState,
    room_id: &str,
    request: JoinRoomRequest,
) -> Result<JoinRoomResponse, ServiceError> {
    check_room_id(room_id)?;
    let participant_id = match request.participant_id.as_deref() {
        Some(raw) => ParticipantId::parse(raw)
            .map_err(|err| ServiceError::InvalidInput(err.to_string()))?,
        None => ParticipantId::generate(),
    };

    let (session, created) = match state.session(&participant_id) {
        Ok(session) => (session, false),
        Err(_) => {
            let repository = state.repository().await?;
            state.session_or_insert_with(&participant_id, || {
                RoomSession::with_identity(
                    SessionIdentity::resume(participant_id.clone()),
                    repository,
                    state.config().session_settings(),
                )
            })
        }
    };

    match session.join_or_create(room_id, &request.display_name).await {
        Ok(view) => {
            info!(room_id, participant_id = %participant_id, "participant joined room");
            Ok(JoinRoomResponse {
                participant_id: participant_id.to_string(),
                view,
            })
        }
        Err(err) => {
            if created && session.phase().await == SessionPhase::Idle {
                state.remove_session(&participant_id);
            }
            Err(err.into())
        }
    }
}

/// Raw record of a room, straight from the store.
pub async fn room_record(state: &SharedState, room_id: &str) -> Result<RoomRecord, ServiceError> {
    check_room_id(room_id)?;
    let repository = state.repository().await?;
    let versioned = repository.load(room_id).await?;
    Ok(RoomRecord::from_versioned(room_id, &versioned))
}

/// Latest view of a live session.
pub fn view(state: &SharedState, participant_id: &str) -> Result<RoomView, ServiceError> {
    Ok(find(state, participant_id)?.view())
}

/// Record the participant's pick for the current round.
pub async fn submit_choice(
    state: &SharedState,
    participant_id: &str,
    request: SubmitChoiceRequest,
) -> Result<RoomView, ServiceError> {
    let session = find(state, participant_id)?;
    Ok(session.submit_choice(&request.option).await?)
}

/// Move the room to the next round once both participants chose.
pub async fn advance(
    state: &SharedState,
    participant_id: &str,
) -> Result<AdvanceResponse, ServiceError> {
    let session = find(state, participant_id)?;
    let outcome = session.advance_round().await?;
    debug!(participant_id, ?outcome, "advance requested");
    Ok(AdvanceResponse::new(outcome, session.view()))
}

/// Reset the room for a new game and rejoin it.
pub async fn play_again(
    state: &SharedState,
    participant_id: &str,
) -> Result<RoomView, ServiceError> {
    let session = find(state, participant_id)?;
    Ok(session.play_again().await?)
}

/// Detach the session and forget it.
pub async fn leave(state: &SharedState, participant_id: &str) -> Result<(), ServiceError> {
    let session = find(state, participant_id)?;
    session.leave().await;
    state.remove_session(session.participant_id());
    info!(participant_id, "participant left");
    Ok(())
}

fn check_room_id(room_id: &str) -> Result<(), ServiceError> {
    validate_identifier(room_id).map_err(|err| {
        ServiceError::InvalidInput(format!(
            "room id: {}",
            err.message.unwrap_or_else(|| err.code.clone())
        ))
    })
}

pub(crate) fn find(state: &SharedState, participant_id: &str) -> Result<RoomSession, ServiceError> {
    let participant_id = ParticipantId::parse(participant_id)
        .map_err(|err| ServiceError::InvalidInput(err.to_string()))?;
    state.session(&participant_id)
}
