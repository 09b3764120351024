use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
};
use axum_valid::Valid;

use crate::{
    dto::session::{AdvanceResponse, SubmitChoiceRequest},
    error::AppError,
    services::session_service,
    session::RoomView,
    state::SharedState,
};

/// Routes acting on behalf of one participant.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/sessions/{participant_id}", delete(leave_room))
        .route("/sessions/{participant_id}/view", get(get_view))
        .route("/sessions/{participant_id}/choice", post(submit_choice))
        .route("/sessions/{participant_id}/advance", post(advance_round))
        .route("/sessions/{participant_id}/play-again", post(play_again))
}

/// Latest view of the participant's room.
#[utoipa::path(
    get,
    path = "/sessions/{participant_id}/view",
    tag = "sessions",
    params(("participant_id" = String, Path, description = "Identifier returned by the join route")),
    responses(
        (status = 200, description = "Current view", body = RoomView),
        (status = 404, description = "Unknown session")
    )
)]
pub async fn get_view(
    State(state): State<SharedState>,
    Path(participant_id): Path<String>,
) -> Result<Json<RoomView>, AppError> {
    Ok(Json(session_service::view(&state, &participant_id)?))
}

/// Pick one of the two options of the current round.
#[utoipa::path(
    post,
    path = "/sessions/{participant_id}/choice",
    tag = "sessions",
    params(("participant_id" = String, Path, description = "Identifier returned by the join route")),
    request_body = SubmitChoiceRequest,
    responses(
        (status = 200, description = "Choice recorded", body = RoomView),
        (status = 400, description = "Option not offered this round"),
        (status = 409, description = "Already chose, game over or not joined")
    )
)]
pub async fn submit_choice(
    State(state): State<SharedState>,
    Path(participant_id): Path<String>,
    Valid(Json(payload)): Valid<Json<SubmitChoiceRequest>>,
) -> Result<Json<RoomView>, AppError> {
    let view = session_service::submit_choice(&state, &participant_id, payload).await?;
    Ok(Json(view))
}

/// Move to the next round once both participants chose.
#[utoipa::path(
    post,
    path = "/sessions/{participant_id}/advance",
    tag = "sessions",
    params(("participant_id" = String, Path, description = "Identifier returned by the join route")),
    responses(
        (status = 200, description = "Advance processed", body = AdvanceResponse),
        (status = 409, description = "Game already over or not joined")
    )
)]
pub async fn advance_round(
    State(state): State<SharedState>,
    Path(participant_id): Path<String>,
) -> Result<Json<AdvanceResponse>, AppError> {
    let response = session_service::advance(&state, &participant_id).await?;
    Ok(Json(response))
}

/// Reset the room and start over with the same participants.
#[utoipa::path(
    post,
    path = "/sessions/{participant_id}/play-again",
    tag = "sessions",
    params(("participant_id" = String, Path, description = "Identifier returned by the join route")),
    responses(
        (status = 200, description = "Fresh game", body = RoomView),
        (status = 409, description = "Not joined")
    )
)]
pub async fn play_again(
    State(state): State<SharedState>,
    Path(participant_id): Path<String>,
) -> Result<Json<RoomView>, AppError> {
    let view = session_service::play_again(&state, &participant_id).await?;
    Ok(Json(view))
}

/// Leave the room and drop the session.
#[utoipa::path(
    delete,
    path = "/sessions/{participant_id}",
    tag = "sessions",
    params(("participant_id" = String, Path, description = "Identifier returned by the join route")),
    responses(
        (status = 204, description = "Session closed"),
        (status = 404, description = "Unknown session")
    )
)]
pub async fn leave_room(
    State(state): State<SharedState>,
    Path(participant_id): Path<String>,
) -> Result<StatusCode, AppError> {
    session_service::leave(&state, &participant_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
