use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use axum_valid::Valid;

use crate::{
    dto::{
        room::RoomRecord,
        session::{JoinRoomRequest, JoinRoomResponse},
    },
    error::AppError,
    services::session_service,
    state::SharedState,
};

/// Routes addressing a room by its identifier.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/rooms/{room_id}", get(get_room))
        .route("/rooms/{room_id}/join", post(join_room))
}

/// Join a room, creating it when nobody opened it yet.
#[utoipa::path(
    post,
    path = "/rooms/{room_id}/join",
    tag = "rooms",
    params(("room_id" = String, Path, description = "Room shared by both players")),
    request_body = JoinRoomRequest,
    responses(
        (status = 200, description = "Joined", body = JoinRoomResponse),
        (status = 400, description = "Invalid name or participant id"),
        (status = 409, description = "Room is full"),
        (status = 503, description = "Storage unavailable")
    )
)]
pub async fn join_room(
    State(state): State<SharedState>,
    Path(room_id): Path<String>,
    Valid(Json(payload)): Valid<Json<JoinRoomRequest>>,
) -> Result<Json<JoinRoomResponse>, AppError> {
    let response = session_service::join(&state, &room_id, payload).await?;
    Ok(Json(response))
}

/// Raw shared record of a room.
#[utoipa::path(
    get,
    path = "/rooms/{room_id}",
    tag = "rooms",
    params(("room_id" = String, Path, description = "Room identifier")),
    responses(
        (status = 200, description = "Current record", body = RoomRecord),
        (status = 404, description = "Room does not exist")
    )
)]
pub async fn get_room(
    State(state): State<SharedState>,
    Path(room_id): Path<String>,
) -> Result<Json<RoomRecord>, AppError> {
    let record = session_service::room_record(&state, &room_id).await?;
    Ok(Json(record))
}
