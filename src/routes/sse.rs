use std::convert::Infallible;

use axum::{
    Router,
    extract::{Path, State},
    response::sse::{Event, Sse},
    routing::get,
};
use futures::Stream;
use tracing::info;

use crate::{error::AppError, services::sse_service, state::SharedState};

#[utoipa::path(
    get,
    path = "/sessions/{participant_id}/events",
    tag = "sse",
    params(("participant_id" = String, Path, description = "Identifier returned by the join route")),
    responses(
        (status = 200, description = "Session SSE stream (`handshake`, `view`, `match`, `system_status`)", content_type = "text/event-stream", body = String),
        (status = 404, description = "Unknown session")
    )
)]
/// Stream view changes and match notifications of one session.
pub async fn session_stream(
    State(state): State<SharedState>,
    Path(participant_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let feed = sse_service::subscribe_session(&state, &participant_id)?;
    info!(%participant_id, "new session SSE connection");
    Ok(sse_service::to_sse_stream(feed))
}

/// Configure the SSE endpoints.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/sessions/{participant_id}/events", get(session_stream))
}
