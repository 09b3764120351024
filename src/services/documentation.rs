use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for the Would You Rather backend.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::rooms::join_room,
        crate::routes::rooms::get_room,
        crate::routes::sessions::get_view,
        crate::routes::sessions::submit_choice,
        crate::routes::sessions::advance_round,
        crate::routes::sessions::play_again,
        crate::routes::sessions::leave_room,
        crate::routes::sse::session_stream,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::room::RoomRecord,
            crate::dto::room::ParticipantSummary,
            crate::dto::session::JoinRoomRequest,
            crate::dto::session::JoinRoomResponse,
            crate::dto::session::SubmitChoiceRequest,
            crate::dto::session::AdvanceResult,
            crate::dto::session::AdvanceResponse,
            crate::dto::sse::Handshake,
            crate::dto::sse::SystemStatus,
            crate::session::RoomView,
            crate::session::MatchEvent,
            crate::session::Prompt,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "rooms", description = "Joining and inspecting rooms"),
        (name = "sessions", description = "Gameplay on behalf of one participant"),
        (name = "sse", description = "Server-sent events streams"),
    )
)]
pub struct ApiDoc;
