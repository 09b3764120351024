use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Probe the room store and report degraded mode along with the live session count.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    match state.require_room_store().await {
        Ok(store) => {
            if let Err(err) = store.health_check().await {
                warn!(error = %err, "storage health check failed");
            }
        }
        Err(_) => warn!("storage unavailable (degraded mode)"),
    }

    let sessions = state.session_count();
    if state.is_degraded().await {
        HealthResponse::degraded(sessions)
    } else {
        HealthResponse::ok(sessions)
    }
}
