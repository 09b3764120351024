use std::{convert::Infallible, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio::sync::{
    broadcast::{self, error::RecvError},
    mpsc, watch,
};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::{
    dto::sse::{Handshake, ServerEvent, SystemStatus},
    error::ServiceError,
    services::session_service,
    session::{MatchEvent, RoomView},
    state::SharedState,
};

const EVENT_HANDSHAKE: &str = "handshake";
const EVENT_VIEW: &str = "view";
const EVENT_MATCH: &str = "match";
const EVENT_SYSTEM_STATUS: &str = "system_status";

/// Receivers feeding one participant's event stream.
pub struct SessionFeed {
    participant_id: String,
    views: watch::Receiver<RoomView>,
    matches: broadcast::Receiver<MatchEvent>,
    degraded: watch::Receiver<bool>,
}

/// Subscribe to a live session's views, matches and degraded-mode changes.
pub fn subscribe_session(
    state: &SharedState,
    participant_id: &str,
) -> Result<SessionFeed, ServiceError> {
    let session = session_service::find(state, participant_id)?;
    Ok(SessionFeed {
        participant_id: session.participant_id().to_string(),
        views: session.watch_view(),
        matches: session.subscribe_matches(),
        degraded: state.degraded_watcher(),
    })
}

/// Convert a session feed into an SSE response. The stream starts with a handshake and
/// the current view, then forwards every change until the client or the session goes away.
pub fn to_sse_stream(feed: SessionFeed) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(8);

    tokio::spawn(async move {
        let SessionFeed {
            participant_id,
            mut views,
            mut matches,
            mut degraded,
        } = feed;

        let handshake = Handshake {
            participant_id: participant_id.clone(),
            degraded: *degraded.borrow_and_update(),
        };
        let current = views.borrow_and_update().clone();
        if !send(&tx, EVENT_HANDSHAKE, &handshake).await || !send(&tx, EVENT_VIEW, &current).await
        {
            return;
        }

        loop {
            let delivered = tokio::select! {
                _ = tx.closed() => break,
                changed = views.changed() => {
                    if changed.is_err() {
                        debug!(%participant_id, "session dropped; closing stream");
                        break;
                    }
                    let view = views.borrow_and_update().clone();
                    send(&tx, EVENT_VIEW, &view).await
                }
                received = matches.recv() => match received {
                    Ok(event) => send(&tx, EVENT_MATCH, &event).await,
                    Err(RecvError::Closed) => break,
                    // Lagged: skip missed matches, the view already reflects the scores.
                    Err(RecvError::Lagged(_)) => true,
                },
                changed = degraded.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let status = SystemStatus { degraded: *degraded.borrow_and_update() };
                    send(&tx, EVENT_SYSTEM_STATUS, &status).await
                }
            };
            if !delivered {
                break;
            }
        }

        info!(%participant_id, "session SSE stream disconnected");
    });

    let stream = ReceiverStream::new(rx);
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

/// Serialise and push one event; `false` once the client is gone.
async fn send<T: serde::Serialize>(
    tx: &mpsc::Sender<Result<Event, Infallible>>,
    name: &str,
    payload: &T,
) -> bool {
    let message = match ServerEvent::json(Some(name.to_string()), payload) {
        Ok(message) => message,
        Err(err) => {
            warn!(event = name, error = %err, "failed to serialise SSE payload");
            return true;
        }
    };

    let mut event = Event::default().data(message.data);
    if let Some(name) = message.event {
        event = event.event(name);
    }
    tx.send(Ok(event)).await.is_ok()
}
