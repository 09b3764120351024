use std::time::Duration;

use async_stream::stream;
use futures::{future::BoxFuture, stream::BoxStream};
use tokio::time::{MissedTickBehavior, interval};
use tracing::warn;

use super::RoomEvent;
use crate::dao::{
    models::{Revision, Versioned},
    storage::{StorageError, StorageResult},
};

/// Turn a point read into a subscription for backends without push notifications.
///
/// The first successful read is always emitted; afterwards only revision changes and
/// transitions to "missing" are.
#[cfg_attr(
    not(any(feature = "mongo-store", feature = "couch-store")),
    allow(dead_code)
)]
pub(super) fn poll_room<F>(
    room_id: String,
    every: Duration,
    mut load: F,
) -> BoxStream<'static, RoomEvent>
where
    F: FnMut() -> BoxFuture<'static, StorageResult<Versioned>> + Send + 'static,
{
    Box::pin(stream! {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last: Option<Option<Revision>> = None;

        loop {
            ticker.tick().await;
            match load().await {
                Ok(versioned) => {
                    let revision = Some(versioned.revision.clone());
                    if last.as_ref() != Some(&revision) {
                        last = Some(revision);
                        yield RoomEvent::Snapshot(versioned);
                    }
                }
                Err(StorageError::NotFound { .. }) => {
                    if last != Some(None) {
                        last = Some(None);
                        yield RoomEvent::NotFound;
                    }
                }
                Err(err) => {
                    warn!(room_id = %room_id, error = %err, "room poll failed; will retry");
                }
            }
        }
    })
}
