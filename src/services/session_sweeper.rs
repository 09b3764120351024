use std::time::{Duration, Instant};

use tokio::time::{MissedTickBehavior, interval};
use tracing::debug;

use crate::state::SharedState;

/// Same cadence as the storage health poll.
const SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Periodically drop sessions that were evicted, left their room or went idle.
pub async fn run(state: SharedState) {
    let mut ticker = interval(SWEEP_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let removed = state.sweep_sessions(Instant::now()).await;
        if removed > 0 {
            debug!(removed, remaining = state.session_count(), "session sweep finished");
        }
    }
}
