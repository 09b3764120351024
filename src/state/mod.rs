use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use dashmap::DashMap;
use tokio::sync::{RwLock, watch};
use tracing::info;

use crate::{
    config::AppConfig,
    dao::{models::ParticipantId, room::RoomRepository, room_store::RoomStore},
    error::ServiceError,
    session::RoomSession,
};

pub type SharedState = Arc<AppState>;

/// Detached sessions stay registered this long so an in-flight join can finish.
const DETACHED_GRACE: Duration = Duration::from_secs(5);

/// Registry entry: the session and the last time a request used it.
struct SessionSlot {
    session: RoomSession,
    last_used: Instant,
}

/// Central application state: the room store handle, live sessions and runtime config.
pub struct AppState {
    room_store: RwLock<Option<Arc<dyn RoomStore>>>,
    sessions: DashMap<ParticipantId, SessionSlot>,
    degraded: watch::Sender<bool>,
    config: AppConfig,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a storage backend is installed.
    pub fn new(config: AppConfig) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        Arc::new(Self {
            room_store: RwLock::new(None),
            sessions: DashMap::new(),
            degraded: degraded_tx,
            config,
        })
    }

    /// Runtime configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Obtain a handle to the current room store, if one is installed.
    pub async fn room_store(&self) -> Option<Arc<dyn RoomStore>> {
        let guard = self.room_store.read().await;
        guard.as_ref().cloned()
    }

    /// Current room store, or [`ServiceError::Degraded`] when none is installed.
    pub async fn require_room_store(&self) -> Result<Arc<dyn RoomStore>, ServiceError> {
        self.room_store().await.ok_or(ServiceError::Degraded)
    }

    /// Repository over the current store, using the configured update budget.
    pub async fn repository(&self) -> Result<RoomRepository, ServiceError> {
        let store = self.require_room_store().await?;
        Ok(RoomRepository::with_attempts(
            store,
            self.config.update_attempts,
        ))
    }

    /// Install a new room store implementation and leave degraded mode.
    pub async fn set_room_store(&self, store: Arc<dyn RoomStore>) {
        {
            let mut guard = self.room_store.write().await;
            *guard = Some(store);
        }
        self.update_degraded(false).await;
    }

    /// Remove the current room store and enter degraded mode.
    pub async fn clear_room_store(&self) {
        {
            let mut guard = self.room_store.write().await;
            guard.take();
        }
        self.update_degraded(true).await;
    }

    /// Current degraded flag.
    pub async fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Update and broadcast the degraded flag when the value changes.
    pub async fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        });
    }

    /// Number of registered sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Look up a live session and mark it as used.
    pub fn session(&self, participant_id: &ParticipantId) -> Result<RoomSession, ServiceError> {
        self.sessions
            .get_mut(participant_id)
            .map(|mut slot| {
                slot.last_used = Instant::now();
                slot.session.clone()
            })
            .ok_or_else(|| ServiceError::NotFound(format!("session `{participant_id}`")))
    }

    /// Registered session for `participant_id`, creating it with `create` when absent.
    ///
    /// The flag tells whether the session was created by this call.
    pub fn session_or_insert_with(
        &self,
        participant_id: &ParticipantId,
        create: impl FnOnce() -> RoomSession,
    ) -> (RoomSession, bool) {
        let mut created = false;
        let mut slot = self
            .sessions
            .entry(participant_id.clone())
            .or_insert_with(|| {
                created = true;
                SessionSlot {
                    session: create(),
                    last_used: Instant::now(),
                }
            });
        slot.last_used = Instant::now();
        (slot.session.clone(), created)
    }

    /// Forget a session; returns it when it was registered.
    pub fn remove_session(&self, participant_id: &ParticipantId) -> Option<RoomSession> {
        self.sessions
            .remove(participant_id)
            .map(|(_, slot)| slot.session)
    }

    /// Drop sessions that no longer follow a room, and sessions nobody used or watched
    /// for the configured idle TTL. Returns how many were removed.
    pub async fn sweep_sessions(&self, now: Instant) -> usize {
        let idle_ttl = self.config.session_idle_ttl;
        let mut expired = Vec::new();
        self.sessions.retain(|participant_id, slot| {
            let unused_for = now.saturating_duration_since(slot.last_used);
            let detached = !slot.session.view().joined && unused_for >= DETACHED_GRACE;
            let abandoned = slot.session.observer_count() == 0 && unused_for >= idle_ttl;
            if detached || abandoned {
                expired.push((participant_id.clone(), slot.session.clone()));
                false
            } else {
                true
            }
        });

        for (participant_id, session) in &expired {
            session.leave().await;
            info!(participant_id = %participant_id, "expired session removed");
        }
        expired.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::room_store::memory::MemoryRoomStore;

    #[tokio::test]
    async fn starts_degraded_until_a_store_is_installed() {
        let state = AppState::new(AppConfig::default());
        let mut watcher = state.degraded_watcher();
        assert!(state.is_degraded().await);
        assert!(matches!(
            state.repository().await,
            Err(ServiceError::Degraded)
        ));

        state
            .set_room_store(Arc::new(MemoryRoomStore::new()))
            .await;
        assert!(!state.is_degraded().await);
        assert!(watcher.has_changed().unwrap());
        assert!(!*watcher.borrow_and_update());

        state.clear_room_store().await;
        assert!(state.is_degraded().await);
    }

    fn registered(state: &AppState, id: &str) -> RoomSession {
        let store: Arc<dyn RoomStore> = Arc::new(MemoryRoomStore::new());
        let (session, created) = state.session_or_insert_with(&ParticipantId::new(id), || {
            RoomSession::new(RoomRepository::new(store), state.config().session_settings())
        });
        assert!(created);
        session
    }

    #[tokio::test]
    async fn sweep_drops_detached_and_abandoned_sessions() {
        let state = AppState::new(AppConfig::default());
        let idle_ttl = state.config().session_idle_ttl;

        let watched = registered(&state, "watched");
        watched.join_or_create("r1", "Watched").await.unwrap();
        let _views = watched.watch_view();
        let lonely = registered(&state, "lonely");
        lonely.join_or_create("r2", "Lonely").await.unwrap();
        registered(&state, "never-joined");

        let now = Instant::now();
        assert_eq!(state.sweep_sessions(now).await, 0);
        assert_eq!(state.session_count(), 3);

        assert_eq!(state.sweep_sessions(now + DETACHED_GRACE).await, 1);
        assert!(state.session(&ParticipantId::new("never-joined")).is_err());

        let later = now + idle_ttl.max(DETACHED_GRACE) * 2;
        assert_eq!(state.sweep_sessions(later).await, 1);
        assert_eq!(state.session_count(), 1);
        assert!(state.session(&ParticipantId::new("watched")).is_ok());
        assert!(!lonely.view().joined);
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let state = AppState::new(AppConfig::default());
        assert!(matches!(
            state.session(&ParticipantId::new("ghost")),
            Err(ServiceError::NotFound(_))
        ));
    }
}
