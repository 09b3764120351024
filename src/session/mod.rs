//! Per-participant room session: joins a room, forwards choices and round advances to
//! the store, and reconciles every delivered snapshot into a [`RoomView`].

pub mod catalog;
pub mod error;
pub mod identity;
pub mod rules;
pub mod state_machine;
pub mod view;

use std::{
    future::Future,
    sync::{Arc, Mutex as StdMutex, Weak},
    time::Duration,
};

use futures::{StreamExt, stream::BoxStream};
use rand::Rng;
use tokio::{
    sync::{Mutex, broadcast, watch},
    task::JoinHandle,
    time::sleep,
};
use tracing::{debug, info, warn};

use crate::dao::{
    models::{ParticipantId, RoomState, RoomStatus, Versioned},
    room::RoomRepository,
    room_store::RoomEvent,
};

pub use self::{
    catalog::{Prompt, PromptCatalog},
    error::SessionError,
    identity::SessionIdentity,
    rules::RuleError,
    state_machine::{Outcome, SessionEvent, SessionPhase},
    view::{MatchEvent, MatchTracker, RoomView},
};
use self::state_machine::SessionStateMachine;

/// Result alias for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

const MATCH_EVENT_CAPACITY: usize = 16;
const MAX_NAME_LENGTH: usize = 32;

/// Tunables shared by every session of a process.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Prompts played in order, one per round.
    pub catalog: PromptCatalog,
    /// Combined score needed on the last round to win.
    pub win_threshold: u32,
    /// Local retries for transient store failures.
    pub retry_attempts: u32,
    /// First backoff delay; doubles on every retry.
    pub retry_base_delay: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            catalog: PromptCatalog::default(),
            win_threshold: rules::DEFAULT_WIN_THRESHOLD,
            retry_attempts: 3,
            retry_base_delay: Duration::from_millis(100),
        }
    }
}

/// Result of [`RoomSession::advance_round`]. The last two variants are expected outcomes
/// that the next snapshot resolves, not failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceOutcome {
    /// The room moved to the next round.
    Advanced,
    /// The last round was played; the game ended with this status.
    Finished(RoomStatus),
    /// Not every participant has chosen yet.
    NotReady,
    /// The other participant advanced first.
    AlreadyAdvanced,
}

/// Handle to one participant's session. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct RoomSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    identity: SessionIdentity,
    repository: RoomRepository,
    settings: SessionSettings,
    /// Serialises store-bound operations of this session.
    op_gate: Mutex<()>,
    core: Mutex<Core>,
    view: watch::Sender<RoomView>,
    matches: broadcast::Sender<MatchEvent>,
    subscription: StdMutex<Option<JoinHandle<()>>>,
}

/// Mutable session state, only touched under `SessionInner::core`.
struct Core {
    machine: SessionStateMachine,
    room: Option<JoinedRoom>,
    /// Bumped whenever the session detaches; stale work compares against it.
    generation: u64,
    /// Highest revision sequence reconciled so far.
    last_sequence: Option<u64>,
    tracker: MatchTracker,
}

#[derive(Clone)]
struct JoinedRoom {
    room_id: String,
    display_name: String,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        if let Some(handle) = self.subscription.lock().ok().and_then(|mut guard| guard.take()) {
            handle.abort();
        }
    }
}

impl RoomSession {
    /// Session with a freshly generated identity.
    pub fn new(repository: RoomRepository, settings: SessionSettings) -> Self {
        Self::with_identity(SessionIdentity::new(), repository, settings)
    }

    /// Session for an identity the caller already holds.
    pub fn with_identity(
        identity: SessionIdentity,
        repository: RoomRepository,
        settings: SessionSettings,
    ) -> Self {
        let (view, _) = watch::channel(RoomView::detached());
        let (matches, _) = broadcast::channel(MATCH_EVENT_CAPACITY);
        Self {
            inner: Arc::new(SessionInner {
                identity,
                repository,
                settings,
                op_gate: Mutex::new(()),
                core: Mutex::new(Core {
                    machine: SessionStateMachine::new(),
                    room: None,
                    generation: 0,
                    last_sequence: None,
                    tracker: MatchTracker::default(),
                }),
                view,
                matches,
                subscription: StdMutex::new(None),
            }),
        }
    }

    /// Identifier this session writes under.
    pub fn participant_id(&self) -> &ParticipantId {
        self.inner.identity.participant_id()
    }

    /// Room the session is attached to, if any.
    pub async fn room_id(&self) -> Option<String> {
        let core = self.inner.core.lock().await;
        core.room.as_ref().map(|room| room.room_id.clone())
    }

    /// Current phase.
    pub async fn phase(&self) -> SessionPhase {
        self.inner.core.lock().await.machine.phase()
    }

    /// Latest published view.
    pub fn view(&self) -> RoomView {
        self.inner.view.borrow().clone()
    }

    /// Observe view changes.
    pub fn watch_view(&self) -> watch::Receiver<RoomView> {
        self.inner.view.subscribe()
    }

    /// Number of live [`Self::watch_view`] receivers.
    pub fn observer_count(&self) -> usize {
        self.inner.view.receiver_count()
    }

    /// One event per round in which both participants picked the same option.
    pub fn subscribe_matches(&self) -> broadcast::Receiver<MatchEvent> {
        self.inner.matches.subscribe()
    }

    /// Join `room_id`, creating the record when it does not exist yet.
    ///
    /// Joining the room the session is already in refreshes the display name.
    pub async fn join_or_create(&self, room_id: &str, display_name: &str) -> SessionResult<RoomView> {
        let room_id = room_id.trim();
        let display_name = display_name.trim();
        if room_id.is_empty() {
            return Err(SessionError::InvalidInput("room id must not be empty".into()));
        }
        if display_name.is_empty() || display_name.chars().count() > MAX_NAME_LENGTH {
            return Err(SessionError::InvalidInput(format!(
                "display name must be 1 to {MAX_NAME_LENGTH} characters"
            )));
        }

        let _gate = self.inner.op_gate.lock().await;
        let generation = {
            let core = self.inner.core.lock().await;
            if let Some(room) = &core.room {
                if room.room_id != room_id {
                    return Err(state_machine::InvalidTransition {
                        from: core.machine.phase(),
                        event: SessionEvent::Join,
                    }
                    .into());
                }
                let generation = core.generation;
                drop(core);
                return self.rename(room_id, display_name, generation).await;
            }
            core.generation
        };

        self.enter_room(room_id, display_name, generation).await
    }

    /// Submit the local participant's pick for the current round.
    pub async fn submit_choice(&self, option: &str) -> SessionResult<RoomView> {
        let _gate = self.inner.op_gate.lock().await;
        let (room_id, generation) = self.joined_room().await?;
        let me = self.participant_id();
        let catalog = &self.inner.settings.catalog;
        let repository = &self.inner.repository;
        let room: &str = &room_id;

        let committed = self
            .with_retry(move || async move {
                repository
                    .apply_update(room, |state| rules::submit_choice(state, me, option, catalog))
                    .await
                    .map_err(SessionError::from)
            })
            .await?;

        debug!(participant_id = %me, room_id = %room_id, option, "choice committed");
        self.reconcile_committed(generation, committed).await
    }

    /// Advance past the round the local view currently shows.
    pub async fn advance_round(&self) -> SessionResult<AdvanceOutcome> {
        let _gate = self.inner.op_gate.lock().await;
        let (room_id, generation) = self.joined_room().await?;
        let expected_round = self.inner.view.borrow().round;
        let settings = &self.inner.settings;
        let repository = &self.inner.repository;
        let room: &str = &room_id;

        let result = self
            .with_retry(move || async move {
                repository
                    .apply_update(room, |state| {
                        rules::advance_round(
                            state,
                            expected_round,
                            &settings.catalog,
                            settings.win_threshold,
                        )
                    })
                    .await
                    .map_err(SessionError::from)
            })
            .await;

        match result {
            Ok(committed) => {
                let status = committed.state.status;
                let round = committed.state.round;
                self.reconcile_committed(generation, committed).await?;
                info!(room_id = %room_id, round, ?status, "round advanced");
                Ok(if status.is_terminal() {
                    AdvanceOutcome::Finished(status)
                } else {
                    AdvanceOutcome::Advanced
                })
            }
            Err(SessionError::Rule(RuleError::NotReady)) => Ok(AdvanceOutcome::NotReady),
            Err(SessionError::Rule(RuleError::AlreadyAdvanced)) => {
                debug!(room_id = %room_id, expected_round, "round already advanced by peer");
                Ok(AdvanceOutcome::AlreadyAdvanced)
            }
            Err(err) => Err(err),
        }
    }

    /// Replace the room with a fresh record and join it again.
    pub async fn play_again(&self) -> SessionResult<RoomView> {
        let (room, generation) = {
            let mut core = self.inner.core.lock().await;
            let room = core.room.clone().ok_or(SessionError::NotJoined)?;
            core.machine.cancel_pending();
            core.machine.fire(SessionEvent::PlayAgain).map_err(plan_error)?;
            self.detach(&mut core);
            (room, core.generation)
        };

        let _gate = self.inner.op_gate.lock().await;
        let repository = &self.inner.repository;
        let room_id: &str = &room.room_id;
        self.with_retry(move || async move {
            repository
                .replace(room_id, RoomState::fresh())
                .await
                .map_err(SessionError::from)
        })
        .await?;
        info!(participant_id = %self.participant_id(), room_id, "room reset for a new game");

        self.enter_room(room_id, &room.display_name, generation).await
    }

    /// Stop following the room. The participant stays in the record so it can rejoin.
    pub async fn leave(&self) {
        let mut core = self.inner.core.lock().await;
        if core.room.is_none() && !core.machine.phase().is_joined() {
            return;
        }
        core.machine.cancel_pending();
        if let Err(err) = core.machine.fire(SessionEvent::Leave) {
            warn!(error = %err, "leave transition refused");
        }
        self.detach(&mut core);
        info!(participant_id = %self.participant_id(), "session left room");
    }

    async fn enter_room(
        &self,
        room_id: &str,
        display_name: &str,
        generation: u64,
    ) -> SessionResult<RoomView> {
        let plan = {
            let mut core = self.inner.core.lock().await;
            core.machine.plan(SessionEvent::Join).map_err(plan_error)?
        };

        match self.register(room_id, display_name).await {
            Ok(committed) => {
                let mut core = self.inner.core.lock().await;
                if core.generation != generation {
                    return Err(SessionError::Superseded);
                }
                if let Err(err) = core.machine.apply(plan.id) {
                    warn!(error = %err, "join transition could not be applied");
                    return Err(SessionError::Superseded);
                }
                core.room = Some(JoinedRoom {
                    room_id: room_id.to_owned(),
                    display_name: display_name.to_owned(),
                });
                core.last_sequence = None;
                let view = self.reconcile(&mut core, RoomEvent::Snapshot(committed));
                self.spawn_subscription(room_id, generation);
                info!(
                    participant_id = %self.participant_id(),
                    room_id,
                    display_name,
                    "joined room"
                );
                Ok(view)
            }
            Err(err) => {
                self.inner.core.lock().await.machine.abort(plan.id);
                Err(err)
            }
        }
    }

    async fn rename(
        &self,
        room_id: &str,
        display_name: &str,
        generation: u64,
    ) -> SessionResult<RoomView> {
        let committed = self.register(room_id, display_name).await?;
        let mut core = self.inner.core.lock().await;
        if core.generation != generation {
            return Err(SessionError::Superseded);
        }
        if let Some(room) = core.room.as_mut() {
            room.display_name = display_name.to_owned();
        }
        Ok(self.reconcile(&mut core, RoomEvent::Snapshot(committed)))
    }

    async fn register(&self, room_id: &str, display_name: &str) -> SessionResult<Versioned> {
        let me = self.participant_id();
        let repository = &self.inner.repository;
        self.with_retry(move || async move {
            repository.ensure_room(room_id).await?;
            repository
                .apply_update(room_id, |state| rules::join(state, me, display_name))
                .await
                .map_err(SessionError::from)
        })
        .await
    }

    async fn joined_room(&self) -> SessionResult<(String, u64)> {
        let core = self.inner.core.lock().await;
        match &core.room {
            Some(room) => Ok((room.room_id.clone(), core.generation)),
            None => Err(SessionError::NotJoined),
        }
    }

    async fn reconcile_committed(
        &self,
        generation: u64,
        committed: Versioned,
    ) -> SessionResult<RoomView> {
        let mut core = self.inner.core.lock().await;
        if core.generation != generation {
            return Err(SessionError::Superseded);
        }
        Ok(self.reconcile(&mut core, RoomEvent::Snapshot(committed)))
    }

    /// Fold one store event into the session and publish the resulting view.
    fn reconcile(&self, core: &mut Core, event: RoomEvent) -> RoomView {
        let me = self.participant_id();
        let versioned = match event {
            RoomEvent::Snapshot(versioned) => {
                let sequence = versioned.revision.sequence();
                let stale = match (core.last_sequence, sequence) {
                    (Some(seen), Some(next)) => next <= seen,
                    _ => false,
                };
                // A recreated record restarts its sequence, so a lower one only
                // counts as stale while it still lists this participant.
                if stale && versioned.state.participant(me).is_some() {
                    return self.view();
                }
                core.last_sequence = sequence;
                Some(versioned)
            }
            RoomEvent::NotFound => None,
        };

        let still_listed = versioned
            .as_ref()
            .is_some_and(|v| v.state.participant(me).is_some());
        if !still_listed {
            let room_id = core.room.as_ref().map(|room| room.room_id.clone());
            if let Err(err) = core.machine.fire(SessionEvent::Evicted) {
                debug!(error = %err, "eviction ignored");
            }
            self.detach(core);
            warn!(participant_id = %me, room_id = ?room_id, "no longer part of the room");
            let view = match versioned {
                Some(v) => RoomView::derive(
                    &v.state,
                    me,
                    SessionPhase::Idle,
                    &self.inner.settings.catalog,
                ),
                None => RoomView::detached(),
            };
            self.inner.view.send_replace(view.clone());
            return view;
        }

        let Some(versioned) = versioned else {
            return self.view();
        };
        let state = &versioned.state;

        if core.machine.phase() == SessionPhase::AwaitingPeer && state.participants.len() >= 2 {
            if let Err(err) = core.machine.fire(SessionEvent::PeerJoined) {
                debug!(error = %err, "peer join transition ignored");
            } else {
                info!(participant_id = %me, "second participant joined");
            }
        }
        if matches!(
            core.machine.phase(),
            SessionPhase::AwaitingPeer | SessionPhase::Active
        ) && state.status.is_terminal()
        {
            let outcome = match state.status {
                RoomStatus::Won => Outcome::Won,
                _ => Outcome::Lost,
            };
            if let Err(err) = core.machine.fire(SessionEvent::Finish(outcome)) {
                debug!(error = %err, "finish transition ignored");
            }
        }

        let view = RoomView::derive(
            state,
            me,
            core.machine.phase(),
            &self.inner.settings.catalog,
        );
        if let Some(event) = core.tracker.observe(&view) {
            debug!(round = event.round, option = %event.option, "participants matched");
            let _ = self.inner.matches.send(event);
        }
        self.inner.view.send_replace(view.clone());
        view
    }

    /// Forget the room and stop the subscription. Caller holds the core lock.
    fn detach(&self, core: &mut Core) {
        core.generation += 1;
        core.room = None;
        core.last_sequence = None;
        core.tracker.reset();
        let running = self
            .inner
            .subscription
            .lock()
            .ok()
            .and_then(|mut guard| guard.take());
        if let Some(handle) = running {
            handle.abort();
        }
        let mut view = self.view();
        view.phase = core.machine.phase();
        view.joined = false;
        self.inner.view.send_replace(view);
    }

    fn spawn_subscription(&self, room_id: &str, generation: u64) {
        let events = self.inner.repository.subscribe(room_id);
        let handle = tokio::spawn(follow_room(Arc::downgrade(&self.inner), events, generation));
        let previous = match self.inner.subscription.lock() {
            Ok(mut guard) => guard.replace(handle),
            Err(_) => {
                warn!("subscription slot poisoned; dropping room subscription");
                Some(handle)
            }
        };
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Run `op`, retrying transient storage failures with jittered exponential backoff.
    async fn with_retry<T, F, Fut>(&self, mut op: F) -> SessionResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SessionResult<T>>,
    {
        let attempts = self.inner.settings.retry_attempts.max(1);
        let base = self.inner.settings.retry_base_delay;
        let mut attempt = 1;

        loop {
            match op().await {
                Err(SessionError::Storage(err)) if err.is_transient() => {
                    if attempt >= attempts {
                        warn!(error = %err, attempts, "giving up after transient failures");
                        return Err(SessionError::Transient {
                            attempts,
                            source: err,
                        });
                    }
                    let delay = backoff(base, attempt);
                    debug!(error = %err, attempt, ?delay, "transient failure; backing off");
                    sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

impl SessionInner {
    /// Apply a subscription event unless the session moved on. Returns whether to keep going.
    async fn on_event(self: &Arc<Self>, generation: u64, event: RoomEvent) -> bool {
        let session = RoomSession {
            inner: Arc::clone(self),
        };
        let mut core = self.core.lock().await;
        if core.generation != generation {
            return false;
        }
        if core.machine.snapshot().pending.is_some() {
            // An operation is mid-transition; its own commit will be reconciled.
            return true;
        }
        session.reconcile(&mut core, event);
        core.generation == generation
    }
}

async fn follow_room(
    session: Weak<SessionInner>,
    mut events: BoxStream<'static, RoomEvent>,
    generation: u64,
) {
    while let Some(event) = events.next().await {
        let Some(inner) = session.upgrade() else {
            break;
        };
        if !inner.on_event(generation, event).await {
            break;
        }
    }
}

fn backoff(base: Duration, attempt: u32) -> Duration {
    let exp = base.saturating_mul(1 << (attempt - 1).min(6));
    let jitter_ms = base.as_millis().min(u64::MAX as u128) as u64 / 2;
    let jitter = if jitter_ms == 0 {
        0
    } else {
        rand::rng().random_range(0..=jitter_ms)
    };
    exp + Duration::from_millis(jitter)
}

fn plan_error(err: state_machine::PlanError) -> SessionError {
    match err {
        state_machine::PlanError::InvalidTransition(invalid) => SessionError::InvalidState(invalid),
        state_machine::PlanError::AlreadyPending => SessionError::Superseded,
    }
}
