//! End-to-end session scenarios against the in-memory room store.

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use futures::{FutureExt, future::BoxFuture, stream::BoxStream};
use tokio::{sync::Barrier, time::timeout};
use wyr_back::{
    dao::{
        models::{Revision, RoomState, RoomStatus, Versioned},
        room::RoomRepository,
        room_store::{RoomEvent, RoomStore, memory::MemoryRoomStore},
        storage::{StorageError, StorageResult},
    },
    session::{
        AdvanceOutcome, Prompt, PromptCatalog, RoomSession, RoomView, RuleError, SessionError,
        SessionPhase, SessionSettings,
    },
};

const WAIT: Duration = Duration::from_secs(2);

struct Table {
    memory: Arc<MemoryRoomStore>,
    store: Arc<dyn RoomStore>,
    settings: SessionSettings,
}

impl Table {
    fn new() -> Self {
        Self::with_settings(fast_retries())
    }

    fn with_settings(settings: SessionSettings) -> Self {
        let memory = Arc::new(MemoryRoomStore::new());
        Self {
            store: memory.clone(),
            memory,
            settings,
        }
    }

    /// Table whose store can hold loads back until two of them are in flight.
    fn gated() -> (Self, Arc<GatedStore>) {
        let memory = Arc::new(MemoryRoomStore::new());
        let gated = Arc::new(GatedStore::new(memory.clone()));
        let table = Self {
            memory,
            store: gated.clone(),
            settings: fast_retries(),
        };
        (table, gated)
    }

    fn session(&self) -> RoomSession {
        RoomSession::new(RoomRepository::new(self.store.clone()), self.settings.clone())
    }

    /// Two sessions joined to `room`, both past the waiting phase.
    async fn pair(&self, room: &str) -> (RoomSession, RoomSession) {
        let ada = self.session();
        let bo = self.session();
        ada.join_or_create(room, "Ada").await.unwrap();
        bo.join_or_create(room, "Bo").await.unwrap();
        wait_until(&ada, |view| view.phase == SessionPhase::Active).await;
        (ada, bo)
    }
}

fn fast_retries() -> SessionSettings {
    SessionSettings {
        retry_base_delay: Duration::from_millis(1),
        ..SessionSettings::default()
    }
}

/// Store whose next `n` loads wait for each other, so the writers behind them read the
/// same revision and race on compare-and-swap.
struct GatedStore {
    inner: Arc<MemoryRoomStore>,
    barrier: Arc<Barrier>,
    held_loads: AtomicUsize,
    conflicts: Arc<AtomicUsize>,
}

impl GatedStore {
    fn new(inner: Arc<MemoryRoomStore>) -> Self {
        Self {
            inner,
            barrier: Arc::new(Barrier::new(2)),
            held_loads: AtomicUsize::new(0),
            conflicts: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn hold_next_loads(&self, count: usize) {
        self.held_loads.store(count, Ordering::SeqCst);
    }

    fn conflicts(&self) -> usize {
        self.conflicts.load(Ordering::SeqCst)
    }
}

impl RoomStore for GatedStore {
    fn create(
        &self,
        room_id: &str,
        initial: RoomState,
    ) -> BoxFuture<'static, StorageResult<Versioned>> {
        self.inner.create(room_id, initial)
    }

    fn load(&self, room_id: &str) -> BoxFuture<'static, StorageResult<Versioned>> {
        let held = self
            .held_loads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        let read = self.inner.load(room_id);
        let barrier = self.barrier.clone();
        async move {
            let loaded = read.await;
            if held {
                barrier.wait().await;
            }
            loaded
        }
        .boxed()
    }

    fn compare_and_swap(
        &self,
        room_id: &str,
        expected: Revision,
        next: RoomState,
    ) -> BoxFuture<'static, StorageResult<Versioned>> {
        let commit = self.inner.compare_and_swap(room_id, expected, next);
        let conflicts = self.conflicts.clone();
        async move {
            let result = commit.await;
            if matches!(result, Err(StorageError::Conflict { .. })) {
                conflicts.fetch_add(1, Ordering::SeqCst);
            }
            result
        }
        .boxed()
    }

    fn replace(
        &self,
        room_id: &str,
        state: RoomState,
    ) -> BoxFuture<'static, StorageResult<Versioned>> {
        self.inner.replace(room_id, state)
    }

    fn subscribe(&self, room_id: &str) -> BoxStream<'static, RoomEvent> {
        self.inner.subscribe(room_id)
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        self.inner.health_check()
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        self.inner.try_reconnect()
    }
}

async fn wait_until(session: &RoomSession, predicate: impl FnMut(&RoomView) -> bool) -> RoomView {
    let mut views = session.watch_view();
    let view = timeout(WAIT, views.wait_for(predicate))
        .await
        .expect("view did not settle in time")
        .expect("session dropped")
        .clone();
    view
}

fn three_round_settings(win_threshold: u32) -> SessionSettings {
    let catalog = PromptCatalog::new(vec![
        Prompt::new("Tea", "Coffee"),
        Prompt::new("Beach", "Mountain"),
        Prompt::new("Cats", "Dogs"),
    ])
    .unwrap();
    SessionSettings {
        catalog,
        win_threshold,
        retry_attempts: 3,
        retry_base_delay: Duration::from_millis(1),
    }
}

/// Play every round; `matches[i]` decides whether both pick the same option in round `i`.
async fn play(table: &Table, ada: &RoomSession, bo: &RoomSession, matches: &[bool]) -> AdvanceOutcome {
    let mut last = None;
    for (round, matched) in matches.iter().enumerate() {
        let prompt = table.settings.catalog.get(round as u32).unwrap().clone();
        ada.submit_choice(&prompt.first).await.unwrap();
        let other = if *matched { &prompt.first } else { &prompt.second };
        bo.submit_choice(other).await.unwrap();
        last = Some(ada.advance_round().await.unwrap());
    }
    last.unwrap()
}

#[tokio::test]
async fn first_participant_waits_for_a_peer() {
    let table = Table::new();
    let ada = table.session();

    let view = ada.join_or_create("r1", "Ada").await.unwrap();
    assert_eq!(view.phase, SessionPhase::AwaitingPeer);
    assert!(view.joined);
    assert_eq!(view.opponent_name, None);
    assert_eq!(view.prompt.unwrap().first, "Apollo bagels");

    let bo = table.session();
    let view = bo.join_or_create("r1", "Bo").await.unwrap();
    assert_eq!(view.phase, SessionPhase::Active);
    assert_eq!(view.opponent_name.as_deref(), Some("Ada"));

    let view = wait_until(&ada, |view| view.opponent_name.is_some()).await;
    assert_eq!(view.phase, SessionPhase::Active);
    assert_eq!(view.opponent_name.as_deref(), Some("Bo"));
}

#[tokio::test]
async fn matching_round_scores_both_and_notifies_once() {
    let table = Table::new();
    let (ada, bo) = table.pair("r1").await;
    let mut ada_matches = ada.subscribe_matches();
    let mut bo_matches = bo.subscribe_matches();

    ada.submit_choice("Apollo bagels").await.unwrap();
    bo.submit_choice("Leon's bagels").await.unwrap();
    assert_eq!(ada.advance_round().await.unwrap(), AdvanceOutcome::Advanced);

    wait_until(&bo, |view| view.round == 1).await;
    let view = ada.submit_choice("Metro").await.unwrap();
    assert!(view.waiting);
    let view = bo.submit_choice("Metro").await.unwrap();
    assert!(view.matched);
    assert_eq!(view.my_score, 1);
    assert_eq!(view.team_score, 2);

    let view = wait_until(&ada, |view| view.matched).await;
    assert_eq!(view.my_score, 1);
    assert_eq!(view.opponent_choice.as_deref(), Some("Metro"));

    let event = timeout(WAIT, ada_matches.recv()).await.unwrap().unwrap();
    assert_eq!((event.round, event.option.as_str()), (1, "Metro"));
    let event = timeout(WAIT, bo_matches.recv()).await.unwrap().unwrap();
    assert_eq!(event.round, 1);

    assert_eq!(ada.advance_round().await.unwrap(), AdvanceOutcome::Advanced);
    let view = ada.view();
    assert_eq!(view.round, 2);
    assert_eq!(view.team_score, 2);
    assert!(!view.matched);
    assert!(ada_matches.try_recv().is_err());
}

#[tokio::test]
async fn advancing_before_everyone_chose_is_not_ready() {
    let table = Table::new();
    let (ada, _bo) = table.pair("r1").await;

    ada.submit_choice("Apollo bagels").await.unwrap();
    assert_eq!(ada.advance_round().await.unwrap(), AdvanceOutcome::NotReady);
    assert_eq!(ada.view().round, 0);
}

#[tokio::test]
async fn invalid_and_repeated_choices_are_rejected() {
    let table = Table::new();
    let (ada, _bo) = table.pair("r1").await;

    let err = ada.submit_choice("Metro").await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::Rule(RuleError::InvalidChoice { round: 0, .. })
    ));

    ada.submit_choice("Apollo bagels").await.unwrap();
    let err = ada.submit_choice("Leon's bagels").await.unwrap_err();
    assert!(matches!(err, SessionError::Rule(RuleError::AlreadyChose)));
}

#[tokio::test]
async fn racing_submissions_keep_both_choices() {
    let (table, gated) = Table::gated();
    let (ada, bo) = table.pair("r1").await;

    gated.hold_next_loads(2);
    let (first, second) = tokio::join!(
        ada.submit_choice("Apollo bagels"),
        bo.submit_choice("Leon's bagels")
    );
    first.unwrap();
    second.unwrap();
    assert!(gated.conflicts() >= 1);

    let record = table.store.load("r1").await.unwrap();
    let choices: Vec<_> = record
        .state
        .participants
        .values()
        .map(|participant| participant.current_choice.clone())
        .collect();
    assert_eq!(
        choices,
        vec![
            Some("Apollo bagels".to_owned()),
            Some("Leon's bagels".to_owned())
        ]
    );
    assert_eq!(record.state.team_score(), 0);
}

#[tokio::test]
async fn racing_identical_picks_score_each_player_once() {
    let (table, gated) = Table::gated();
    let (ada, bo) = table.pair("r1").await;

    gated.hold_next_loads(2);
    let (first, second) = tokio::join!(
        ada.submit_choice("Apollo bagels"),
        bo.submit_choice("Apollo bagels")
    );
    first.unwrap();
    second.unwrap();
    assert!(gated.conflicts() >= 1);

    let record = table.store.load("r1").await.unwrap();
    let scores: Vec<_> = record
        .state
        .participants
        .values()
        .map(|participant| participant.score)
        .collect();
    assert_eq!(scores, vec![1, 1]);
    assert_eq!(record.state.team_score(), 2);
}

#[tokio::test]
async fn racing_advances_move_the_round_once() {
    let (table, gated) = Table::gated();
    let (ada, bo) = table.pair("r1").await;
    ada.submit_choice("Apollo bagels").await.unwrap();
    bo.submit_choice("Apollo bagels").await.unwrap();
    wait_until(&ada, |view| view.matched).await;
    wait_until(&bo, |view| view.matched).await;

    gated.hold_next_loads(2);
    let (first, second) = tokio::join!(ada.advance_round(), bo.advance_round());
    let mut outcomes = vec![first.unwrap(), second.unwrap()];
    outcomes.sort_by_key(|outcome| matches!(outcome, AdvanceOutcome::AlreadyAdvanced));
    assert_eq!(
        outcomes,
        vec![AdvanceOutcome::Advanced, AdvanceOutcome::AlreadyAdvanced]
    );
    assert!(gated.conflicts() >= 1);

    let record = table.store.load("r1").await.unwrap();
    assert_eq!(record.state.round, 1);
    assert_eq!(record.state.team_score(), 2);
}

#[tokio::test]
async fn reaching_the_threshold_on_the_last_round_wins() {
    let table = Table::with_settings(three_round_settings(4));
    let (ada, bo) = table.pair("r1").await;

    let outcome = play(&table, &ada, &bo, &[true, false, true]).await;
    assert_eq!(outcome, AdvanceOutcome::Finished(RoomStatus::Won));
    assert_eq!(ada.phase().await, SessionPhase::GameWon);

    let view = wait_until(&bo, |view| view.status.is_terminal()).await;
    assert_eq!(view.status, RoomStatus::Won);
    assert_eq!(view.phase, SessionPhase::GameWon);
    assert_eq!(view.team_score, 4);

    let err = bo.submit_choice("Cats").await.unwrap_err();
    assert!(matches!(err, SessionError::Rule(RuleError::GameOver(_))));
}

#[tokio::test]
async fn falling_short_on_the_last_round_loses() {
    let table = Table::with_settings(three_round_settings(5));
    let (ada, bo) = table.pair("r1").await;

    let outcome = play(&table, &ada, &bo, &[true, false, true]).await;
    assert_eq!(outcome, AdvanceOutcome::Finished(RoomStatus::Lost));
    assert_eq!(ada.view().phase, SessionPhase::GameLost);
    assert_eq!(ada.view().team_score, 4);
}

#[tokio::test]
async fn third_participant_is_turned_away() {
    let table = Table::new();
    let (_ada, _bo) = table.pair("r1").await;
    let cy = table.session();

    let err = cy.join_or_create("r1", "Cy").await.unwrap_err();
    assert!(matches!(err, SessionError::Rule(RuleError::RoomFull)));
    assert_eq!(cy.phase().await, SessionPhase::Idle);
    assert!(!cy.view().joined);
}

#[tokio::test]
async fn play_again_resets_the_room_and_evicts_the_peer() {
    let table = Table::with_settings(three_round_settings(2));
    let (ada, bo) = table.pair("r1").await;
    play(&table, &ada, &bo, &[true, true, true]).await;

    let view = ada.play_again().await.unwrap();
    assert_eq!(view.round, 0);
    assert_eq!(view.status, RoomStatus::InProgress);
    assert_eq!(view.team_score, 0);
    assert_eq!(view.phase, SessionPhase::AwaitingPeer);

    let view = wait_until(&bo, |view| !view.joined).await;
    assert_eq!(view.phase, SessionPhase::Idle);
    assert_eq!(bo.room_id().await, None);

    let view = bo.join_or_create("r1", "Bo").await.unwrap();
    assert_eq!(view.phase, SessionPhase::Active);
    assert_eq!(view.my_score, 0);
}

#[tokio::test]
async fn deleted_room_detaches_its_sessions() {
    let table = Table::new();
    let (ada, _bo) = table.pair("r1").await;

    assert!(table.memory.delete("r1"));
    let view = wait_until(&ada, |view| !view.joined).await;
    assert_eq!(view.phase, SessionPhase::Idle);

    let err = ada.submit_choice("Apollo bagels").await.unwrap_err();
    assert!(matches!(err, SessionError::NotJoined));
}

#[tokio::test]
async fn leave_stops_following_but_keeps_the_seat() {
    let table = Table::new();
    let (ada, bo) = table.pair("r1").await;

    ada.leave().await;
    assert_eq!(ada.phase().await, SessionPhase::Idle);
    assert!(!ada.view().joined);

    bo.submit_choice("Apollo bagels").await.unwrap();
    assert!(!ada.view().joined);

    let view = ada.join_or_create("r1", "Ada").await.unwrap();
    assert_eq!(view.phase, SessionPhase::Active);
    assert_eq!(view.opponent_choice.as_deref(), Some("Apollo bagels"));
}

#[tokio::test]
async fn joining_another_room_while_joined_is_refused() {
    let table = Table::new();
    let ada = table.session();
    ada.join_or_create("r1", "Ada").await.unwrap();

    let err = ada.join_or_create("r2", "Ada").await.unwrap_err();
    assert!(matches!(err, SessionError::InvalidState(_)));
    assert_eq!(ada.room_id().await.as_deref(), Some("r1"));
}
