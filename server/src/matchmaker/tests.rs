use super::*;
use crate::matchmaker::orchestrator::with_retry;
use crate::store::{Expected, MemoryStore, OrderBy, SessionFilter, SessionPatch, SessionStore, StoreError};
use shared::{GameMode, MatchHandoff, PlayerSnapshot, ServerMessage, SessionType};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn fast_config() -> MatchConfig {
    MatchConfig {
        lock_ttl: Duration::from_millis(200),
        lock_evict_interval: Duration::from_secs(3600),
        waiting_room_deadline: Duration::from_millis(60),
        matched_stall_ceiling: Duration::from_millis(120),
        sweep_interval: Duration::from_secs(3600),
        grace_period: Duration::from_millis(60),
        beat_interval: Duration::from_millis(30),
        scheduler_tick: Duration::from_millis(10),
        optimistic_delay: Duration::from_millis(40),
        failed_beat_capacity: 10,
        store_retry_attempts: 3,
        store_retry_backoff: Duration::from_millis(5),
        ranked_band: 200,
        ranked_band_widen: 100,
        ranked_widen_interval: Duration::from_secs(10),
    }
}

fn snapshot(user_id: &str, rating: i32) -> PlayerSnapshot {
    PlayerSnapshot {
        user_id: user_id.to_string(),
        display_name: user_id.to_string(),
        rating,
        wins: 0,
        die_skin: "standard".to_string(),
    }
}

fn state() -> Arc<AppState> {
    Arc::new(AppState::with_memory_store(fast_config()))
}

fn connect(state: &AppState, user_id: &str, rating: i32) -> mpsc::UnboundedReceiver<ServerMessage> {
    let (tx, rx) = mpsc::unbounded_channel();
    state.add_player(user_id.to_string(), tx, snapshot(user_id, rating));
    rx
}

async fn expect_msg_timeout(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> ServerMessage {
    tokio::time::timeout(Duration::from_millis(1500), rx.recv())
        .await
        .expect("Timed out waiting for message")
        .expect("Channel closed")
}

async fn searching_count(state: &AppState) -> usize {
    state
        .store
        .query(
            SessionFilter {
                status: Some(SessionStatus::Searching),
                ..SessionFilter::default()
            },
            OrderBy::CreatedAsc,
        )
        .await
        .expect("query")
        .len()
}

#[tokio::test]
async fn scenario_a_second_request_attaches_to_open_session() {
    let app = state();
    let mut rx1 = connect(&app, "u1", 1000);
    let mut rx2 = connect(&app, "u2", 1000);

    let first = app
        .find_or_create_match("u1", GameMode::Classic, SessionType::Quick)
        .await
        .expect("first request");
    let session_id = first.session_id().to_string();
    assert!(matches!(first, MatchOutcome::Created { .. }));

    let second = app
        .find_or_create_match("u2", GameMode::Classic, SessionType::Quick)
        .await
        .expect("second request");
    assert_eq!(
        second,
        MatchOutcome::Matched {
            session_id: session_id.clone()
        }
    );

    // One active match, zero leftover searching sessions, no live timer.
    assert_eq!(searching_count(&app).await, 0);
    assert!(app.timeouts.is_empty());
    let stored = app
        .store
        .get(&session_id)
        .await
        .expect("get")
        .expect("session present");
    assert_eq!(stored.status, SessionStatus::Active);
    assert_eq!(stored.slots_open, 0);
    assert_eq!(
        stored.opponent.as_ref().map(|o| o.user_id.as_str()),
        Some("u2")
    );

    // Both sides get the handoff.
    assert!(matches!(
        expect_msg_timeout(&mut rx1).await,
        ServerMessage::Searching { .. }
    ));
    assert!(matches!(
        expect_msg_timeout(&mut rx1).await,
        ServerMessage::MatchFound { .. }
    ));
    match expect_msg_timeout(&mut rx1).await {
        ServerMessage::MatchStart(handoff) => {
            assert_eq!(handoff.session_id, session_id);
            assert_eq!(handoff.players[1].user_id, "u2");
        }
        other => panic!("Expected MatchStart, got {other:?}"),
    }
    assert!(matches!(
        expect_msg_timeout(&mut rx2).await,
        ServerMessage::MatchFound { .. }
    ));

    let handoff = app
        .store
        .get_handoff(&session_id)
        .await
        .expect("get_handoff")
        .expect("handoff present");
    assert_eq!(handoff.mode, GameMode::Classic);
}

#[tokio::test]
async fn concurrent_requests_never_double_match_a_session() {
    let app = state();
    let _rx1 = connect(&app, "host", 1000);
    let _rx2 = connect(&app, "a", 1000);
    let _rx3 = connect(&app, "b", 1000);

    app.find_or_create_match("host", GameMode::Classic, SessionType::Quick)
        .await
        .expect("host creates");

    let app_a = Arc::clone(&app);
    let app_b = Arc::clone(&app);
    let (ra, rb) = tokio::join!(
        tokio::spawn(async move {
            app_a
                .find_or_create_match("a", GameMode::Classic, SessionType::Quick)
                .await
        }),
        tokio::spawn(async move {
            app_b
                .find_or_create_match("b", GameMode::Classic, SessionType::Quick)
                .await
        }),
    );
    let outcomes = [ra.expect("join").expect("a"), rb.expect("join").expect("b")];

    let matched = outcomes
        .iter()
        .filter(|o| matches!(o, MatchOutcome::Matched { .. }))
        .count();
    // Exactly one wins the conditional attach; the loser opens a fresh room
    // instead of erroring.
    assert_eq!(matched, 1);
    assert_eq!(searching_count(&app).await, 1);
    let active = app
        .store
        .query(
            SessionFilter {
                status: Some(SessionStatus::Active),
                ..SessionFilter::default()
            },
            OrderBy::CreatedAsc,
        )
        .await
        .expect("query");
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].slots_open, 0);
}

#[tokio::test]
async fn second_request_from_same_user_is_denied() {
    let app = state();
    let _rx = connect(&app, "u1", 1000);
    app.find_or_create_match("u1", GameMode::Classic, SessionType::Quick)
        .await
        .expect("first request");
    // Double-click: the user still hosts an open room, even in another mode.
    assert_eq!(
        app.find_or_create_match("u1", GameMode::Classic, SessionType::Quick)
            .await,
        Err(MatchError::AlreadySearching)
    );
    assert_eq!(
        app.find_or_create_match("u1", GameMode::Frenzy, SessionType::Quick)
            .await,
        Err(MatchError::AlreadySearching)
    );
    assert_eq!(searching_count(&app).await, 1);
}

#[tokio::test]
async fn scenario_b_leaked_lock_frees_after_ttl() {
    let app = state();
    let _rx = connect(&app, "u1", 1000);
    // Matchmaking "throws" after acquiring: the token is never released.
    let _leaked = app
        .locks
        .acquire("u1", SessionType::Quick, GameMode::Classic)
        .expect("acquire");
    assert_eq!(
        app.find_or_create_match("u1", GameMode::Classic, SessionType::Quick)
            .await,
        Err(MatchError::AlreadySearching)
    );
    tokio::time::sleep(fast_config().lock_ttl + Duration::from_millis(20)).await;
    app.find_or_create_match("u1", GameMode::Classic, SessionType::Quick)
        .await
        .expect("new request succeeds after TTL");
}

#[tokio::test]
async fn waiting_room_times_out_and_notifies_owner() {
    let app = state();
    let mut rx = connect(&app, "u1", 1000);
    let outcome = app
        .find_or_create_match("u1", GameMode::Classic, SessionType::Quick)
        .await
        .expect("request");
    assert!(matches!(
        expect_msg_timeout(&mut rx).await,
        ServerMessage::Searching { .. }
    ));

    tokio::time::sleep(Duration::from_millis(80)).await;
    app.fire_due_timeouts().await;

    assert!(matches!(
        expect_msg_timeout(&mut rx).await,
        ServerMessage::SearchTimeout
    ));
    assert!(app
        .store
        .get(outcome.session_id())
        .await
        .expect("get")
        .is_none());
    // Lock freed and liveness stopped; an immediate retry works.
    app.find_or_create_match("u1", GameMode::Classic, SessionType::Quick)
        .await
        .expect("re-enter matchmaking");
}

#[tokio::test]
async fn timeout_firing_loses_to_a_racing_attach() {
    let app = state();
    let _rx1 = connect(&app, "u1", 1000);
    let _rx2 = connect(&app, "u2", 1000);
    let outcome = app
        .find_or_create_match("u1", GameMode::Classic, SessionType::Quick)
        .await
        .expect("create");
    let session_id = outcome.session_id().to_string();

    // The opponent attaches, which clears the deadline entry.
    app.find_or_create_match("u2", GameMode::Classic, SessionType::Quick)
        .await
        .expect("attach");
    // A stale entry for the now-active session resurfaces (as after a
    // partial redeploy) and comes due.
    app.timeouts
        .start(&session_id, "u1", GameMode::Classic, SessionType::Quick);
    tokio::time::sleep(Duration::from_millis(80)).await;
    app.fire_due_timeouts().await;

    // Firing re-checks the stored status and must not delete the match.
    let stored = app.store.get(&session_id).await.expect("get");
    assert_eq!(stored.map(|s| s.status), Some(SessionStatus::Active));
}

/// Store double for contention at the removal boundary: the first write that
/// tries to move a session to `Abandoned` is beaten by an attach landing on
/// the inner store just ahead of it.
#[derive(Default)]
struct ContendedStore {
    inner: MemoryStore,
    raced: std::sync::atomic::AtomicBool,
}

#[async_trait::async_trait]
impl SessionStore for ContendedStore {
    async fn create(&self, session: Session) -> Result<String, StoreError> {
        self.inner.create(session).await
    }

    async fn get(&self, id: &str) -> Result<Option<Session>, StoreError> {
        self.inner.get(id).await
    }

    async fn conditional_update(
        &self,
        id: &str,
        expected: Expected,
        patch: SessionPatch,
    ) -> Result<Session, StoreError> {
        if patch.status == Some(SessionStatus::Abandoned)
            && !self.raced.swap(true, std::sync::atomic::Ordering::SeqCst)
        {
            let _ = self
                .inner
                .conditional_update(
                    id,
                    Expected {
                        slots_open: Some(1),
                        status: Some(SessionStatus::Searching),
                    },
                    SessionPatch {
                        slots_open: Some(0),
                        status: Some(SessionStatus::Matched),
                        opponent: Some(snapshot("rival", 1000)),
                    },
                )
                .await;
        }
        self.inner.conditional_update(id, expected, patch).await
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.inner.delete(id).await
    }

    async fn query(
        &self,
        filter: SessionFilter,
        order: OrderBy,
    ) -> Result<Vec<Session>, StoreError> {
        self.inner.query(filter, order).await
    }

    fn subscribe(&self, id: &str) -> mpsc::UnboundedReceiver<Session> {
        self.inner.subscribe(id)
    }

    async fn put_handoff(&self, handoff: MatchHandoff) -> Result<(), StoreError> {
        self.inner.put_handoff(handoff).await
    }

    async fn get_handoff(&self, session_id: &str) -> Result<Option<MatchHandoff>, StoreError> {
        self.inner.get_handoff(session_id).await
    }

    async fn remove_handoff(&self, session_id: &str) -> Result<(), StoreError> {
        self.inner.remove_handoff(session_id).await
    }
}

#[tokio::test]
async fn timeout_firing_yields_to_attach_winning_the_removal_write() {
    let app = Arc::new(AppState::new(
        fast_config(),
        Arc::new(ContendedStore::default()),
    ));
    let mut rx = connect(&app, "u1", 1000);
    let outcome = app
        .find_or_create_match("u1", GameMode::Classic, SessionType::Quick)
        .await
        .expect("create");
    let session_id = outcome.session_id().to_string();
    assert!(matches!(
        expect_msg_timeout(&mut rx).await,
        ServerMessage::Searching { .. }
    ));

    tokio::time::sleep(Duration::from_millis(80)).await;
    app.fire_due_timeouts().await;

    // The attach won the conditional write; the session survives and the
    // host is never told the search timed out.
    let stored = app
        .store
        .get(&session_id)
        .await
        .expect("get")
        .expect("session survives");
    assert_eq!(stored.status, SessionStatus::Matched);
    assert_eq!(
        stored.opponent.map(|o| o.user_id),
        Some("rival".to_string())
    );
    assert!(tokio::time::timeout(Duration::from_millis(50), rx.recv())
        .await
        .is_err());
}

#[tokio::test]
async fn sweep_yields_to_attach_winning_the_removal_write() {
    let app = Arc::new(AppState::new(
        fast_config(),
        Arc::new(ContendedStore::default()),
    ));
    let _rx = connect(&app, "u1", 1000);
    let outcome = app
        .find_or_create_match("u1", GameMode::Classic, SessionType::Quick)
        .await
        .expect("create");
    let session_id = outcome.session_id().to_string();

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(app.sweep_once().await, 0);
    let stored = app
        .store
        .get(&session_id)
        .await
        .expect("get")
        .expect("session survives");
    assert_eq!(stored.status, SessionStatus::Matched);
}

#[tokio::test]
async fn scenario_c_sweep_catches_session_whose_timer_was_lost() {
    let app = state();
    let mut rx = connect(&app, "u1", 1000);
    let outcome = app
        .find_or_create_match("u1", GameMode::Classic, SessionType::Quick)
        .await
        .expect("request");
    let session_id = outcome.session_id().to_string();
    assert!(matches!(
        expect_msg_timeout(&mut rx).await,
        ServerMessage::Searching { .. }
    ));

    // Kill the timer mid-flight; only stored timestamps remain.
    app.timeouts.clear(&session_id);
    tokio::time::sleep(Duration::from_millis(80)).await;
    app.fire_due_timeouts().await;
    assert!(app.store.get(&session_id).await.expect("get").is_some());

    let swept = app.sweep_once().await;
    assert_eq!(swept, 1);
    assert!(app.store.get(&session_id).await.expect("get").is_none());
    assert!(matches!(
        expect_msg_timeout(&mut rx).await,
        ServerMessage::SearchTimeout
    ));
}

#[tokio::test]
async fn sweep_removes_matched_session_stuck_short_of_active() {
    let app = state();
    let session = Session::open(GameMode::Classic, SessionType::Quick, snapshot("u1", 1000));
    let session_id = app.store.create(session).await.expect("create");
    app.store
        .conditional_update(
            &session_id,
            crate::store::Expected {
                slots_open: Some(1),
                status: Some(SessionStatus::Searching),
            },
            crate::store::SessionPatch {
                slots_open: Some(0),
                status: Some(SessionStatus::Matched),
                opponent: Some(snapshot("u2", 1000)),
            },
        )
        .await
        .expect("mark matched");

    // Not yet past the stall ceiling.
    assert_eq!(app.sweep_once().await, 0);
    tokio::time::sleep(Duration::from_millis(140)).await;
    assert_eq!(app.sweep_once().await, 1);
    assert!(app.store.get(&session_id).await.expect("get").is_none());
    // Sweeping again is a no-op.
    assert_eq!(app.sweep_once().await, 0);
}

#[tokio::test]
async fn scenario_d_flaky_heartbeats_within_grace_stay_connected() {
    let app = state();
    let mut rx = connect(&app, "u1", 1000);
    app.find_or_create_match("u1", GameMode::Classic, SessionType::Quick)
        .await
        .expect("request");

    // Simulate a dead downlink: drop the receiver so acks fail.
    rx.close();
    for _ in 0..5 {
        app.handle_heartbeat("u1");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(
        app.liveness.state("u1"),
        Some(liveness::LinkState::Degraded)
    );

    // Reconnect before the grace deadline.
    let _rx2 = connect(&app, "u1", 1000);
    app.handle_heartbeat("u1");
    assert_eq!(
        app.liveness.state("u1"),
        Some(liveness::LinkState::Connected)
    );

    tokio::time::sleep(Duration::from_millis(80)).await;
    app.reap_disconnected().await;
    // Never marked disconnected; the session is still there.
    assert_eq!(searching_count(&app).await, 1);
}

#[tokio::test]
async fn grace_expiry_cleans_up_searching_user() {
    let app = state();
    let mut rx = connect(&app, "u1", 1000);
    app.find_or_create_match("u1", GameMode::Classic, SessionType::Quick)
        .await
        .expect("request");
    rx.close();
    app.handle_heartbeat("u1");

    tokio::time::sleep(Duration::from_millis(80)).await;
    app.reap_disconnected().await;

    assert_eq!(searching_count(&app).await, 0);
    assert_eq!(app.liveness.state("u1"), None);
}

#[tokio::test]
async fn silent_player_in_active_match_is_forfeited() {
    let app = state();
    let _rx1 = connect(&app, "u1", 1000);
    let mut rx2 = connect(&app, "u2", 1000);
    let first = app
        .find_or_create_match("u1", GameMode::Classic, SessionType::Quick)
        .await
        .expect("create");
    app.find_or_create_match("u2", GameMode::Classic, SessionType::Quick)
        .await
        .expect("attach");
    let session_id = first.session_id().to_string();

    // u2 keeps beating; u1 goes completely silent with its socket half-open.
    tokio::time::sleep(Duration::from_millis(40)).await;
    app.handle_heartbeat("u2");
    app.degrade_idle_links();
    assert_eq!(
        app.liveness.state("u1"),
        Some(liveness::LinkState::Degraded)
    );
    assert_eq!(
        app.liveness.state("u2"),
        Some(liveness::LinkState::Connected)
    );

    tokio::time::sleep(Duration::from_millis(80)).await;
    app.reap_disconnected().await;

    loop {
        match expect_msg_timeout(&mut rx2).await {
            ServerMessage::OpponentDisconnected => break,
            _ => continue,
        }
    }
    match expect_msg_timeout(&mut rx2).await {
        ServerMessage::OpponentForfeited { winner } => assert_eq!(winner, "u2"),
        other => panic!("Expected OpponentForfeited, got {other:?}"),
    }
    let stored = app
        .store
        .get(&session_id)
        .await
        .expect("get")
        .expect("archived session");
    assert_eq!(stored.status, SessionStatus::Completed);
    assert!(app.player_to_match.is_empty());
}

#[tokio::test]
async fn disconnect_during_active_match_forfeits_to_opponent() {
    let app = state();
    let _rx1 = connect(&app, "u1", 1000);
    let mut rx2 = connect(&app, "u2", 1000);
    let first = app
        .find_or_create_match("u1", GameMode::Frenzy, SessionType::Quick)
        .await
        .expect("create");
    app.find_or_create_match("u2", GameMode::Frenzy, SessionType::Quick)
        .await
        .expect("attach");
    let session_id = first.session_id().to_string();

    app.remove_player("u1").await;

    // Drain matchmaking messages, then expect the forfeit pair.
    loop {
        match expect_msg_timeout(&mut rx2).await {
            ServerMessage::OpponentDisconnected => break,
            _ => continue,
        }
    }
    match expect_msg_timeout(&mut rx2).await {
        ServerMessage::OpponentForfeited { winner } => assert_eq!(winner, "u2"),
        other => panic!("Expected OpponentForfeited, got {other:?}"),
    }

    let stored = app
        .store
        .get(&session_id)
        .await
        .expect("get")
        .expect("archived session");
    assert_eq!(stored.status, SessionStatus::Completed);
    assert!(app
        .store
        .get_handoff(&session_id)
        .await
        .expect("get_handoff")
        .is_none());
    assert!(app.player_to_match.is_empty());
}

#[tokio::test]
async fn cancel_deletes_searching_session_immediately() {
    let app = state();
    let mut rx = connect(&app, "u1", 1000);
    app.find_or_create_match("u1", GameMode::Classic, SessionType::Quick)
        .await
        .expect("request");

    app.cancel_matchmaking("u1").await.expect("cancel");
    assert_eq!(searching_count(&app).await, 0);
    assert!(app.timeouts.is_empty());

    loop {
        match expect_msg_timeout(&mut rx).await {
            ServerMessage::MatchmakingCancelled => break,
            _ => continue,
        }
    }
    // Nothing left to cancel.
    assert_eq!(
        app.cancel_matchmaking("u1").await,
        Err(MatchError::NotInMatch)
    );
}

#[tokio::test]
async fn direct_request_supersedes_optimistic_entry() {
    let app = state();
    let _rx = connect(&app, "u1", 1000);
    app.queue_optimistic("u1", GameMode::Classic, SessionType::Quick);
    app.find_or_create_match("u1", GameMode::Classic, SessionType::Quick)
        .await
        .expect("direct request");

    tokio::time::sleep(Duration::from_millis(60)).await;
    app.run_due_optimistic().await;

    // The optimistic entry was cancelled; only the direct session exists.
    assert_eq!(searching_count(&app).await, 1);
}

#[tokio::test]
async fn undisturbed_optimistic_entry_becomes_a_real_session() {
    let app = state();
    let mut rx = connect(&app, "u1", 1000);
    app.queue_optimistic("u1", GameMode::Classic, SessionType::Quick);
    assert_eq!(searching_count(&app).await, 0);

    tokio::time::sleep(Duration::from_millis(60)).await;
    app.run_due_optimistic().await;

    assert_eq!(searching_count(&app).await, 1);
    assert!(matches!(
        expect_msg_timeout(&mut rx).await,
        ServerMessage::Searching { .. }
    ));
}

#[tokio::test]
async fn cancel_drops_pending_optimistic_entry() {
    let app = state();
    let _rx = connect(&app, "u1", 1000);
    app.queue_optimistic("u1", GameMode::Classic, SessionType::Quick);
    app.cancel_matchmaking("u1").await.expect("cancel");

    tokio::time::sleep(Duration::from_millis(60)).await;
    app.run_due_optimistic().await;
    assert_eq!(searching_count(&app).await, 0);
}

#[tokio::test]
async fn ranked_matches_closest_rating_and_skips_out_of_band() {
    let app = state();
    let _rx1 = connect(&app, "low", 900);
    let _rx2 = connect(&app, "near", 1190);
    let _rx3 = connect(&app, "far", 2000);
    let _rx4 = connect(&app, "me", 1200);

    let low = app
        .find_or_create_match("low", GameMode::Classic, SessionType::Ranked)
        .await
        .expect("low");
    let near = app
        .find_or_create_match("near", GameMode::Classic, SessionType::Ranked)
        .await
        .expect("near");
    let far = app
        .find_or_create_match("far", GameMode::Classic, SessionType::Ranked)
        .await
        .expect("far");
    // All three are outside each other's bands, so three rooms are open.
    assert!(matches!(low, MatchOutcome::Created { .. }));
    assert!(matches!(near, MatchOutcome::Created { .. }));
    assert!(matches!(far, MatchOutcome::Created { .. }));

    let mine = app
        .find_or_create_match("me", GameMode::Classic, SessionType::Ranked)
        .await
        .expect("me");
    assert_eq!(
        mine,
        MatchOutcome::Matched {
            session_id: near.session_id().to_string()
        }
    );
}

#[tokio::test]
async fn retry_helper_recovers_transient_outages_and_bounds_attempts() {
    let config = fast_config();

    let calls = std::sync::atomic::AtomicU32::new(0);
    let result: Result<u32, StoreError> = with_retry(&config, || {
        let n = calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        async move {
            if n < 2 {
                Err(StoreError::Unavailable("flaky".into()))
            } else {
                Ok(7)
            }
        }
    })
    .await;
    assert_eq!(result, Ok(7));
    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 3);

    let calls = std::sync::atomic::AtomicU32::new(0);
    let result: Result<u32, StoreError> = with_retry(&config, || {
        calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        async move { Err(StoreError::Unavailable("down".into())) }
    })
    .await;
    assert!(matches!(result, Err(StoreError::Unavailable(_))));
    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 3);

    // Conflicts are contention, not outages: no retry.
    let calls = std::sync::atomic::AtomicU32::new(0);
    let result: Result<u32, StoreError> = with_retry(&config, || {
        calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        async move { Err(StoreError::Conflict) }
    })
    .await;
    assert_eq!(result, Err(StoreError::Conflict));
    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[test]
fn guest_snapshot_truncates_multibyte_ids_safely() {
    let snap = guest_snapshot("プレイヤー一二三四五六");
    assert_eq!(snap.display_name, "guest-プレイヤー一二三");
    assert_eq!(snap.user_id, "プレイヤー一二三四五六");
}

#[tokio::test]
async fn stats_reflect_queue_locks_and_wait_times() {
    let app = state();
    let _rx1 = connect(&app, "u1", 1000);
    let _rx2 = connect(&app, "u2", 1000);

    let empty = app.stats().await;
    assert_eq!(empty.total_in_queue, 0);
    assert_eq!(empty.average_wait_ms, 0);

    app.find_or_create_match("u1", GameMode::Classic, SessionType::Quick)
        .await
        .expect("create");
    let waiting = app.stats().await;
    assert_eq!(waiting.total_in_queue, 1);
    assert_eq!(waiting.active_lock_count, 0);

    app.find_or_create_match("u2", GameMode::Classic, SessionType::Quick)
        .await
        .expect("attach");
    let matched = app.stats().await;
    assert_eq!(matched.total_in_queue, 0);
}
