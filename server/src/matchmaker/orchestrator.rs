//! Matchmaking entry point: find-or-create under a per-user lock, attach by
//! conditional write, hand off to the gameplay engine.

use crate::matchmaker::{
    ranked, AppState, MatchConfig, MatchError, MatchOutcome, OptimisticEntry, Session,
    SessionStatus,
};
use crate::store::{Expected, OrderBy, SessionFilter, SessionPatch, StoreError};
use shared::{GameMode, MatchHandoff, PlayerSnapshot, ServerMessage, SessionType};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

/// Bounded retry with doubling, jittered backoff for transient store
/// failures. Conflicts pass straight through; they are contention, not
/// outages.
pub(crate) async fn with_retry<T, F, Fut>(config: &MatchConfig, mut op: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    use rand::Rng;

    let mut delay = config.store_retry_backoff;
    let mut attempt = 1;
    loop {
        match op().await {
            Err(StoreError::Unavailable(reason)) if attempt < config.store_retry_attempts => {
                tracing::warn!(%reason, attempt, "store call failed, backing off");
                let half = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX) / 2;
                let jitter = rand::thread_rng().gen_range(0..=half);
                tokio::time::sleep(delay + std::time::Duration::from_millis(jitter)).await;
                delay *= 2;
                attempt += 1;
            }
            other => return other,
        }
    }
}

fn surface(err: StoreError) -> MatchError {
    match err {
        StoreError::Conflict | StoreError::Unavailable(_) => MatchError::StoreUnavailable,
    }
}

enum AttachFailure {
    /// Someone else won the conditional write. Fall back to a fresh session.
    Contention,
    Unavailable,
}

impl AppState {
    /// Resolve a matchmaking request: join the oldest compatible open session
    /// or open a new waiting room. The per-user lock is held for the whole
    /// call and released on every path, success or error.
    pub async fn find_or_create_match(
        &self,
        user_id: &str,
        mode: GameMode,
        session_type: SessionType,
    ) -> Result<MatchOutcome, MatchError> {
        // A direct request supersedes any pending optimistic entry.
        self.optimistic.remove(user_id);

        let token = self.locks.acquire(user_id, session_type, mode)?;
        let result = self.run_matchmaking(user_id, mode, session_type).await;
        self.locks.release(user_id, &token);

        match &result {
            Ok(outcome) => {
                tracing::info!(user_id = %user_id, session_id = %outcome.session_id(), ?mode, "matchmaking resolved");
            }
            Err(err) => {
                tracing::warn!(user_id = %user_id, %err, "matchmaking failed");
            }
        }
        result
    }

    async fn run_matchmaking(
        &self,
        user_id: &str,
        mode: GameMode,
        session_type: SessionType,
    ) -> Result<MatchOutcome, MatchError> {
        if self.player_to_match.contains_key(user_id) {
            tracing::warn!(user_id = %user_id, "request while in an active match");
            return Err(MatchError::AlreadySearching);
        }

        let me = self.snapshot_for(user_id);
        // One query serves both the double-book check and the candidate scan.
        let filter = SessionFilter {
            status: Some(SessionStatus::Searching),
            ..SessionFilter::default()
        };
        let store = Arc::clone(&self.store);
        let searching = with_retry(&self.config, || {
            let store = Arc::clone(&store);
            let filter = filter.clone();
            async move { store.query(filter, OrderBy::CreatedAsc).await }
        })
        .await
        .map_err(surface)?;

        if searching.iter().any(|s| s.host.user_id == user_id) {
            tracing::warn!(user_id = %user_id, "request while already hosting an open session");
            return Err(MatchError::AlreadySearching);
        }
        let candidates: Vec<Session> = searching
            .into_iter()
            .filter(|s| {
                s.mode == mode && s.session_type == session_type && s.slots_open == 1
            })
            .collect();

        // Oldest-first bounds any one session's wait; ranked narrows to a
        // rating band first.
        let candidate = match session_type {
            SessionType::Ranked => {
                ranked::pick_candidate(&candidates, user_id, me.rating, Instant::now(), &self.config)
            }
            SessionType::Quick => candidates
                .iter()
                .find(|s| s.host.user_id != user_id),
        };

        if let Some(open) = candidate {
            match self.try_attach(open, &me).await {
                Ok(()) => {
                    return Ok(MatchOutcome::Matched {
                        session_id: open.id.clone(),
                    })
                }
                // First writer won that session; open a fresh one instead of
                // erroring.
                Err(AttachFailure::Contention) => {
                    tracing::debug!(user_id = %user_id, session_id = %open.id, "attach lost conditional write, creating new session");
                }
                Err(AttachFailure::Unavailable) => return Err(MatchError::StoreUnavailable),
            }
        }

        self.open_session(user_id, mode, session_type, me).await
    }

    /// Conditional attach: succeeds only while the session is still open.
    /// Timeout cancellation happens in the same logical step as the attach.
    async fn try_attach(
        &self,
        open: &Session,
        me: &PlayerSnapshot,
    ) -> Result<(), AttachFailure> {
        let store = Arc::clone(&self.store);
        let session_id = open.id.clone();
        let opponent = me.clone();
        let matched = match with_retry(&self.config, || {
            let store = Arc::clone(&store);
            let session_id = session_id.clone();
            let opponent = opponent.clone();
            async move {
                store
                    .conditional_update(
                        &session_id,
                        Expected {
                            slots_open: Some(1),
                            status: Some(SessionStatus::Searching),
                        },
                        SessionPatch {
                            slots_open: Some(0),
                            status: Some(SessionStatus::Matched),
                            opponent: Some(opponent),
                        },
                    )
                    .await
            }
        })
        .await
        {
            Ok(session) => session,
            Err(StoreError::Conflict) => return Err(AttachFailure::Contention),
            Err(StoreError::Unavailable(_)) => return Err(AttachFailure::Unavailable),
        };
        self.timeouts.clear(&open.id);
        self.promote_to_active(matched, me).await
    }

    /// Matched -> Active plus the handoff record the gameplay engine reads.
    async fn promote_to_active(
        &self,
        matched: Session,
        me: &PlayerSnapshot,
    ) -> Result<(), AttachFailure> {
        let store = Arc::clone(&self.store);
        let session_id = matched.id.clone();
        let active = match with_retry(&self.config, || {
            let store = Arc::clone(&store);
            let session_id = session_id.clone();
            async move {
                store
                    .conditional_update(
                        &session_id,
                        Expected {
                            slots_open: None,
                            status: Some(SessionStatus::Matched),
                        },
                        SessionPatch {
                            status: Some(SessionStatus::Active),
                            ..SessionPatch::default()
                        },
                    )
                    .await
            }
        })
        .await
        {
            Ok(session) => session,
            Err(StoreError::Conflict) => return Err(AttachFailure::Contention),
            Err(StoreError::Unavailable(_)) => return Err(AttachFailure::Unavailable),
        };

        let handoff = MatchHandoff {
            session_id: active.id.clone(),
            mode: active.mode,
            players: [active.host.clone(), me.clone()],
            settings: active.settings.clone(),
        };
        let store = Arc::clone(&self.store);
        if with_retry(&self.config, || {
            let store = Arc::clone(&store);
            let handoff = handoff.clone();
            async move { store.put_handoff(handoff).await }
        })
        .await
        .is_err()
        {
            return Err(AttachFailure::Unavailable);
        }

        let host_id = active.host.user_id.clone();
        self.player_to_match
            .insert(host_id.clone(), active.id.clone());
        self.player_to_match
            .insert(me.user_id.clone(), active.id.clone());
        self.liveness.track(&host_id);
        self.liveness.track(&me.user_id);

        let waited_ms = u64::try_from(active.created_at.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.record_wait(waited_ms);

        self.notify(
            &host_id,
            ServerMessage::MatchFound {
                session_id: active.id.clone(),
                opponent: me.clone(),
                mode: active.mode,
            },
        );
        self.notify(
            &host_id,
            ServerMessage::MatchStart(Box::new(handoff.clone())),
        );
        self.notify(
            &me.user_id,
            ServerMessage::MatchFound {
                session_id: active.id.clone(),
                opponent: active.host.clone(),
                mode: active.mode,
            },
        );
        self.notify(&me.user_id, ServerMessage::MatchStart(Box::new(handoff)));

        tracing::info!(session_id = %active.id, host = %host_id, opponent = %me.user_id, waited_ms, "match active");
        Ok(())
    }

    async fn open_session(
        &self,
        user_id: &str,
        mode: GameMode,
        session_type: SessionType,
        me: PlayerSnapshot,
    ) -> Result<MatchOutcome, MatchError> {
        let session = Session::open(mode, session_type, me);
        let store = Arc::clone(&self.store);
        let session_id = with_retry(&self.config, || {
            let store = Arc::clone(&store);
            let session = session.clone();
            async move { store.create(session).await }
        })
        .await
        .map_err(surface)?;

        self.timeouts.start(&session_id, user_id, mode, session_type);
        self.liveness.track(user_id);
        self.notify(
            user_id,
            ServerMessage::Searching {
                session_id: session_id.clone(),
            },
        );
        tracing::info!(user_id = %user_id, session_id = %session_id, ?mode, ?session_type, "opened waiting room");
        Ok(MatchOutcome::Created { session_id })
    }

    /// User-initiated cancel: release the lock, delete the waiting room if
    /// still searching, stop liveness. Does not wait for any sweep.
    pub async fn cancel_matchmaking(&self, user_id: &str) -> Result<(), MatchError> {
        if self.player_to_match.contains_key(user_id) {
            return Err(MatchError::NotInMatch);
        }
        let had_optimistic = self.optimistic.remove(user_id).is_some();
        self.locks.release_user(user_id);
        let deleted = self.delete_searching_sessions(user_id).await;
        if deleted > 0 {
            self.liveness.forget(user_id);
        }
        if deleted > 0 || had_optimistic {
            self.notify(user_id, ServerMessage::MatchmakingCancelled);
            tracing::info!(user_id = %user_id, deleted, "matchmaking cancelled");
            Ok(())
        } else {
            Err(MatchError::NotInMatch)
        }
    }

    /// Delete every `Searching` session hosted by this user, clearing each
    /// session's timeout. Returns how many were removed.
    pub(crate) async fn delete_searching_sessions(&self, user_id: &str) -> usize {
        let filter = SessionFilter {
            status: Some(SessionStatus::Searching),
            ..SessionFilter::default()
        };
        let sessions = match self.store.query(filter, OrderBy::CreatedAsc).await {
            Ok(sessions) => sessions,
            Err(err) => {
                tracing::warn!(%err, "query failed during cleanup");
                return 0;
            }
        };
        let mut deleted = 0;
        for session in sessions
            .into_iter()
            .filter(|s| s.host.user_id == user_id)
        {
            self.timeouts.clear(&session.id);
            if self.store.delete(&session.id).await.is_ok() {
                deleted += 1;
            }
        }
        deleted
    }

    /// Optimistic UI path: hold the request in a short grace window before it
    /// becomes a real session. The main orchestrator always wins: a direct
    /// request or cancel from the same user inside the window removes the
    /// entry before it fires.
    pub fn queue_optimistic(&self, user_id: &str, mode: GameMode, session_type: SessionType) {
        let fire_at = Instant::now() + self.config.optimistic_delay;
        self.optimistic.insert(
            user_id.to_string(),
            OptimisticEntry {
                mode,
                session_type,
                fire_at,
            },
        );
        tracing::debug!(user_id = %user_id, ?mode, "optimistic entry queued");
    }

    pub(crate) async fn run_due_optimistic(&self) {
        let now = Instant::now();
        let due: Vec<String> = self
            .optimistic
            .iter()
            .filter(|e| e.fire_at <= now)
            .map(|e| e.key().clone())
            .collect();
        for user_id in due {
            let Some((user_id, entry)) = self
                .optimistic
                .remove_if(&user_id, |_, e| e.fire_at <= now)
            else {
                continue;
            };
            match self
                .find_or_create_match(&user_id, entry.mode, entry.session_type)
                .await
            {
                Ok(_) => {}
                Err(MatchError::AlreadySearching) => {
                    tracing::debug!(user_id = %user_id, "optimistic entry lost to a direct request");
                }
                Err(err) => {
                    self.notify(&user_id, ServerMessage::Error(err.to_string()));
                }
            }
        }
    }
}
