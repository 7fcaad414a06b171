use crate::matchmaker::{AppState, Player, SessionStatus, Tx};
use crate::store::{Expected, SessionPatch};
use shared::{PlayerSnapshot, ServerMessage};
use std::sync::Arc;
use std::time::Instant;

impl AppState {
    pub fn add_player(&self, user_id: String, tx: Tx, snapshot: PlayerSnapshot) {
        tracing::info!(user_id = %user_id, "player connected");
        self.players.insert(
            user_id,
            Player {
                tx,
                last_msg_at: Instant::now(),
                snapshot,
            },
        );
    }

    /// Socket gone for good: drop the outbound channel and run the same
    /// cleanup a liveness disconnect would.
    pub async fn remove_player(&self, user_id: &str) {
        tracing::info!(user_id = %user_id, "player removed");
        self.players.remove(user_id);
        self.handle_user_gone(user_id).await;
    }

    /// `beat -> ack`. Delivery of the ack is the liveness probe: a closed or
    /// full channel counts as a failed beat and starts/continues the grace
    /// window.
    pub fn handle_heartbeat(&self, user_id: &str) {
        if self.liveness.state(user_id).is_none() {
            // Not in any waiting/playing state; nothing to keep alive.
            return;
        }
        let now = Instant::now();
        let delivered = self
            .players
            .get(user_id)
            .is_some_and(|p| p.tx.send(ServerMessage::HeartbeatAck).is_ok());
        if delivered {
            self.liveness.record_success(user_id, now);
        } else {
            self.liveness.record_failure(user_id, now);
        }
    }

    /// Session cleanup for a user who is gone, whether by socket close,
    /// grace-period expiry, or leaving voluntarily: forfeit an active match,
    /// delete a still-searching session, free the lock either way.
    pub async fn handle_user_gone(&self, user_id: &str) {
        self.optimistic.remove(user_id);
        self.liveness.forget(user_id);
        if let Some((_, session_id)) = self.player_to_match.remove(user_id) {
            self.forfeit_match(user_id, &session_id).await;
        } else {
            let deleted = self.delete_searching_sessions(user_id).await;
            if deleted > 0 {
                self.locks.release_user(user_id);
                tracing::info!(user_id = %user_id, deleted, "searching session cleaned up for gone user");
            }
        }
    }

    async fn forfeit_match(&self, leaver: &str, session_id: &str) {
        if let Ok(Some(handoff)) = self.store.get_handoff(session_id).await {
            if let Some(winner) = handoff.players.iter().find(|p| p.user_id != leaver) {
                self.player_to_match.remove(&winner.user_id);
                self.liveness.forget(&winner.user_id);
                self.notify(&winner.user_id, ServerMessage::OpponentDisconnected);
                self.notify(
                    &winner.user_id,
                    ServerMessage::OpponentForfeited {
                        winner: winner.user_id.clone(),
                    },
                );
                tracing::info!(session_id = %session_id, leaver = %leaver, winner = %winner.user_id, "match forfeited");
            }
        }
        // Conflict here means the match already closed through another path.
        let _ = self
            .store
            .conditional_update(
                session_id,
                Expected {
                    slots_open: None,
                    status: Some(SessionStatus::Active),
                },
                SessionPatch {
                    status: Some(SessionStatus::Completed),
                    ..SessionPatch::default()
                },
            )
            .await;
        let _ = self.store.remove_handoff(session_id).await;
    }

    /// Fire waiting-room deadlines that have come due. Removal is claimed by
    /// a conditional write (`Searching -> Abandoned`) before the delete, so an
    /// attach racing this tick wins the write and the firing is a no-op.
    pub(crate) async fn fire_due_timeouts(&self) {
        for entry in self.timeouts.take_due(Instant::now()) {
            let claimed = self
                .store
                .conditional_update(
                    &entry.session_id,
                    Expected {
                        slots_open: None,
                        status: Some(SessionStatus::Searching),
                    },
                    SessionPatch {
                        status: Some(SessionStatus::Abandoned),
                        ..SessionPatch::default()
                    },
                )
                .await;
            if claimed.is_err() {
                // Attach won, the session is already gone, or the store is
                // briefly down; the sweep backstops the last case.
                continue;
            }
            let _ = self.store.delete(&entry.session_id).await;
            self.locks.release_user(&entry.user_id);
            self.liveness.forget(&entry.user_id);
            self.notify(&entry.user_id, ServerMessage::SearchTimeout);
            tracing::info!(session_id = %entry.session_id, user_id = %entry.user_id, mode = ?entry.mode, session_type = ?entry.session_type, "waiting room timed out");
        }
    }

    /// Silence detector for the scheduler tick. Heartbeats only feed liveness
    /// when the client sends one, so a user who stops sending entirely would
    /// otherwise stay `Connected` forever. Silence past the beat interval
    /// counts as a failed beat and starts the grace machinery.
    pub(crate) fn degrade_idle_links(&self) {
        let now = Instant::now();
        for user_id in self.liveness.idle_since(now, self.config.beat_interval) {
            tracing::debug!(user_id = %user_id, "no beat within interval");
            self.liveness.record_failure(&user_id, now);
        }
    }

    pub(crate) async fn reap_disconnected(&self) {
        for user_id in self.liveness.take_disconnected(Instant::now()) {
            tracing::info!(user_id = %user_id, "grace period elapsed with no successful beat");
            self.handle_user_gone(&user_id).await;
        }
    }

    /// Long-lived background loops: lock eviction, the deadline scheduler
    /// tick (timeouts, grace periods, optimistic entries), and the sweep
    /// cleaner. Spawned once at startup, independent of any request.
    pub fn spawn_background_tasks(self: &Arc<Self>) {
        let state = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(state.config.lock_evict_interval);
            loop {
                interval.tick().await;
                let evicted = state.locks.evict_expired();
                if evicted > 0 {
                    tracing::debug!(evicted, "expired locks evicted");
                }
            }
        });

        let state = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(state.config.scheduler_tick);
            loop {
                interval.tick().await;
                state.fire_due_timeouts().await;
                state.degrade_idle_links();
                state.reap_disconnected().await;
                state.run_due_optimistic().await;
            }
        });

        let state = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(state.config.sweep_interval);
            loop {
                interval.tick().await;
                let swept = state.sweep_once().await;
                if swept > 0 {
                    tracing::info!(swept, "sweep removed stale sessions");
                }
            }
        });
    }
}
