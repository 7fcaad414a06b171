use crate::store::{SessionFilter, SessionStore};
use dashmap::DashMap;
use serde::Serialize;
use shared::{GameMode, PlayerSnapshot, ServerMessage, SessionType};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod liveness;
pub mod locks;
pub mod orchestrator;
pub mod ranked;
pub mod session;
pub mod sweep;
pub mod timeouts;

pub use config::MatchConfig;
pub use error::MatchError;
pub use session::{MatchOutcome, Player, Session, SessionStatus, Tx};

use liveness::LivenessTracker;
use locks::LockRegistry;
use timeouts::TimeoutRegistry;

/// A deferred matchmaking request from the optimistic UI path. Sits in a
/// grace window; a direct request or cancel from the same user removes it
/// before it fires.
#[derive(Debug, Clone)]
pub(crate) struct OptimisticEntry {
    pub mode: GameMode,
    pub session_type: SessionType,
    pub fire_at: Instant,
}

/// Running mean of time-to-match, fed by successful attaches.
#[derive(Default)]
struct WaitStats {
    matched: AtomicU64,
    total_wait_ms: AtomicU64,
}

impl WaitStats {
    fn record(&self, wait_ms: u64) {
        self.matched.fetch_add(1, Ordering::Relaxed);
        self.total_wait_ms.fetch_add(wait_ms, Ordering::Relaxed);
    }

    fn average_ms(&self) -> u64 {
        let matched = self.matched.load(Ordering::Relaxed);
        if matched == 0 {
            0
        } else {
            self.total_wait_ms.load(Ordering::Relaxed) / matched
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MatchmakingStats {
    pub total_in_queue: usize,
    pub average_wait_ms: u64,
    pub active_lock_count: usize,
}

pub struct AppState {
    pub config: MatchConfig,
    pub store: Arc<dyn SessionStore>,
    pub players: DashMap<String, Player>,
    pub locks: LockRegistry,
    pub timeouts: TimeoutRegistry,
    pub liveness: LivenessTracker,
    /// Users currently in an active match, by session id.
    pub player_to_match: DashMap<String, String>,
    pub(crate) optimistic: DashMap<String, OptimisticEntry>,
    wait_stats: WaitStats,
}

impl AppState {
    pub fn new(config: MatchConfig, store: Arc<dyn SessionStore>) -> Self {
        let locks = LockRegistry::new(config.lock_ttl);
        let timeouts = TimeoutRegistry::new(config.waiting_room_deadline);
        let liveness = LivenessTracker::new(config.grace_period, config.failed_beat_capacity);
        Self {
            config,
            store,
            players: DashMap::new(),
            locks,
            timeouts,
            liveness,
            player_to_match: DashMap::new(),
            optimistic: DashMap::new(),
            wait_stats: WaitStats::default(),
        }
    }

    pub fn with_memory_store(config: MatchConfig) -> Self {
        Self::new(config, Arc::new(crate::store::MemoryStore::new()))
    }

    pub fn check_rate_limit(&self, user_id: &str) -> bool {
        if let Some(mut player) = self.players.get_mut(user_id) {
            let now = Instant::now();
            let elapsed = now.duration_since(player.last_msg_at).as_secs_f32();
            if elapsed < 0.1 {
                // Allow max 10 messages per second
                return false;
            }
            player.last_msg_at = now;
            true
        } else {
            false
        }
    }

    /// Best-effort push to a connected user. Send failures are fine here; the
    /// liveness tracker is what decides whether a link is actually dead.
    pub(crate) fn notify(&self, user_id: &str, msg: ServerMessage) {
        if let Some(player) = self.players.get(user_id) {
            let _ = player.tx.send(msg);
        }
    }

    pub(crate) fn snapshot_for(&self, user_id: &str) -> PlayerSnapshot {
        self.players
            .get(user_id)
            .map(|p| p.snapshot.clone())
            .unwrap_or_else(|| guest_snapshot(user_id))
    }

    pub(crate) fn record_wait(&self, wait_ms: u64) {
        self.wait_stats.record(wait_ms);
    }

    pub async fn stats(&self) -> MatchmakingStats {
        let searching = self
            .store
            .query(
                SessionFilter {
                    status: Some(SessionStatus::Searching),
                    ..SessionFilter::default()
                },
                crate::store::OrderBy::CreatedAsc,
            )
            .await
            .map(|sessions| sessions.len())
            .unwrap_or(0);
        MatchmakingStats {
            total_in_queue: searching,
            average_wait_ms: self.wait_stats.average_ms(),
            active_lock_count: self.locks.active_count(),
        }
    }
}

/// Identity for sockets that never announced themselves. Auth is out of
/// scope; everyone plays as a guest snapshot.
pub fn guest_snapshot(user_id: &str) -> PlayerSnapshot {
    // Char-wise so a multi-byte id cannot split a codepoint.
    let short: String = user_id.chars().take(8).collect();
    PlayerSnapshot {
        user_id: user_id.to_string(),
        display_name: format!("guest-{short}"),
        rating: 1000,
        wins: 0,
        die_skin: "standard".to_string(),
    }
}

#[cfg(test)]
mod tests;
