//! Per-user mutual-exclusion tokens. One unexpired lock per user, ever.
//!
//! Acquisition is a synchronous compare-and-set over the registry shard; it
//! never blocks. The TTL is a safety net against leaked locks from crashed
//! callers, not the release path; callers still release explicitly.

use crate::matchmaker::error::MatchError;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use shared::{GameMode, SessionType};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken(String);

struct LockEntry {
    token: LockToken,
    session_type: SessionType,
    mode: GameMode,
    expires_at: Instant,
}

pub struct LockRegistry {
    locks: DashMap<String, LockEntry>,
    ttl: Duration,
}

impl LockRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            locks: DashMap::new(),
            ttl,
        }
    }

    /// Grant a lock for `user_id`, or deny if an unexpired one exists.
    /// An expired lock counts as absent and is replaced in place.
    pub fn acquire(
        &self,
        user_id: &str,
        session_type: SessionType,
        mode: GameMode,
    ) -> Result<LockToken, MatchError> {
        let now = Instant::now();
        let token = LockToken(uuid::Uuid::new_v4().to_string());
        let entry = LockEntry {
            token: token.clone(),
            session_type,
            mode,
            expires_at: now + self.ttl,
        };
        match self.locks.entry(user_id.to_string()) {
            Entry::Occupied(mut held) => {
                let current = held.get();
                if current.expires_at > now {
                    tracing::debug!(
                        user_id = %user_id,
                        held_type = ?current.session_type,
                        held_mode = ?current.mode,
                        "lock denied, already searching"
                    );
                    return Err(MatchError::AlreadySearching);
                }
                held.insert(entry);
            }
            Entry::Vacant(slot) => {
                slot.insert(entry);
            }
        }
        tracing::debug!(user_id = %user_id, token = %token.0, "lock granted");
        Ok(token)
    }

    /// Release the lock held under `token`. A stale token (already expired
    /// and replaced, or never held) releases nothing.
    pub fn release(&self, user_id: &str, token: &LockToken) {
        self.locks.remove_if(user_id, |_, entry| entry.token == *token);
    }

    /// Drop whatever lock the user holds. Used by timeout firing, which must
    /// free the owner regardless of which request created the lock.
    pub fn release_user(&self, user_id: &str) {
        self.locks.remove(user_id);
    }

    /// Background pass: drop every expired entry. Acquisition already treats
    /// expired locks as absent, so this only reclaims memory.
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.locks.len();
        self.locks.retain(|_, entry| entry.expires_at > now);
        before - self.locks.len()
    }

    pub fn active_count(&self) -> usize {
        let now = Instant::now();
        self.locks
            .iter()
            .filter(|entry| entry.expires_at > now)
            .count()
    }

    #[cfg(test)]
    pub fn held_mode(&self, user_id: &str) -> Option<(SessionType, GameMode)> {
        self.locks
            .get(user_id)
            .map(|e| (e.session_type, e.mode))
    }
}
