//! Waiting-room deadlines. One entry per open session, fired by the shared
//! scheduler tick rather than per-session spawned timers, so a lost tick is
//! recoverable and the sweep cleaner can backstop the rest.

use dashmap::DashMap;
use shared::{GameMode, SessionType};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct TimeoutEntry {
    pub session_id: String,
    pub user_id: String,
    pub mode: GameMode,
    pub session_type: SessionType,
    pub deadline: Instant,
}

pub struct TimeoutRegistry {
    entries: DashMap<String, TimeoutEntry>,
    deadline: Duration,
}

impl TimeoutRegistry {
    pub fn new(deadline: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            deadline,
        }
    }

    /// Register a hard deadline for a freshly opened session. The deadline
    /// runs from now, not from last activity.
    pub fn start(
        &self,
        session_id: &str,
        user_id: &str,
        mode: GameMode,
        session_type: SessionType,
    ) {
        let entry = TimeoutEntry {
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            mode,
            session_type,
            deadline: Instant::now() + self.deadline,
        };
        self.entries.insert(session_id.to_string(), entry);
    }

    /// Idempotent: clearing an already-fired or never-started timer is a
    /// no-op.
    pub fn clear(&self, session_id: &str) {
        self.entries.remove(session_id);
    }

    /// Remove and return every entry whose deadline has passed. Each entry
    /// fires at most once; a concurrent `clear` simply wins the removal.
    pub fn take_due(&self, now: Instant) -> Vec<TimeoutEntry> {
        let due: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.deadline <= now)
            .map(|e| e.key().clone())
            .collect();
        due.into_iter()
            .filter_map(|id| {
                self.entries
                    .remove_if(&id, |_, entry| entry.deadline <= now)
                    .map(|(_, entry)| entry)
            })
            .collect()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
