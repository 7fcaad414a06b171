//! Narrow interface to the shared session store.
//!
//! Every mutation a matchmaking writer performs goes through
//! `conditional_update`, carrying the prior field values it depends on. The
//! store's compare-and-set is the only cross-instance mutual exclusion in the
//! system; nothing here holds an in-process lock across an await.

use crate::matchmaker::session::{Session, SessionStatus};
use async_trait::async_trait;
use dashmap::DashMap;
use shared::{GameMode, MatchHandoff, PlayerSnapshot, SessionType};
use std::time::Instant;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// A conditional write found the record changed underneath it. Expected
    /// under contention; callers fall back rather than fail.
    #[error("conditional write conflict")]
    Conflict,
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

// Networked backends surface transport failures as `Unavailable`.
impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Unavailable(err.to_string())
    }
}

/// Equality filters for `query`. `None` means "any".
#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    pub mode: Option<GameMode>,
    pub session_type: Option<SessionType>,
    pub status: Option<SessionStatus>,
    pub open_only: bool,
}

#[derive(Debug, Clone, Copy)]
pub enum OrderBy {
    CreatedAsc,
}

/// Prior field values a conditional write depends on.
#[derive(Debug, Clone, Default)]
pub struct Expected {
    pub slots_open: Option<u8>,
    pub status: Option<SessionStatus>,
}

/// Fields a conditional write replaces. Anything left `None` is untouched.
#[derive(Debug, Clone, Default)]
pub struct SessionPatch {
    pub slots_open: Option<u8>,
    pub status: Option<SessionStatus>,
    pub opponent: Option<PlayerSnapshot>,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persist a new session. The store stamps `created_at`/`updated_at`.
    async fn create(&self, session: Session) -> Result<String, StoreError>;

    #[allow(dead_code)] // exercised by the test suite
    async fn get(&self, id: &str) -> Result<Option<Session>, StoreError>;

    /// Compare-and-set update. Fails with `Conflict` if any `expected` field
    /// no longer matches, or if the record is gone.
    async fn conditional_update(
        &self,
        id: &str,
        expected: Expected,
        patch: SessionPatch,
    ) -> Result<Session, StoreError>;

    /// Deleting an absent session is a no-op, never an error.
    async fn delete(&self, id: &str) -> Result<(), StoreError>;

    async fn query(
        &self,
        filter: SessionFilter,
        order: OrderBy,
    ) -> Result<Vec<Session>, StoreError>;

    /// Push-based change notifications: fires once immediately with the
    /// current snapshot (if the session exists), then on every mutation.
    /// The receiver closes when the session is deleted.
    #[allow(dead_code)] // exercised by the test suite
    fn subscribe(&self, id: &str) -> mpsc::UnboundedReceiver<Session>;

    /// Active-match region, consumed by the gameplay engine once a session
    /// reaches `Active`.
    async fn put_handoff(&self, handoff: MatchHandoff) -> Result<(), StoreError>;

    async fn get_handoff(&self, session_id: &str) -> Result<Option<MatchHandoff>, StoreError>;

    async fn remove_handoff(&self, session_id: &str) -> Result<(), StoreError>;
}

/// In-process store backing. Single-instance deployments run on this; the
/// trait keeps call sites ready for a distributed replacement.
#[derive(Default)]
pub struct MemoryStore {
    sessions: DashMap<String, Session>,
    watchers: DashMap<String, Vec<mpsc::UnboundedSender<Session>>>,
    handoffs: DashMap<String, MatchHandoff>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn notify_watchers(&self, id: &str, snapshot: &Session) {
        if let Some(mut senders) = self.watchers.get_mut(id) {
            senders.retain(|tx| tx.send(snapshot.clone()).is_ok());
        }
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn create(&self, mut session: Session) -> Result<String, StoreError> {
        let now = Instant::now();
        session.created_at = now;
        session.updated_at = now;
        let id = session.id.clone();
        let snapshot = session.clone();
        // Insert before notifying so a subscriber who reacts to the creation
        // event can already `get` the session.
        self.sessions.insert(id.clone(), session);
        self.notify_watchers(&id, &snapshot);
        Ok(id)
    }

    async fn get(&self, id: &str) -> Result<Option<Session>, StoreError> {
        Ok(self.sessions.get(id).map(|s| s.clone()))
    }

    async fn conditional_update(
        &self,
        id: &str,
        expected: Expected,
        patch: SessionPatch,
    ) -> Result<Session, StoreError> {
        // The shard lock held by `get_mut` makes compare-and-set atomic.
        let mut entry = self.sessions.get_mut(id).ok_or(StoreError::Conflict)?;
        if let Some(slots) = expected.slots_open {
            if entry.slots_open != slots {
                return Err(StoreError::Conflict);
            }
        }
        if let Some(status) = expected.status {
            if entry.status != status {
                return Err(StoreError::Conflict);
            }
        }
        if let Some(slots) = patch.slots_open {
            entry.slots_open = slots;
        }
        if let Some(status) = patch.status {
            entry.status = status;
        }
        if let Some(opponent) = patch.opponent {
            entry.opponent = Some(opponent);
        }
        entry.updated_at = Instant::now();
        let snapshot = entry.clone();
        drop(entry);
        self.notify_watchers(id, &snapshot);
        Ok(snapshot)
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.sessions.remove(id);
        // Dropping the senders closes subscriber streams.
        self.watchers.remove(id);
        Ok(())
    }

    async fn query(
        &self,
        filter: SessionFilter,
        order: OrderBy,
    ) -> Result<Vec<Session>, StoreError> {
        let mut out: Vec<Session> = self
            .sessions
            .iter()
            .filter(|entry| {
                let s = entry.value();
                filter.mode.is_none_or(|m| s.mode == m)
                    && filter.session_type.is_none_or(|t| s.session_type == t)
                    && filter.status.is_none_or(|st| s.status == st)
                    && (!filter.open_only || s.slots_open == 1)
            })
            .map(|entry| entry.value().clone())
            .collect();
        match order {
            OrderBy::CreatedAsc => out.sort_by_key(|s| s.created_at),
        }
        Ok(out)
    }

    fn subscribe(&self, id: &str) -> mpsc::UnboundedReceiver<Session> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(current) = self.sessions.get(id) {
            let _ = tx.send(current.clone());
        }
        self.watchers.entry(id.to_string()).or_default().push(tx);
        rx
    }

    async fn put_handoff(&self, handoff: MatchHandoff) -> Result<(), StoreError> {
        self.handoffs.insert(handoff.session_id.clone(), handoff);
        Ok(())
    }

    async fn get_handoff(&self, session_id: &str) -> Result<Option<MatchHandoff>, StoreError> {
        Ok(self.handoffs.get(session_id).map(|h| h.clone()))
    }

    async fn remove_handoff(&self, session_id: &str) -> Result<(), StoreError> {
        self.handoffs.remove(session_id);
        Ok(())
    }
}
