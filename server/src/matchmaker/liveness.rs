//! Heartbeat state per user. Flaky links are tolerated through a bounded
//! failure queue and a grace window; only sustained silence past the grace
//! deadline counts as a disconnect.
//!
//! The tracker is a pure state machine. Send attempts and disconnect cleanup
//! live on `AppState`, which feeds results in via `record_success` /
//! `record_failure` and drains `take_disconnected` from the scheduler tick.
//! Pure silence is caught the same way: the tick asks `idle_since` for users
//! who stopped beating and records a failure for each.

use dashmap::DashMap;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connected,
    /// At least one failed beat, grace timer running, still serving.
    Degraded,
    Disconnected,
}

#[derive(Debug)]
struct HeartbeatRecord {
    last_seen: Instant,
    failed: VecDeque<Instant>,
    grace_deadline: Option<Instant>,
    state: LinkState,
}

pub struct LivenessTracker {
    records: DashMap<String, HeartbeatRecord>,
    grace: Duration,
    queue_cap: usize,
}

impl LivenessTracker {
    pub fn new(grace: Duration, queue_cap: usize) -> Self {
        Self {
            records: DashMap::new(),
            grace,
            queue_cap,
        }
    }

    /// Begin tracking a user entering a waiting or playing state. Re-tracking
    /// an already-tracked user resets nothing.
    pub fn track(&self, user_id: &str) {
        self.records
            .entry(user_id.to_string())
            .or_insert_with(|| HeartbeatRecord {
                last_seen: Instant::now(),
                failed: VecDeque::new(),
                grace_deadline: None,
                state: LinkState::Connected,
            });
    }

    /// A beat reached the user. Cancels any running grace timer and flushes
    /// the failure queue; returns how many queued failures were flushed.
    /// Correctness depends only on this most recent success, so the flush is
    /// a drain, not a replay.
    pub fn record_success(&self, user_id: &str, now: Instant) -> usize {
        let Some(mut rec) = self.records.get_mut(user_id) else {
            return 0;
        };
        rec.last_seen = now;
        rec.grace_deadline = None;
        rec.state = LinkState::Connected;
        let flushed = rec.failed.len();
        rec.failed.clear();
        if flushed > 0 {
            tracing::debug!(user_id = %user_id, flushed, "link recovered within grace period");
        }
        flushed
    }

    /// A beat could not be delivered. Queues the failure (bounded,
    /// drop-oldest) and starts the grace timer if it is not already running.
    pub fn record_failure(&self, user_id: &str, now: Instant) {
        let Some(mut rec) = self.records.get_mut(user_id) else {
            return;
        };
        if rec.failed.len() == self.queue_cap {
            rec.failed.pop_front();
        }
        rec.failed.push_back(now);
        if rec.grace_deadline.is_none() {
            rec.grace_deadline = Some(now + self.grace);
            tracing::debug!(user_id = %user_id, "heartbeat failed, grace timer started");
        }
        rec.state = LinkState::Degraded;
    }

    /// Users whose grace window elapsed with no successful beat. Each user is
    /// promoted to `Disconnected` and dropped from tracking exactly once; a
    /// success landing between the promotion and the removal cancels both.
    pub fn take_disconnected(&self, now: Instant) -> Vec<String> {
        let expired: Vec<String> = self
            .records
            .iter()
            .filter(|rec| {
                rec.state == LinkState::Degraded
                    && rec.grace_deadline.is_some_and(|d| d <= now)
            })
            .map(|rec| rec.key().clone())
            .collect();
        expired
            .into_iter()
            .filter_map(|user_id| {
                let promoted = self.records.get_mut(&user_id).is_some_and(|mut rec| {
                    if rec.state == LinkState::Degraded
                        && rec.grace_deadline.is_some_and(|d| d <= now)
                    {
                        rec.state = LinkState::Disconnected;
                        true
                    } else {
                        false
                    }
                });
                if !promoted {
                    return None;
                }
                self.records
                    .remove_if(&user_id, |_, rec| rec.state == LinkState::Disconnected)
                    .map(|(user_id, _)| user_id)
            })
            .collect()
    }

    /// Connected users whose last successful beat is older than `idle`.
    /// Degraded users are skipped; their grace timer is already running.
    pub fn idle_since(&self, now: Instant, idle: Duration) -> Vec<String> {
        self.records
            .iter()
            .filter(|rec| {
                rec.state == LinkState::Connected
                    && now.duration_since(rec.last_seen) >= idle
            })
            .map(|rec| rec.key().clone())
            .collect()
    }

    /// Stop tracking a user leaving the matchmaking/play state.
    pub fn forget(&self, user_id: &str) {
        self.records.remove(user_id);
    }

    pub fn state(&self, user_id: &str) -> Option<LinkState> {
        self.records.get(user_id).map(|rec| rec.state)
    }

    #[cfg(test)]
    pub fn queued_failures(&self, user_id: &str) -> usize {
        self.records.get(user_id).map_or(0, |rec| rec.failed.len())
    }
}
