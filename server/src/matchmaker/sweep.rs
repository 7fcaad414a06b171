//! Periodic staleness sweep. The durable backstop for lost timers: staleness
//! is re-derived from stored timestamps alone, so a session whose deadline
//! entry vanished (redeploy, crash) still disappears within one interval.

use crate::matchmaker::{AppState, SessionStatus};
use crate::store::{Expected, OrderBy, SessionFilter, SessionPatch};
use shared::ServerMessage;

impl AppState {
    /// One pass: drop `Searching` sessions past the waiting-room ceiling and
    /// `Matched` sessions stuck short of `Active` past the stall ceiling.
    /// Safe to run concurrently with the orchestrator: each removal is first
    /// claimed by a conditional write against the status the staleness check
    /// saw, so an attach or promotion landing in between wins and the session
    /// is left alone. Returns how many sessions were swept.
    pub async fn sweep_once(&self) -> usize {
        let sessions = match self
            .store
            .query(SessionFilter::default(), OrderBy::CreatedAsc)
            .await
        {
            Ok(sessions) => sessions,
            Err(err) => {
                tracing::warn!(%err, "sweep query failed, will retry next interval");
                return 0;
            }
        };

        let mut swept = 0;
        for session in sessions {
            let stale = match session.status {
                SessionStatus::Searching => {
                    session.created_at.elapsed() > self.config.waiting_room_deadline
                }
                SessionStatus::Matched => {
                    session.updated_at.elapsed() > self.config.matched_stall_ceiling
                }
                _ => false,
            };
            if !stale {
                continue;
            }
            let claimed = self
                .store
                .conditional_update(
                    &session.id,
                    Expected {
                        slots_open: None,
                        status: Some(session.status),
                    },
                    SessionPatch {
                        status: Some(SessionStatus::Abandoned),
                        ..SessionPatch::default()
                    },
                )
                .await;
            if claimed.is_err() {
                continue;
            }
            self.timeouts.clear(&session.id);
            if self.store.delete(&session.id).await.is_err() {
                continue;
            }
            swept += 1;
            tracing::info!(
                session_id = %session.id,
                status = ?session.status,
                age_ms = u64::try_from(session.created_at.elapsed().as_millis()).unwrap_or(u64::MAX),
                "swept stale session"
            );
            if session.status == SessionStatus::Searching {
                let host = &session.host.user_id;
                self.locks.release_user(host);
                self.liveness.forget(host);
                self.notify(host, ServerMessage::SearchTimeout);
            }
        }
        swept
    }
}
