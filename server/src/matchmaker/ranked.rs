//! Skill-banded candidate selection for ranked sessions. Same session
//! records, same conditional attach. Only the choice of open session
//! differs: closest rating within a band that widens as a session ages, so
//! nobody waits forever for a perfect opponent.

use crate::matchmaker::{MatchConfig, Session};
use std::time::Instant;

/// Pick the open session whose host rating is closest to `rating`, among
/// candidates whose band (widened by their own age) admits the caller.
/// Candidates arrive oldest-first; ties on rating distance keep the older
/// session.
pub fn pick_candidate<'a>(
    candidates: &'a [Session],
    user_id: &str,
    rating: i32,
    now: Instant,
    config: &MatchConfig,
) -> Option<&'a Session> {
    candidates
        .iter()
        .filter(|s| s.host.user_id != user_id)
        .filter(|s| {
            let age = now.saturating_duration_since(s.created_at);
            let widen_steps = if config.ranked_widen_interval.is_zero() {
                0
            } else {
                i32::try_from(age.as_millis() / config.ranked_widen_interval.as_millis().max(1))
                    .unwrap_or(i32::MAX)
            };
            let band = config
                .ranked_band
                .saturating_add(config.ranked_band_widen.saturating_mul(widen_steps));
            (s.host.rating - rating).abs() <= band
        })
        .min_by_key(|s| (s.host.rating - rating).abs())
}
