use std::time::Duration;

/// Tunable timings and limits for the matchmaker. Production values are the
/// defaults; every knob can be overridden through `MATCHD_*` environment
/// variables (milliseconds). Tests construct short-duration configs directly.
#[derive(Debug, Clone)]
pub struct MatchConfig {
    /// How long an acquired per-user lock stays valid if never released.
    pub lock_ttl: Duration,
    /// Interval of the background pass that evicts expired locks.
    pub lock_evict_interval: Duration,
    /// Hard ceiling on how long a session may sit in `Searching`.
    pub waiting_room_deadline: Duration,
    /// Ceiling for `Matched` sessions that never progressed to `Active`.
    pub matched_stall_ceiling: Duration,
    /// Interval of the sweep cleaner.
    pub sweep_interval: Duration,
    /// Window after a failed heartbeat during which a reconnect still counts
    /// as never having disconnected.
    pub grace_period: Duration,
    /// How often a tracked user is expected to beat. Silence past this counts
    /// as a failed beat, so a half-open link still runs out its grace period.
    pub beat_interval: Duration,
    /// Tick of the scheduler that fires due timeouts and grace deadlines.
    pub scheduler_tick: Duration,
    /// Delay before an optimistic queue entry turns into a real request.
    pub optimistic_delay: Duration,
    /// Capacity of the per-user failed-heartbeat queue.
    pub failed_beat_capacity: usize,
    /// Attempts for store calls before surfacing "try again".
    pub store_retry_attempts: u32,
    /// Initial backoff between store retries; doubles per attempt.
    pub store_retry_backoff: Duration,
    /// Base rating band for ranked matching.
    pub ranked_band: i32,
    /// How much the band widens per widen interval of session age.
    pub ranked_band_widen: i32,
    /// Session age step at which the ranked band widens.
    pub ranked_widen_interval: Duration,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            lock_ttl: Duration::from_secs(10),
            lock_evict_interval: Duration::from_secs(30),
            waiting_room_deadline: Duration::from_secs(45),
            matched_stall_ceiling: Duration::from_secs(120),
            sweep_interval: Duration::from_secs(30),
            grace_period: Duration::from_secs(30),
            beat_interval: Duration::from_secs(10),
            scheduler_tick: Duration::from_secs(1),
            optimistic_delay: Duration::from_secs(2),
            failed_beat_capacity: 10,
            store_retry_attempts: 3,
            store_retry_backoff: Duration::from_millis(250),
            ranked_band: 200,
            ranked_band_widen: 100,
            ranked_widen_interval: Duration::from_secs(10),
        }
    }
}

impl MatchConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            lock_ttl: env_ms("MATCHD_LOCK_TTL_MS", d.lock_ttl),
            lock_evict_interval: env_ms("MATCHD_LOCK_EVICT_MS", d.lock_evict_interval),
            waiting_room_deadline: env_ms("MATCHD_WAIT_DEADLINE_MS", d.waiting_room_deadline),
            matched_stall_ceiling: env_ms("MATCHD_MATCHED_STALL_MS", d.matched_stall_ceiling),
            sweep_interval: env_ms("MATCHD_SWEEP_MS", d.sweep_interval),
            grace_period: env_ms("MATCHD_GRACE_MS", d.grace_period),
            beat_interval: env_ms("MATCHD_BEAT_INTERVAL_MS", d.beat_interval),
            scheduler_tick: env_ms("MATCHD_TICK_MS", d.scheduler_tick),
            optimistic_delay: env_ms("MATCHD_OPTIMISTIC_MS", d.optimistic_delay),
            ..d
        }
    }
}

fn env_ms(name: &str, default: Duration) -> Duration {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}
