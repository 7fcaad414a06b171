use thiserror::Error;

/// User-facing matchmaking failures. Contention and conditional-write
/// conflicts never reach this type; the orchestrator recovers them by
/// falling back to a fresh session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MatchError {
    #[error("already searching for a match")]
    AlreadySearching,
    #[error("matchmaking is temporarily unavailable, try again")]
    StoreUnavailable,
    #[error("not currently in a match or queue")]
    NotInMatch,
}
