use serde::{Deserialize, Serialize};

/// Which dice ruleset a match is played under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GameMode {
    Classic,
    Frenzy,
    Elimination,
}

/// How the match was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionType {
    Quick,
    Ranked,
}

/// Snapshot of a player's public identity carried on a session record.
/// Frozen at request time so both clients render the same thing regardless
/// of what the player changes mid-search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub user_id: String,
    pub display_name: String,
    pub rating: i32,
    pub wins: u32,
    pub die_skin: String,
}

/// Mode-specific settings payload, fixed at session creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeSettings {
    pub target_score: u32,
    pub turn_seconds: u32,
    pub dice_count: u8,
}

impl ModeSettings {
    pub fn for_mode(mode: GameMode) -> Self {
        match mode {
            GameMode::Classic => Self {
                target_score: 10_000,
                turn_seconds: 60,
                dice_count: 6,
            },
            GameMode::Frenzy => Self {
                target_score: 5_000,
                turn_seconds: 20,
                dice_count: 6,
            },
            GameMode::Elimination => Self {
                target_score: 2_500,
                turn_seconds: 45,
                dice_count: 5,
            },
        }
    }
}

/// Everything the gameplay engine needs to run a match, handed off once a
/// session reaches `active`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchHandoff {
    pub session_id: String,
    pub mode: GameMode,
    pub players: [PlayerSnapshot; 2],
    pub settings: ModeSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClientMessage {
    FindMatch {
        mode: GameMode,
        session_type: SessionType,
    },
    /// Deferred variant used by the optimistic UI path: the server waits a
    /// short grace window before actually creating a session.
    QueueOptimistic {
        mode: GameMode,
        session_type: SessionType,
    },
    CancelFindMatch,
    Heartbeat,
    LeaveMatch,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ServerMessage {
    Searching {
        session_id: String,
    },
    MatchFound {
        session_id: String,
        opponent: PlayerSnapshot,
        mode: GameMode,
    },
    MatchStart(Box<MatchHandoff>),
    SearchTimeout,
    HeartbeatAck,
    MatchmakingCancelled,
    OpponentForfeited {
        winner: String,
    },
    OpponentDisconnected,
    Error(String),
}
