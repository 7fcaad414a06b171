use shared::{GameMode, ModeSettings, PlayerSnapshot, ServerMessage, SessionType};
use std::time::Instant;
use tokio::sync::mpsc;

pub type Tx = mpsc::UnboundedSender<ServerMessage>;

pub struct Player {
    pub tx: Tx,
    pub last_msg_at: Instant,
    pub snapshot: PlayerSnapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Searching,
    Matched,
    Active,
    Completed,
    Abandoned,
}

/// A waiting-room record. One open or filled game slot.
///
/// Invariants: `Searching` implies `opponent` is `None` and `slots_open == 1`;
/// `Matched` implies exactly one opponent and `slots_open == 0`.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub id: String,
    pub mode: GameMode,
    pub session_type: SessionType,
    pub slots_open: u8,
    pub status: SessionStatus,
    pub created_at: Instant,
    pub updated_at: Instant,
    pub host: PlayerSnapshot,
    pub opponent: Option<PlayerSnapshot>,
    pub settings: ModeSettings,
}

impl Session {
    /// A freshly opened waiting room for `host`. Timestamps here are
    /// placeholders; the store stamps them on `create`.
    pub fn open(mode: GameMode, session_type: SessionType, host: PlayerSnapshot) -> Self {
        let now = Instant::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            mode,
            session_type,
            slots_open: 1,
            status: SessionStatus::Searching,
            created_at: now,
            updated_at: now,
            host,
            opponent: None,
            settings: ModeSettings::for_mode(mode),
        }
    }
}

/// What a matchmaking request resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    /// No open session fit; a new waiting room was opened.
    Created { session_id: String },
    /// The caller was attached to an existing session as the opponent.
    Matched { session_id: String },
}

impl MatchOutcome {
    pub fn session_id(&self) -> &str {
        match self {
            Self::Created { session_id } | Self::Matched { session_id } => session_id,
        }
    }
}
