use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const PROTOCOL_VERSION: u32 = 1;

pub const COURT_WIDTH: f32 = 800.0;
pub const COURT_HEIGHT: f32 = 600.0;
pub const FLOOR_HEIGHT: f32 = 100.0;
/// Screen y of the floor surface. y grows downwards.
pub const FLOOR_Y: f32 = COURT_HEIGHT - FLOOR_HEIGHT;
pub const NET_X: f32 = COURT_WIDTH / 2.0;
pub const NET_WIDTH: f32 = 30.0;
pub const NET_HEIGHT: f32 = 150.0;
pub const NET_TOP_Y: f32 = FLOOR_Y - NET_HEIGHT;

pub const BALL_RADIUS: f32 = 15.0;
pub const BALL_SPAWN_X: f32 = COURT_WIDTH / 2.0;
pub const BALL_SPAWN_Y: f32 = 100.0;

// Ball physics, per 16ms tick.
pub const GRAVITY: f32 = 0.6;
pub const AIR_DRAG: f32 = 0.99;
pub const WALL_RESTITUTION: f32 = 0.8;
pub const CEILING_RESTITUTION: f32 = 0.5;
pub const NET_RESTITUTION: f32 = 0.5;
pub const FLOOR_RESTITUTION: f32 = 0.7;
pub const FLOOR_FRICTION: f32 = 0.9;
pub const MIN_BOUNCE_SPEED: f32 = 1.0;

// Player body kinematics, shared by clients and server-side bots.
pub const PLAYER_WIDTH: f32 = 30.0;
pub const PLAYER_HEIGHT: f32 = 50.0;
pub const PLAYER_SPEED: f32 = 5.0;
pub const PLAYER_GRAVITY: f32 = 0.8;
pub const JUMP_VELOCITY: f32 = -12.0;
pub const PLAYER_GROUND_Y: f32 = FLOOR_Y - PLAYER_HEIGHT;

pub const TICK_MILLIS: u64 = 16;
pub const WINNING_SCORE: u32 = 15;
pub const TEAM_CAPACITY: usize = 3;
pub const ROOM_CAPACITY: usize = 6;
pub const ROOM_CODE_LEN: usize = 4;

/// Connection-scoped identifier. Bots draw from the same id space.
pub type ClientId = u32;
pub type MemberId = u32;
pub type SessionId = u32;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Team {
    A,
    B,
}

impl Team {
    pub fn opponent(self) -> Team {
        match self {
            Team::A => Team::B,
            Team::B => Team::A,
        }
    }
}

impl fmt::Display for Team {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Team::A => write!(f, "A"),
            Team::B => write!(f, "B"),
        }
    }
}

impl FromStr for Team {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "A" | "a" => Ok(Team::A),
            "B" | "b" => Ok(Team::B),
            other => Err(other.to_string()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum HitKind {
    Toss,
    Spike,
}

impl HitKind {
    pub fn as_str(self) -> &'static str {
        match self {
            HitKind::Toss => "toss",
            HitKind::Spike => "spike",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct HitRequest {
    pub power: HitKind,
    /// Only the sign matters: negative hits towards the left wall.
    pub direction: f32,
    /// Charge percentage. Values above 100 overload into a weak hit.
    pub gauge: f32,
}

/// Client-reported body state, relayed to other members unvalidated.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default)]
pub struct PlayerMotion {
    pub x: f32,
    pub y: f32,
    pub vel_x: f32,
    pub vel_y: f32,
    pub facing_right: bool,
    pub grounded: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct ActionPayload {
    pub direction: f32,
    pub gauge: f32,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub struct Score {
    pub team_a: u32,
    pub team_b: u32,
}

impl Score {
    pub fn increment(&mut self, team: Team) -> u32 {
        let counter = match team {
            Team::A => &mut self.team_a,
            Team::B => &mut self.team_b,
        };
        *counter += 1;
        *counter
    }

    /// The team that has reached the winning score, if any.
    pub fn leader_at(&self, threshold: u32) -> Option<Team> {
        if self.team_a >= threshold {
            Some(Team::A)
        } else if self.team_b >= threshold {
            Some(Team::B)
        } else {
            None
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum ScoreReason {
    BallLanded,
    ThreeTouchViolation,
}

impl ScoreReason {
    pub fn as_str(self) -> &'static str {
        match self {
            ScoreReason::BallLanded => "ball_landed",
            ScoreReason::ThreeTouchViolation => "three_touch_violation",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ScoreEvent {
    pub score: Score,
    pub reason: ScoreReason,
    pub scoring_team: Team,
    pub game_end: bool,
    pub winner: Option<Team>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default)]
pub struct BallSnapshot {
    pub x: f32,
    pub y: f32,
    pub vel_x: f32,
    pub vel_y: f32,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Waiting,
    InGame,
    Finished,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RosterEntry {
    pub id: MemberId,
    pub name: String,
    pub team: Option<Team>,
    pub is_bot: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct Teams {
    pub a: Vec<MemberId>,
    pub b: Vec<MemberId>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub code: Option<String>,
    pub host: MemberId,
    pub status: SessionStatus,
    pub roster: Vec<RosterEntry>,
    pub teams: Teams,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum Packet {
    // Client -> server
    Connect {
        client_version: u32,
    },
    Heartbeat,
    Disconnect,
    Register {
        player_id: String,
        character_id: String,
    },
    CreatePrivateSession,
    JoinPrivateSession {
        code: String,
    },
    SelectTeam {
        team: String,
    },
    StartGame,
    JoinMatchmaking,
    LeaveMatchmaking,
    LeaveSession,
    Move(PlayerMotion),
    Action {
        kind: String,
        payload: Option<ActionPayload>,
    },
    HitBall(HitRequest),
    AddBot,
    RemoveBot {
        bot_id: MemberId,
    },
    AssignBotTeam {
        bot_id: MemberId,
        team: String,
    },

    // Server -> client
    Connected {
        client_id: ClientId,
    },
    Disconnected {
        reason: String,
    },
    Registered {
        outcome: Result<String, String>,
    },
    MatchmakingJoined {
        queue_size: usize,
    },
    MatchmakingLeft,
    SessionCreated(SessionSnapshot),
    SessionJoined(SessionSnapshot),
    RosterChanged {
        roster: Vec<RosterEntry>,
    },
    TeamsChanged {
        teams: Teams,
    },
    HostChanged {
        host: MemberId,
    },
    GameStarted {
        teams: Teams,
    },
    BallState(BallSnapshot),
    ScoreUpdate(ScoreEvent),
    GameEnded {
        winner: Team,
        final_score: Score,
    },
    PlayerMoved {
        player: MemberId,
        motion: PlayerMotion,
    },
    PlayerAction {
        player: MemberId,
        kind: String,
        payload: Option<ActionPayload>,
    },
    PlayerLeft {
        player: MemberId,
    },
    BotAdded(RosterEntry),
    BotRemoved {
        bot_id: MemberId,
    },
    Error {
        message: String,
    },
}

/// Returns true when `code` has the shape of a room code.
pub fn is_valid_room_code(code: &str) -> bool {
    code.len() == ROOM_CODE_LEN && code.bytes().all(|b| b.is_ascii_digit())
}
