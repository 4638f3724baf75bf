//! Command errors reported back to the connection that issued the command.
//!
//! Every variant is recoverable. Handlers validate completely before they
//! mutate anything, so returning one of these leaves lobby and session state
//! exactly as it was.

use arena_shared::MemberId;
use thiserror::Error;

/// Coarse classification of a [`CommandError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Authorization,
    State,
    Capacity,
    Validation,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("register before sending this command")]
    NotRegistered,
    #[error("only the host can do that")]
    NotHost,

    #[error("already in a room")]
    AlreadyInRoom,
    #[error("already waiting in matchmaking")]
    AlreadyQueued,
    #[error("not waiting in matchmaking")]
    NotQueued,
    #[error("not in a room")]
    NotInRoom,
    #[error("room {0} not found")]
    RoomNotFound(String),
    #[error("this player is already in the room")]
    DuplicateIdentity,
    #[error("player {0} is already connected")]
    IdentityInUse(String),
    #[error("game already started")]
    GameAlreadyStarted,
    #[error("no game is running")]
    GameNotRunning,
    #[error("team {0} has no players")]
    EmptyTeam(String),
    #[error("pick a team before hitting the ball")]
    NotOnTeam,

    #[error("room is full")]
    RoomFull,
    #[error("team {0} is full")]
    TeamFull(String),
    #[error("team {0} has more than three players")]
    TeamOverflow(String),
    #[error("no room code available")]
    NoRoomCodeAvailable,

    #[error("invalid team '{0}'")]
    InvalidTeam(String),
    #[error("invalid room code '{0}'")]
    MalformedCode(String),
    #[error("no bot with id {0} in this room")]
    UnknownBot(MemberId),
    #[error("invalid identity: {0}")]
    InvalidIdentity(String),
}

impl CommandError {
    pub fn kind(&self) -> ErrorKind {
        use CommandError::*;
        match self {
            NotRegistered | NotHost => ErrorKind::Authorization,
            AlreadyInRoom | AlreadyQueued | NotQueued | NotInRoom | RoomNotFound(_)
            | DuplicateIdentity | IdentityInUse(_) | GameAlreadyStarted | GameNotRunning
            | EmptyTeam(_) | NotOnTeam => ErrorKind::State,
            RoomFull | TeamFull(_) | TeamOverflow(_) | NoRoomCodeAvailable => ErrorKind::Capacity,
            InvalidTeam(_) | MalformedCode(_) | UnknownBot(_) | InvalidIdentity(_) => {
                ErrorKind::Validation
            }
        }
    }
}

pub type CommandResult<T> = Result<T, CommandError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_taxonomy() {
        assert_eq!(CommandError::NotHost.kind(), ErrorKind::Authorization);
        assert_eq!(CommandError::NotRegistered.kind(), ErrorKind::Authorization);
        assert_eq!(CommandError::GameAlreadyStarted.kind(), ErrorKind::State);
        assert_eq!(CommandError::AlreadyQueued.kind(), ErrorKind::State);
        assert_eq!(
            CommandError::IdentityInUse("u-1".to_string()).kind(),
            ErrorKind::State
        );
        assert_eq!(CommandError::RoomFull.kind(), ErrorKind::Capacity);
        assert_eq!(
            CommandError::TeamFull("A".to_string()).kind(),
            ErrorKind::Capacity
        );
        assert_eq!(
            CommandError::InvalidTeam("C".to_string()).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            CommandError::MalformedCode("12".to_string()).kind(),
            ErrorKind::Validation
        );
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            CommandError::RoomNotFound("0042".to_string()).to_string(),
            "room 0042 not found"
        );
        assert_eq!(
            CommandError::UnknownBot(9).to_string(),
            "no bot with id 9 in this room"
        );
    }
}
