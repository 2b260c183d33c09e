//! Lobby errors and their protocol codes.

use thiserror::Error;

use crate::lobby::directory::DirectoryError;
use crate::network::auth::AuthError;
use crate::network::protocol::{ErrorCode, ServerMessage};

/// Errors from user-initiated lobby actions. Each is scoped to the
/// request that caused it and is reported back as an `errorMsg`.
#[derive(Debug, Error)]
pub enum LobbyError {
    /// Connection has not logged in.
    #[error("log in first")]
    NotAuthenticated,
    /// Connection has not joined the lobby (or was replaced by a newer one).
    #[error("join the lobby first")]
    NotJoined,
    /// Message names someone other than the connection's own identity.
    #[error("you can only act as yourself")]
    IdentityMismatch,
    /// Login rejected.
    #[error("login failed: {0}")]
    Auth(#[from] AuthError),
    /// Guest logins are turned off.
    #[error("guest logins are disabled")]
    GuestsDisabled,
    /// Display name empty after trimming.
    #[error("display name is empty")]
    InvalidDisplayName,
    /// Identity does not resolve to a user.
    #[error("unknown user")]
    UnknownUser,
    /// Challenger is not in the lobby.
    #[error("challenger is not online")]
    ChallengerOffline,
    /// Challenged user is not in the lobby.
    #[error("that player is not online")]
    ChallengedOffline,
    /// Challenged user is in a game.
    #[error("that player is in a game")]
    TargetBusy,
    /// The acting user is already in a game.
    #[error("you are already in a game")]
    AlreadyInGame,
    /// Challenger and challenged are the same user.
    #[error("you cannot challenge yourself")]
    SelfChallenge,
    /// Nothing pending for this user.
    #[error("no pending challenge")]
    NoChallenge,
    /// Opponent went offline or into another game.
    #[error("your opponent is no longer available")]
    OpponentUnavailable,
    /// Session is gone.
    #[error("that game is no longer available")]
    GameNotFound,
    /// Persistence collaborator failed.
    #[error("user directory unavailable")]
    Directory(DirectoryError),
}

impl From<DirectoryError> for LobbyError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::NotFound => LobbyError::UnknownUser,
            other => LobbyError::Directory(other),
        }
    }
}

impl LobbyError {
    /// Protocol error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            LobbyError::NotAuthenticated => ErrorCode::NotAuthenticated,
            LobbyError::NotJoined => ErrorCode::NotJoined,
            LobbyError::IdentityMismatch => ErrorCode::IdentityMismatch,
            LobbyError::Auth(_) | LobbyError::GuestsDisabled => ErrorCode::AuthFailed,
            LobbyError::InvalidDisplayName | LobbyError::SelfChallenge => ErrorCode::InvalidInput,
            LobbyError::UnknownUser => ErrorCode::UnknownUser,
            LobbyError::ChallengerOffline | LobbyError::ChallengedOffline => ErrorCode::UserOffline,
            LobbyError::TargetBusy | LobbyError::AlreadyInGame | LobbyError::OpponentUnavailable => {
                ErrorCode::UserBusy
            }
            LobbyError::NoChallenge => ErrorCode::NoChallenge,
            LobbyError::GameNotFound => ErrorCode::GameNotFound,
            LobbyError::Directory(_) => ErrorCode::InternalError,
        }
    }

    /// The `errorMsg` reporting this error.
    pub fn to_message(&self) -> ServerMessage {
        ServerMessage::error(self.code(), self.to_string())
    }
}
