//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! Every frame is a JSON text message tagged by `type`, fields in camelCase.
//! Ids are parsed into [`UserId`]/[`SessionId`] here, so a malformed id is
//! rejected input rather than a lookup miss.

use serde::{Deserialize, Serialize};

use crate::core::id::{SessionId, UserId};
use crate::game::session::Outcome;

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Log in with a token from the external login provider.
    Authenticate {
        /// Signed identity assertion (JWT).
        token: String,
    },

    /// Log in without a provider account.
    GuestLogin {
        /// Requested display name.
        display_name: String,
    },

    /// Enter the lobby.
    JoinLobby {
        /// Identity to join as; must match the authenticated identity.
        user_id: UserId,
    },

    /// Challenge another lobby member.
    SendChallenge {
        /// Sender.
        challenger_id: UserId,
        /// Target.
        challenged_id: UserId,
    },

    /// Accept the pending challenge addressed to `challenged_id`.
    AcceptChallenge {
        /// The accepting user.
        challenged_id: UserId,
    },

    /// Refuse the pending challenge addressed to `challenged_id`.
    RefuseChallenge {
        /// The refusing user.
        challenged_id: UserId,
    },

    /// Place a mark.
    MakeMove {
        /// Target session.
        session_id: SessionId,
        /// Mover.
        user_id: UserId,
        /// Cell 0..9, row-major. Out-of-range values are dropped, not rejected.
        cell_index: i64,
    },

    /// Leave the game (forfeits a running match).
    QuitGame {
        /// Target session.
        session_id: SessionId,
        /// Quitting user.
        user_id: UserId,
    },

    /// Ask for a rematch.
    RequestRematch {
        /// Target session.
        session_id: SessionId,
        /// Voting user.
        user_id: UserId,
    },

    /// Agree to a requested rematch.
    AcceptRematch {
        /// Target session.
        session_id: SessionId,
        /// Voting user.
        user_id: UserId,
    },

    /// Turn down a rematch.
    RefuseRematch {
        /// Target session.
        session_id: SessionId,
        /// Refusing user.
        user_id: UserId,
    },

    /// Ping for latency measurement.
    Ping {
        /// Client timestamp, echoed back.
        timestamp: u64,
    },
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Authentication result.
    AuthResult(AuthResult),

    /// Full lobby snapshot.
    OnlinePlayers {
        /// Every joined user.
        players: Vec<OnlinePlayer>,
    },

    /// Someone challenged you.
    ChallengeReceived {
        /// Challenger id.
        from_id: UserId,
        /// Challenger display name.
        from_name: String,
    },

    /// Your challenge was refused.
    ChallengeRefused {
        /// The user who refused.
        refused_by: UserId,
    },

    /// A pending challenge between you and `user_id` no longer exists
    /// (replaced, expired, or the other side left).
    ChallengeWithdrawn {
        /// The other party.
        user_id: UserId,
    },

    /// A session started.
    GameStarted {
        /// New session.
        session_id: SessionId,
        /// Your opponent.
        opponent_id: UserId,
    },

    /// Board state after a change.
    UpdateGame(GameUpdate),

    /// Match over; stats have been reconciled.
    GameEnded {
        /// Session.
        session_id: SessionId,
        /// Final outcome.
        outcome: Outcome,
    },

    /// Your opponent wants a rematch.
    RematchRequested {
        /// Requesting user.
        from_user: UserId,
    },

    /// Your opponent turned down (or left) the rematch.
    RematchRefused {
        /// Refusing user.
        by_user: UserId,
    },

    /// Error or non-fatal warning.
    ErrorMsg(ServerError),

    /// Pong response.
    Pong {
        /// Echoed client timestamp.
        timestamp: u64,
        /// Server time (ms since epoch).
        server_time: u64,
    },

    /// Server is shutting down.
    Shutdown {
        /// Reason.
        reason: String,
    },
}

/// Authentication result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResult {
    /// Whether auth succeeded.
    pub success: bool,
    /// Internal user id if successful.
    pub user_id: Option<UserId>,
    /// Display name if successful.
    pub display_name: Option<String>,
    /// Error message if failed.
    pub error: Option<String>,
    /// Server version.
    pub server_version: String,
}

/// One lobby member in an `onlinePlayers` snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlinePlayer {
    /// User id.
    pub user_id: UserId,
    /// Display name.
    pub display_name: String,
    /// Currently bound to a live game.
    pub in_game: bool,
    /// Matches finished.
    pub games_played: u32,
    /// Matches won.
    pub games_won: u32,
    /// Matches lost.
    pub games_lost: u32,
}

/// Session state sent to both participants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameUpdate {
    /// Session.
    pub session_id: SessionId,
    /// Nine cells, each empty or the owning participant's id.
    pub board: Vec<Option<UserId>>,
    /// Participant to move.
    pub current_turn: UserId,
    /// Outcome, absent while the match runs.
    pub outcome: Option<Outcome>,
}

/// Server error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerError {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub text: String,
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorCode {
    /// Authentication failed.
    AuthFailed,
    /// Not authenticated.
    NotAuthenticated,
    /// Not in the lobby.
    NotJoined,
    /// Message names an identity other than the connection's own.
    IdentityMismatch,
    /// Malformed message.
    InvalidInput,
    /// Unknown user.
    UnknownUser,
    /// Target is not online.
    UserOffline,
    /// Target (or sender) is in a game.
    UserBusy,
    /// No pending challenge.
    NoChallenge,
    /// Game no longer exists.
    GameNotFound,
    /// Statistics could not be saved.
    StatsNotSaved,
    /// Server overloaded.
    ServerOverloaded,
    /// Internal error.
    InternalError,
}

impl ServerMessage {
    /// Build an `errorMsg`.
    pub fn error(code: ErrorCode, text: impl Into<String>) -> Self {
        ServerMessage::ErrorMsg(ServerError {
            code,
            text: text.into(),
        })
    }
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}
