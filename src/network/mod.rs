//! Network Layer
//!
//! WebSocket server, wire protocol and login verification.
//! All lobby state lives in `lobby/`; this layer only translates.

pub mod auth;
pub mod protocol;
pub mod server;

pub use auth::{verify_token, AuthConfig, AuthError, TokenClaims, VerifiedIdentity};
pub use protocol::{ClientMessage, ErrorCode, GameUpdate, OnlinePlayer, ServerMessage};
pub use server::{GameServer, GameServerError, ServerConfig};
