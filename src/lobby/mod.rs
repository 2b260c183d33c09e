//! Lobby
//!
//! Identity, presence, challenges and game sessions, coordinated by
//! [`Lobby`].

pub mod challenge;
pub mod directory;
pub mod error;
pub mod hub;
pub mod presence;
pub mod sessions;
pub mod stats;

pub use challenge::{Challenge, ChallengeBook};
pub use directory::{DirectoryError, IdentityDirectory};
pub use error::LobbyError;
pub use hub::Lobby;
pub use presence::{ClientSender, ConnectionHandle, PresenceEntry, PresenceRegistry};
pub use sessions::{SessionHandle, SessionManager};
