//! # Tic-Tac-Toe Lobby Server
//!
//! Real-time lobby, challenge negotiation and turn-based game sessions for
//! two-player tic-tac-toe over WebSocket.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   TIC-TAC-TOE LOBBY SERVER                   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Identifiers                               │
//! │  └── id.rs       - User, session and connection ids          │
//! │                                                              │
//! │  game/           - Game rules (pure)                         │
//! │  ├── board.rs    - Cells, marks, win lines                   │
//! │  └── session.rs  - Turn order, outcomes, rematch votes       │
//! │                                                              │
//! │  lobby/          - Shared state                              │
//! │  ├── directory.rs- Identity resolution and login upserts     │
//! │  ├── presence.rs - Who is online, over which connection      │
//! │  ├── challenge.rs- Pending challenges                        │
//! │  ├── sessions.rs - Live and dormant game sessions            │
//! │  ├── stats.rs    - Stats reconciliation                      │
//! │  └── hub.rs      - Coordinator and broadcasts                │
//! │                                                              │
//! │  store/          - Persistence collaborator                  │
//! │  └── memory.rs   - In-memory store with JSON snapshots       │
//! │                                                              │
//! │  network/        - Networking                                │
//! │  ├── server.rs   - WebSocket server and dispatcher           │
//! │  ├── protocol.rs - Message types                             │
//! │  └── auth.rs     - Provider token verification               │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Consistency
//!
//! Every broadcast is built and queued inside the same critical section
//! as the state change it describes. Outbound queues are unbounded, so
//! sending never waits on a slow client while a lock is held.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod lobby;
pub mod network;
pub mod store;

// Re-export commonly used types
pub use core::id::{ConnectionId, SessionId, UserId};
pub use game::session::{GameSession, Outcome};
pub use lobby::Lobby;
pub use network::server::{GameServer, ServerConfig};
pub use store::{MemoryUserStore, UserStore};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
