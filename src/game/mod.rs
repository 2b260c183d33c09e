//! Game Logic Module
//!
//! Board rules and the per-session state machine. No I/O, no locking.
//!
//! ## Module Structure
//!
//! - `board`: Cells, marks, win lines
//! - `session`: Turn order, outcomes, rematch votes

pub mod board;
pub mod session;

// Re-export key types
pub use board::{Board, BoardError, Mark, CELL_COUNT, WIN_LINES};
pub use session::{GameSession, MoveRejection, Outcome, RematchVote};
