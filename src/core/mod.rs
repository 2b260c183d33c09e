//! Core identifiers.
//!
//! Every identity value is normalized to one of these types at the
//! protocol boundary and compared only in that form.

pub mod id;

pub use id::{ConnectionId, SessionId, UserId};
