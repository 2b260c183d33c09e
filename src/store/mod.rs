//! User Persistence
//!
//! The persistence collaborator: durable user records and cumulative
//! statistics. The core only talks to it through [`UserStore`].

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::id::UserId;

pub use memory::MemoryUserStore;

/// Cumulative per-user statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    /// Matches finished.
    pub games_played: u32,
    /// Matches won.
    pub games_won: u32,
    /// Matches lost.
    pub games_lost: u32,
}

impl Stats {
    /// Add a delta.
    pub fn apply(&mut self, delta: StatsDelta) {
        self.games_played += delta.played;
        self.games_won += delta.won;
        self.games_lost += delta.lost;
    }
}

/// Increment to apply to a user's [`Stats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsDelta {
    /// Won increment.
    pub won: u32,
    /// Lost increment.
    pub lost: u32,
    /// Played increment.
    pub played: u32,
}

/// Durable user record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Internal id.
    pub id: UserId,
    /// Login provider subject, absent for guests.
    pub provider_id: Option<String>,
    /// Display name.
    pub display_name: String,
    /// Cumulative stats.
    pub stats: Stats,
    /// When the record was first created.
    pub created_at: DateTime<Utc>,
}

impl UserRecord {
    /// New record with zeroed stats.
    pub fn new(id: UserId, provider_id: Option<String>, display_name: impl Into<String>) -> Self {
        Self {
            id,
            provider_id,
            display_name: display_name.into(),
            stats: Stats::default(),
            created_at: Utc::now(),
        }
    }
}

/// Lookup key; either id space resolves to the same record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IdentityKey {
    /// Internal id.
    Internal(UserId),
    /// Login provider subject.
    Provider(String),
}

/// Persistence errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No record for this id.
    #[error("user {0} not found")]
    NotFound(UserId),
    /// Snapshot file I/O failed.
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Snapshot (de)serialization failed.
    #[error("storage format error: {0}")]
    Format(#[from] serde_json::Error),
    /// Backend unavailable.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Persistence collaborator.
///
/// `increment_stats` must be atomic per record with respect to concurrent
/// reads and increments of the same record.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Find a user by either id space.
    async fn find_user(&self, key: &IdentityKey) -> Result<Option<UserRecord>, StoreError>;

    /// Insert or replace a user record.
    async fn upsert_user(&self, record: UserRecord) -> Result<(), StoreError>;

    /// Apply a stats delta, returning the updated totals.
    async fn increment_stats(&self, id: UserId, delta: StatsDelta) -> Result<Stats, StoreError>;
}
