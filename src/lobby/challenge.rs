//! Challenge Book
//!
//! Pending challenges, one slot per challenged user. A newer challenge
//! to the same user replaces the older one.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::core::id::UserId;

/// A pending challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Challenge {
    /// Who sent it.
    pub challenger: UserId,
    /// Who must answer it.
    pub challenged: UserId,
    /// When it was sent.
    pub created_at: Instant,
}

impl Challenge {
    /// New challenge stamped now.
    pub fn new(challenger: UserId, challenged: UserId) -> Self {
        Self {
            challenger,
            challenged,
            created_at: Instant::now(),
        }
    }
}

/// Pending challenges keyed by challenged user.
#[derive(Debug, Default)]
pub struct ChallengeBook {
    pending: BTreeMap<UserId, Challenge>,
}

impl ChallengeBook {
    /// Empty book.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a challenge, returning the one it displaced.
    pub fn insert(&mut self, challenge: Challenge) -> Option<Challenge> {
        self.pending.insert(challenge.challenged, challenge)
    }

    /// Pending challenge addressed to `challenged`.
    pub fn get(&self, challenged: &UserId) -> Option<&Challenge> {
        self.pending.get(challenged)
    }

    /// Remove and return the challenge addressed to `challenged`.
    pub fn take(&mut self, challenged: &UserId) -> Option<Challenge> {
        self.pending.remove(challenged)
    }

    /// Remove every challenge sent by or addressed to `user`.
    pub fn remove_involving(&mut self, user: &UserId) -> Vec<Challenge> {
        let keys: Vec<UserId> = self
            .pending
            .values()
            .filter(|c| c.challenger == *user || c.challenged == *user)
            .map(|c| c.challenged)
            .collect();
        keys.iter().filter_map(|k| self.pending.remove(k)).collect()
    }

    /// Remove every challenge older than `ttl` at `now`.
    pub fn expire(&mut self, now: Instant, ttl: Duration) -> Vec<Challenge> {
        let keys: Vec<UserId> = self
            .pending
            .values()
            .filter(|c| now.saturating_duration_since(c.created_at) > ttl)
            .map(|c| c.challenged)
            .collect();
        keys.iter().filter_map(|k| self.pending.remove(k)).collect()
    }

    /// Number of pending challenges.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// True when nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
