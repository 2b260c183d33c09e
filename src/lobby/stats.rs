//! Stats Reconciliation
//!
//! Turns a finished match into per-participant deltas and commits them
//! through the persistence collaborator. Callers must not hold the
//! registry or a session lock while awaiting [`commit_outcome`].

use std::sync::Arc;

use tracing::{info, warn};

use crate::core::id::UserId;
use crate::game::session::Outcome;
use crate::store::{Stats, StatsDelta, StoreError, UserStore};

/// Delta for `participant` given the match outcome.
pub fn delta_for(participant: &UserId, outcome: &Outcome) -> StatsDelta {
    match outcome {
        Outcome::Tie => StatsDelta { won: 0, lost: 0, played: 1 },
        Outcome::Won { winner } if winner == participant => StatsDelta { won: 1, lost: 0, played: 1 },
        Outcome::Won { .. } => StatsDelta { won: 0, lost: 1, played: 1 },
    }
}

/// Result of one participant's commit.
#[derive(Debug)]
pub struct StatsCommit {
    /// Participant.
    pub user_id: UserId,
    /// Updated totals, or why they were not saved.
    pub result: Result<Stats, StoreError>,
}

/// Commit both participants' deltas concurrently.
///
/// Failures are logged and returned; they never abort the caller's teardown.
pub async fn commit_outcome(
    store: &Arc<dyn UserStore>,
    participants: [UserId; 2],
    outcome: Outcome,
) -> [StatsCommit; 2] {
    let [a, b] = participants;
    let (ra, rb) = tokio::join!(
        store.increment_stats(a, delta_for(&a, &outcome)),
        store.increment_stats(b, delta_for(&b, &outcome)),
    );

    let commits = [
        StatsCommit { user_id: a, result: ra },
        StatsCommit { user_id: b, result: rb },
    ];
    for commit in &commits {
        match commit.result {
            Ok(stats) => info!(
                "Stats for {}: played {} won {} lost {}",
                commit.user_id.short(),
                stats.games_played,
                stats.games_won,
                stats.games_lost
            ),
            Err(ref e) => warn!("Failed to save stats for {}: {}", commit.user_id.short(), e),
        }
    }
    commits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{IdentityKey, MemoryUserStore, UserRecord};

    fn p1() -> UserId {
        UserId::new([1; 16])
    }

    fn p2() -> UserId {
        UserId::new([2; 16])
    }

    #[test]
    fn test_win_deltas() {
        let outcome = Outcome::Won { winner: p1() };
        assert_eq!(delta_for(&p1(), &outcome), StatsDelta { won: 1, lost: 0, played: 1 });
        assert_eq!(delta_for(&p2(), &outcome), StatsDelta { won: 0, lost: 1, played: 1 });
    }

    #[test]
    fn test_tie_deltas() {
        let expected = StatsDelta { won: 0, lost: 0, played: 1 };
        assert_eq!(delta_for(&p1(), &Outcome::Tie), expected);
        assert_eq!(delta_for(&p2(), &Outcome::Tie), expected);
    }

    #[tokio::test]
    async fn test_commit_outcome_updates_both() {
        let memory = Arc::new(MemoryUserStore::new());
        memory.upsert_user(UserRecord::new(p1(), None, "Ada")).await.unwrap();
        memory.upsert_user(UserRecord::new(p2(), None, "Bob")).await.unwrap();
        let store: Arc<dyn UserStore> = memory;

        let [c1, c2] = commit_outcome(&store, [p1(), p2()], Outcome::Won { winner: p1() }).await;
        let s1 = c1.result.unwrap();
        let s2 = c2.result.unwrap();

        assert_eq!((s1.games_played, s1.games_won, s1.games_lost), (1, 1, 0));
        assert_eq!((s2.games_played, s2.games_won, s2.games_lost), (1, 0, 1));

        let stored = store.find_user(&IdentityKey::Internal(p2())).await.unwrap().unwrap();
        assert_eq!(stored.stats, s2);
    }

    #[tokio::test]
    async fn test_commit_failure_is_reported_not_fatal() {
        let memory = Arc::new(MemoryUserStore::new());
        memory.upsert_user(UserRecord::new(p1(), None, "Ada")).await.unwrap();
        let store: Arc<dyn UserStore> = memory;

        let [c1, c2] = commit_outcome(&store, [p1(), p2()], Outcome::Tie).await;
        assert!(c1.result.is_ok());
        assert!(matches!(c2.result, Err(StoreError::NotFound(_))));
    }
}
