//! Game Session State Machine
//!
//! Authoritative state for one match between two participants:
//! board, turn order, move legality, win/tie detection, forfeit and
//! the rematch vote. Pure data; broadcasting and stats live in `lobby/`.
//!
//! ```text
//! InProgress ──move──▶ Won(by) | Tied ──settle──▶ dormant
//!     ▲                                             │
//!     └──────────── both participants vote ─────────┘
//! ```

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::id::{SessionId, UserId};
use crate::game::board::{Board, BoardError, Mark, CELL_COUNT};

/// Terminal result of a match.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "camelCase")]
pub enum Outcome {
    /// A participant completed a line, or the other forfeited.
    Won {
        /// The winning participant.
        winner: UserId,
    },
    /// Board filled with no line.
    Tie,
}

/// Reason a move was dropped. Moves are never reported back to the
/// client; this exists for debug logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MoveRejection {
    /// Cell index outside 0..9.
    #[error("cell index {0} is off the board")]
    OutOfRange(i64),
    /// Not the mover's turn (or mover is not a participant).
    #[error("not this player's turn")]
    NotYourTurn,
    /// Cell already taken.
    #[error("cell {0} is already taken")]
    CellTaken(usize),
    /// Match already decided.
    #[error("match is already over")]
    GameOver,
}

/// Result of a rematch vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RematchVote {
    /// Vote not counted (match running, stats unsettled, or voter not a participant).
    Ignored,
    /// Recorded; still waiting on this participant.
    Pending {
        /// Participant who has not yet voted.
        waiting_on: UserId,
    },
    /// Both participants voted; call [`GameSession::restart`].
    Ready,
}

/// A tic-tac-toe match between two participants.
#[derive(Debug, Clone)]
pub struct GameSession {
    /// Unique session identifier.
    pub id: SessionId,
    /// Participants; index 0 plays `X` and moved first in the first match.
    participants: [UserId; 2],
    board: Board,
    current_turn: UserId,
    outcome: Option<Outcome>,
    rematch_votes: BTreeSet<UserId>,
    /// Stats for the current match have been reconciled.
    settled: bool,
    /// Matches started in this session, rematches included.
    matches_played: u32,
}

impl GameSession {
    /// Create a session. The challenger moves first.
    pub fn new(id: SessionId, challenger: UserId, challenged: UserId) -> Self {
        Self {
            id,
            participants: [challenger, challenged],
            board: Board::new(),
            current_turn: challenger,
            outcome: None,
            rematch_votes: BTreeSet::new(),
            settled: false,
            matches_played: 1,
        }
    }

    /// Both participants, challenger first.
    pub fn participants(&self) -> [UserId; 2] {
        self.participants
    }

    /// Is this user one of the two participants.
    pub fn is_participant(&self, user: &UserId) -> bool {
        self.participants.contains(user)
    }

    /// The other participant.
    pub fn opponent_of(&self, user: &UserId) -> Option<UserId> {
        match self.participants {
            [a, b] if a == *user => Some(b),
            [a, b] if b == *user => Some(a),
            _ => None,
        }
    }

    /// Current board.
    pub fn board(&self) -> &Board {
        &self.board
    }

    /// Whose move it is.
    pub fn current_turn(&self) -> UserId {
        self.current_turn
    }

    /// Outcome, if the match is over.
    pub fn outcome(&self) -> Option<Outcome> {
        self.outcome
    }

    /// Match is over.
    pub fn is_finished(&self) -> bool {
        self.outcome.is_some()
    }

    /// Stats for the finished match have been committed.
    pub fn is_settled(&self) -> bool {
        self.settled
    }

    /// Record that stats reconciliation for this match completed.
    pub fn mark_settled(&mut self) {
        if self.outcome.is_some() {
            self.settled = true;
        }
    }

    /// Matches started in this session.
    pub fn matches_played(&self) -> u32 {
        self.matches_played
    }

    /// Current rematch votes.
    pub fn rematch_votes(&self) -> &BTreeSet<UserId> {
        &self.rematch_votes
    }

    /// Board with each cell mapped to its owner.
    pub fn board_owners(&self) -> Vec<Option<UserId>> {
        self.board
            .cells()
            .iter()
            .map(|cell| cell.map(|mark| self.owner_of(mark)))
            .collect()
    }

    fn mark_of(&self, user: &UserId) -> Option<Mark> {
        match self.participants {
            [x, _] if x == *user => Some(Mark::X),
            [_, o] if o == *user => Some(Mark::O),
            _ => None,
        }
    }

    fn owner_of(&self, mark: Mark) -> UserId {
        match mark {
            Mark::X => self.participants[0],
            Mark::O => self.participants[1],
        }
    }

    /// Apply a move.
    ///
    /// Checks run in order: index on the board, mover holds the turn, cell
    /// empty, match undecided. A rejected move leaves the state untouched.
    /// Returns the outcome if this move ended the match.
    pub fn apply_move(&mut self, user: UserId, cell_index: i64) -> Result<Option<Outcome>, MoveRejection> {
        let index = usize::try_from(cell_index)
            .ok()
            .filter(|i| *i < CELL_COUNT)
            .ok_or(MoveRejection::OutOfRange(cell_index))?;

        if self.current_turn != user {
            return Err(MoveRejection::NotYourTurn);
        }
        let mark = self.mark_of(&user).ok_or(MoveRejection::NotYourTurn)?;

        if self.board.get(index) != Some(None) {
            return Err(MoveRejection::CellTaken(index));
        }
        if self.outcome.is_some() {
            return Err(MoveRejection::GameOver);
        }

        self.board.place(index, mark).map_err(|e| match e {
            BoardError::OutOfRange(_) => MoveRejection::OutOfRange(cell_index),
            BoardError::Occupied(i) => MoveRejection::CellTaken(i),
        })?;

        if let Some(line_mark) = self.board.winner() {
            self.finish(Outcome::Won { winner: self.owner_of(line_mark) });
        } else if self.board.is_full() {
            self.finish(Outcome::Tie);
        } else {
            self.current_turn = self.owner_of(mark.opponent());
        }

        Ok(self.outcome)
    }

    /// Forfeit on behalf of `user`; the other participant wins.
    ///
    /// Returns the new outcome, or `None` if the match was already decided
    /// or `user` is not a participant.
    pub fn forfeit(&mut self, user: &UserId) -> Option<Outcome> {
        if self.outcome.is_some() {
            return None;
        }
        let winner = self.opponent_of(user)?;
        let outcome = Outcome::Won { winner };
        self.finish(outcome);
        Some(outcome)
    }

    fn finish(&mut self, outcome: Outcome) {
        self.outcome = Some(outcome);
        self.settled = false;
        self.rematch_votes.clear();
    }

    /// Vote for a rematch.
    pub fn vote_rematch(&mut self, user: UserId) -> RematchVote {
        if !self.settled || !self.is_participant(&user) {
            return RematchVote::Ignored;
        }
        self.rematch_votes.insert(user);
        if self.rematch_votes.len() == self.participants.len() {
            return RematchVote::Ready;
        }
        match self.opponent_of(&user) {
            Some(waiting_on) => RematchVote::Pending { waiting_on },
            None => RematchVote::Ignored,
        }
    }

    /// Refuse a rematch; clears all votes.
    ///
    /// Returns the participant to notify, or `None` if `user` is not a
    /// participant or the match is still running.
    pub fn decline_rematch(&mut self, user: &UserId) -> Option<UserId> {
        if self.outcome.is_none() {
            return None;
        }
        let other = self.opponent_of(user)?;
        self.rematch_votes.clear();
        Some(other)
    }

    /// Start the next match: empty board, no outcome, no votes.
    /// The turn holder is kept from the previous match.
    pub fn restart(&mut self) {
        self.board.clear();
        self.outcome = None;
        self.settled = false;
        self.rematch_votes.clear();
        self.matches_played += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn p1() -> UserId {
        UserId::new([1; 16])
    }

    fn p2() -> UserId {
        UserId::new([2; 16])
    }

    fn new_session() -> GameSession {
        GameSession::new(SessionId::new([9; 16]), p1(), p2())
    }

    /// Plays moves alternately starting with p1.
    fn play(session: &mut GameSession, cells: &[i64]) -> Option<Outcome> {
        let mut last = None;
        for &cell in cells {
            let mover = session.current_turn();
            last = session.apply_move(mover, cell).unwrap();
        }
        last
    }

    #[test]
    fn test_creation() {
        let session = new_session();
        assert_eq!(session.current_turn(), p1());
        assert_eq!(session.outcome(), None);
        assert_eq!(session.board().filled(), 0);
        assert!(session.rematch_votes().is_empty());
        assert_eq!(session.matches_played(), 1);
    }

    #[test]
    fn test_turn_alternates() {
        let mut session = new_session();
        assert_eq!(session.apply_move(p1(), 4), Ok(None));
        assert_eq!(session.current_turn(), p2());
        assert_eq!(session.apply_move(p2(), 0), Ok(None));
        assert_eq!(session.current_turn(), p1());
    }

    #[test]
    fn test_top_row_win_resolves_to_owner() {
        let mut session = new_session();
        // p1: 0,1,2   p2: 3,4
        let outcome = play(&mut session, &[0, 3, 1, 4, 2]);
        assert_eq!(outcome, Some(Outcome::Won { winner: p1() }));
        assert_eq!(session.board_owners()[..3], [Some(p1()); 3]);
        // Turn does not flip after the winning move.
        assert_eq!(session.current_turn(), p1());
    }

    #[test]
    fn test_full_board_ties() {
        let mut session = new_session();
        // X O X / X O O / O X X
        let outcome = play(&mut session, &[0, 1, 2, 4, 3, 5, 7, 6, 8]);
        assert_eq!(outcome, Some(Outcome::Tie));
        assert!(session.board().is_full());
    }

    #[test]
    fn test_illegal_moves_do_not_mutate() {
        let mut session = new_session();
        session.apply_move(p1(), 4).unwrap();
        let before = session.clone();

        assert_eq!(session.apply_move(p2(), -1), Err(MoveRejection::OutOfRange(-1)));
        assert_eq!(session.apply_move(p2(), 9), Err(MoveRejection::OutOfRange(9)));
        assert_eq!(session.apply_move(p1(), 0), Err(MoveRejection::NotYourTurn));
        assert_eq!(session.apply_move(p2(), 4), Err(MoveRejection::CellTaken(4)));
        assert_eq!(
            session.apply_move(UserId::new([3; 16]), 0),
            Err(MoveRejection::NotYourTurn)
        );

        assert_eq!(session.board(), before.board());
        assert_eq!(session.current_turn(), before.current_turn());
    }

    #[test]
    fn test_no_moves_after_outcome() {
        let mut session = new_session();
        play(&mut session, &[0, 3, 1, 4, 2]);
        let board = *session.board();

        // Winner still holds the turn; the cell is free; the match is over.
        assert_eq!(session.apply_move(p1(), 8), Err(MoveRejection::GameOver));
        assert_eq!(session.apply_move(p2(), 8), Err(MoveRejection::NotYourTurn));
        assert_eq!(*session.board(), board);
    }

    #[test]
    fn test_forfeit_awards_other_participant() {
        let mut session = new_session();
        session.apply_move(p1(), 0).unwrap();

        assert_eq!(session.forfeit(&p2()), Some(Outcome::Won { winner: p1() }));
        // Idempotent once decided.
        assert_eq!(session.forfeit(&p1()), None);
        assert_eq!(session.outcome(), Some(Outcome::Won { winner: p1() }));
    }

    #[test]
    fn test_forfeit_by_stranger_ignored() {
        let mut session = new_session();
        assert_eq!(session.forfeit(&UserId::new([3; 16])), None);
        assert_eq!(session.outcome(), None);
    }

    #[test]
    fn test_rematch_requires_settled_match() {
        let mut session = new_session();
        assert_eq!(session.vote_rematch(p1()), RematchVote::Ignored);

        play(&mut session, &[0, 3, 1, 4, 2]);
        assert_eq!(session.vote_rematch(p1()), RematchVote::Ignored);

        session.mark_settled();
        assert_eq!(
            session.vote_rematch(p1()),
            RematchVote::Pending { waiting_on: p2() }
        );
    }

    #[test]
    fn test_full_rematch_cycle_keeps_id_and_turn() {
        let mut session = new_session();
        let id = session.id;
        play(&mut session, &[0, 3, 1, 4, 2]);
        session.mark_settled();

        session.vote_rematch(p2());
        assert_eq!(session.vote_rematch(p1()), RematchVote::Ready);
        session.restart();

        assert_eq!(session.id, id);
        assert_eq!(session.outcome(), None);
        assert_eq!(session.board().filled(), 0);
        assert!(session.rematch_votes().is_empty());
        assert_eq!(session.current_turn(), p1());
        assert_eq!(session.matches_played(), 2);
        assert!(!session.is_settled());
    }

    #[test]
    fn test_single_vote_then_refusal_keeps_outcome() {
        let mut session = new_session();
        play(&mut session, &[0, 3, 1, 4, 2]);
        session.mark_settled();

        session.vote_rematch(p1());
        assert_eq!(session.decline_rematch(&p2()), Some(p1()));
        assert!(session.rematch_votes().is_empty());
        assert_eq!(session.outcome(), Some(Outcome::Won { winner: p1() }));
    }

    #[test]
    fn test_decline_during_match_ignored() {
        let mut session = new_session();
        assert_eq!(session.decline_rematch(&p1()), None);
    }

    #[test]
    fn test_outcome_json_shape() {
        let won = serde_json::to_value(Outcome::Won { winner: p1() }).unwrap();
        assert_eq!(won["result"], "won");
        assert_eq!(won["winner"], p1().to_string());

        let tie = serde_json::to_value(Outcome::Tie).unwrap();
        assert_eq!(tie, serde_json::json!({ "result": "tie" }));
    }

    proptest! {
        #[test]
        fn prop_alternating_play_terminates(order in Just((0..9i64).collect::<Vec<_>>()).prop_shuffle()) {
            let mut session = new_session();
            let mut moves = 0;
            let mut decided: Option<Outcome> = None;

            for cell in order {
                let mover = session.current_turn();
                match session.apply_move(mover, cell) {
                    Ok(result) => {
                        moves += 1;
                        if let Some(outcome) = result {
                            prop_assert!(decided.is_none());
                            decided = Some(outcome);
                        }
                    }
                    Err(rejection) => prop_assert_eq!(rejection, MoveRejection::GameOver),
                }
                if let Some(outcome) = decided {
                    prop_assert_eq!(session.outcome(), Some(outcome));
                }
            }

            prop_assert!(moves <= 9);
            let decided_ok = matches!(decided, Some(Outcome::Tie) | Some(Outcome::Won { .. }));
            prop_assert!(decided_ok);
            if let Some(Outcome::Won { winner }) = decided {
                prop_assert!(winner == p1() || winner == p2());
            }
        }
    }
}
