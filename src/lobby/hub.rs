//! Lobby Coordinator
//!
//! Ties presence, challenges, sessions and stats together. Every operation
//! that reads shared state and notifies clients about it does both inside
//! one critical section, so broadcasts never describe a state that was
//! already stale when it was sent.
//!
//! Locks are always taken in this order, and none is held across a store
//! call:
//!
//! 1. a session's game mutex
//! 2. the presence registry
//! 3. the challenge book
//! 4. the session maps (inside [`SessionManager`])

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::core::id::{ConnectionId, SessionId, UserId};
use crate::game::session::{GameSession, Outcome, RematchVote};
use crate::lobby::challenge::{Challenge, ChallengeBook};
use crate::lobby::directory::IdentityDirectory;
use crate::lobby::error::LobbyError;
use crate::lobby::presence::{ConnectionHandle, PresenceRegistry};
use crate::lobby::sessions::{SessionHandle, SessionManager};
use crate::lobby::stats;
use crate::network::protocol::{ErrorCode, GameUpdate, OnlinePlayer, ServerMessage};
use crate::store::UserRecord;

/// What happens to a session once its outcome is reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Teardown {
    /// Natural end. Session stays around for a rematch.
    KeepDormant,
    /// Forfeit. Session is destroyed.
    Remove,
}

fn game_update(game: &GameSession) -> GameUpdate {
    GameUpdate {
        session_id: game.id,
        board: game.board_owners(),
        current_turn: game.current_turn(),
        outcome: game.outcome(),
    }
}

/// The lobby.
pub struct Lobby {
    directory: IdentityDirectory,
    registry: Mutex<PresenceRegistry>,
    challenges: Mutex<ChallengeBook>,
    sessions: SessionManager,
}

impl Lobby {
    /// Create a lobby over an identity directory.
    pub fn new(directory: IdentityDirectory) -> Self {
        Self {
            directory,
            registry: Mutex::new(PresenceRegistry::new()),
            challenges: Mutex::new(ChallengeBook::new()),
            sessions: SessionManager::new(),
        }
    }

    /// Identity directory.
    pub fn directory(&self) -> &IdentityDirectory {
        &self.directory
    }

    // =========================================================================
    // Presence
    // =========================================================================

    /// Put `user_id` in the lobby over `connection` and broadcast the new
    /// snapshot. A user already present is rebound to the new connection.
    pub async fn join(&self, user_id: UserId, connection: ConnectionHandle) -> Result<UserRecord, LobbyError> {
        let record = self.directory.resolve_id(user_id).await?;
        let conn_id = connection.id;

        let mut registry = self.registry.lock().await;
        if let Some(replaced) = registry.join(&record, connection) {
            info!(
                "{} rejoined on {}, replacing {}",
                record.id.short(),
                conn_id,
                replaced.id
            );
        } else {
            info!("{} ({}) joined on {}", record.id.short(), record.display_name, conn_id);
        }
        registry.broadcast_snapshot();
        Ok(record)
    }

    /// Does `connection` currently hold `user`'s lobby entry.
    pub async fn is_joined(&self, user: &UserId, connection: ConnectionId) -> bool {
        self.registry.lock().await.is_current(user, connection)
    }

    /// Handle a closed connection.
    ///
    /// Removes the user's entry, withdraws their challenges, then forfeits
    /// their live game or discards their finished one. Returns false (and
    /// does nothing) if the connection holds no entry, so repeated calls
    /// and calls from a replaced connection are harmless.
    pub async fn leave(&self, connection: ConnectionId) -> bool {
        let user = {
            let mut registry = self.registry.lock().await;
            let Some(entry) = registry.leave(connection) else {
                return false;
            };
            let user = entry.user_id;

            let withdrawn = { self.challenges.lock().await.remove_involving(&user) };
            for challenge in withdrawn {
                let other = if challenge.challenger == user {
                    challenge.challenged
                } else {
                    challenge.challenger
                };
                registry.send_to(&other, ServerMessage::ChallengeWithdrawn { user_id: user });
            }
            registry.broadcast_snapshot();
            user
        };

        // With the entry gone no new session can start for this user, so
        // the session looked up here is the last one they will ever have.
        if let Some(handle) = self.sessions.session_of(&user).await {
            let forfeited = {
                let mut game = handle.lock().await;
                let outcome = game.forfeit(&user);
                if outcome.is_some() {
                    info!("{} disconnected mid-game in {}", user.short(), handle.id.short());
                    let registry = self.registry.lock().await;
                    if let Some(opponent) = handle.opponent_of(&user) {
                        registry.send_to(&opponent, ServerMessage::UpdateGame(game_update(&game)));
                    }
                }
                outcome
            };

            match forfeited {
                Some(outcome) => self.settle(&handle, outcome, Teardown::Remove).await,
                None => self.discard_finished(&handle, user).await,
            }
        }
        info!("{} left the lobby", user.short());
        true
    }

    /// Current lobby snapshot.
    pub async fn snapshot(&self) -> Vec<OnlinePlayer> {
        self.registry.lock().await.snapshot()
    }

    /// Number of joined users.
    pub async fn online_count(&self) -> usize {
        self.registry.lock().await.len()
    }

    /// Number of live and dormant sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.session_count().await
    }

    // =========================================================================
    // Challenges
    // =========================================================================

    /// Record a challenge and notify the challenged user.
    pub async fn send_challenge(&self, challenger: UserId, challenged: UserId) -> Result<(), LobbyError> {
        if challenger == challenged {
            return Err(LobbyError::SelfChallenge);
        }

        let registry = self.registry.lock().await;
        let from = registry.get(&challenger).ok_or(LobbyError::ChallengerOffline)?;
        let target = registry.get(&challenged).ok_or(LobbyError::ChallengedOffline)?;
        if target.occupied {
            return Err(LobbyError::TargetBusy);
        }
        if from.occupied {
            return Err(LobbyError::AlreadyInGame);
        }
        let from_name = from.display_name.clone();

        let displaced = {
            let mut challenges = self.challenges.lock().await;
            challenges.insert(Challenge::new(challenger, challenged))
        };
        if let Some(old) = displaced.filter(|old| old.challenger != challenger) {
            registry.send_to(&old.challenger, ServerMessage::ChallengeWithdrawn { user_id: challenged });
        }

        debug!("{} challenged {}", challenger.short(), challenged.short());
        registry.send_to(
            &challenged,
            ServerMessage::ChallengeReceived {
                from_id: challenger,
                from_name,
            },
        );
        Ok(())
    }

    /// Accept the challenge pending for `challenged` and start a session.
    pub async fn accept_challenge(&self, challenged: UserId) -> Result<SessionId, LobbyError> {
        let mut registry = self.registry.lock().await;
        let challenge = {
            let mut challenges = self.challenges.lock().await;
            challenges.take(&challenged).ok_or(LobbyError::NoChallenge)?
        };
        let challenger = challenge.challenger;

        if !registry.is_present(&challenged) {
            return Err(LobbyError::NotJoined);
        }
        if !registry.is_present(&challenger) {
            return Err(LobbyError::ChallengerOffline);
        }
        let busy = if registry.is_occupied(&challenged) {
            Some(LobbyError::AlreadyInGame)
        } else if registry.is_occupied(&challenger) {
            Some(LobbyError::OpponentUnavailable)
        } else {
            None
        };
        if let Some(err) = busy {
            // The challenge is consumed; tell its sender.
            registry.send_to(&challenger, ServerMessage::ChallengeWithdrawn { user_id: challenged });
            return Err(err);
        }

        // Neither side is occupied, so any session still mapped to them is
        // a settled one kept for a rematch that is not going to happen now.
        for user in [challenger, challenged] {
            if let Some(old) = self.sessions.session_of(&user).await {
                self.sessions.remove_session(&old.id).await;
                if let Some(other) = old.opponent_of(&user) {
                    if other != challenger && other != challenged {
                        registry.send_to(&other, ServerMessage::RematchRefused { by_user: user });
                    }
                }
                debug!("Discarded finished session {}", old.id.short());
            }
        }

        // Other offers to or from either player are moot now.
        let stale: Vec<Challenge> = {
            let mut challenges = self.challenges.lock().await;
            let mut stale = challenges.remove_involving(&challenger);
            stale.extend(challenges.remove_involving(&challenged));
            stale
        };
        for old in stale {
            let (notify, about) = if old.challenger == challenger || old.challenger == challenged {
                (old.challenged, old.challenger)
            } else {
                (old.challenger, old.challenged)
            };
            registry.send_to(&notify, ServerMessage::ChallengeWithdrawn { user_id: about });
        }

        let handle = self.sessions.create_session(challenger, challenged).await;
        registry.mark_occupied(&challenger, true);
        registry.mark_occupied(&challenged, true);

        // The session is new; nobody else can be holding its game lock.
        let update = GameUpdate {
            session_id: handle.id,
            board: vec![None; crate::game::board::CELL_COUNT],
            current_turn: challenger,
            outcome: None,
        };
        for (user, opponent) in [(challenger, challenged), (challenged, challenger)] {
            registry.send_to(
                &user,
                ServerMessage::GameStarted {
                    session_id: handle.id,
                    opponent_id: opponent,
                },
            );
            registry.send_to(&user, ServerMessage::UpdateGame(update.clone()));
        }
        registry.broadcast_snapshot();

        info!(
            "Session {} started: {} vs {}",
            handle.id.short(),
            challenger.short(),
            challenged.short()
        );
        Ok(handle.id)
    }

    /// Refuse the challenge pending for `challenged`. No-op if none.
    pub async fn refuse_challenge(&self, challenged: UserId) {
        let registry = self.registry.lock().await;
        let taken = { self.challenges.lock().await.take(&challenged) };
        if let Some(challenge) = taken {
            debug!("{} refused {}", challenged.short(), challenge.challenger.short());
            registry.send_to(
                &challenge.challenger,
                ServerMessage::ChallengeRefused { refused_by: challenged },
            );
        }
    }

    /// Drop challenges older than `ttl` and tell both parties.
    pub async fn expire_challenges(&self, ttl: Duration) -> usize {
        let registry = self.registry.lock().await;
        let expired = { self.challenges.lock().await.expire(Instant::now(), ttl) };
        for challenge in &expired {
            registry.send_to(
                &challenge.challenger,
                ServerMessage::ChallengeWithdrawn {
                    user_id: challenge.challenged,
                },
            );
            registry.send_to(
                &challenge.challenged,
                ServerMessage::ChallengeWithdrawn {
                    user_id: challenge.challenger,
                },
            );
        }
        if !expired.is_empty() {
            debug!("Expired {} challenges", expired.len());
        }
        expired.len()
    }

    // =========================================================================
    // Game Sessions
    // =========================================================================

    /// Apply a move. Unknown sessions and rejected moves are dropped
    /// silently; they are stale or racing messages.
    pub async fn make_move(&self, session_id: SessionId, user: UserId, cell_index: i64) {
        let Some(handle) = self.sessions.get_session(&session_id).await else {
            debug!("Move for unknown session {}", session_id.short());
            return;
        };

        let finished = {
            let mut game = handle.lock().await;
            let result = match game.apply_move(user, cell_index) {
                Ok(result) => result,
                Err(rejection) => {
                    debug!("Rejected move by {}: {}", user.short(), rejection);
                    return;
                }
            };

            let update = game_update(&game);
            let registry = self.registry.lock().await;
            for participant in handle.participants {
                registry.send_to(&participant, ServerMessage::UpdateGame(update.clone()));
            }
            result
        };

        if let Some(outcome) = finished {
            self.settle(&handle, outcome, Teardown::KeepDormant).await;
        }
    }

    /// Forfeit (live match) or discard (finished match) a session.
    pub async fn quit_game(&self, session_id: SessionId, user: UserId) {
        let Some(handle) = self.sessions.get_session(&session_id).await else {
            debug!("Quit for unknown session {}", session_id.short());
            return;
        };
        if handle.opponent_of(&user).is_none() {
            return;
        }

        let forfeited = {
            let mut game = handle.lock().await;
            let outcome = game.forfeit(&user);
            if outcome.is_some() {
                let update = game_update(&game);
                let registry = self.registry.lock().await;
                for participant in handle.participants {
                    registry.send_to(&participant, ServerMessage::UpdateGame(update.clone()));
                }
            }
            outcome
        };

        match forfeited {
            Some(outcome) => {
                info!("{} quit session {}", user.short(), session_id.short());
                self.settle(&handle, outcome, Teardown::Remove).await;
            }
            None => self.discard_finished(&handle, user).await,
        }
    }

    /// Request or accept a rematch. When both participants have voted the
    /// board is reset under the same session id.
    pub async fn vote_rematch(&self, session_id: SessionId, user: UserId) -> Result<(), LobbyError> {
        let handle = self
            .sessions
            .get_session(&session_id)
            .await
            .ok_or(LobbyError::GameNotFound)?;

        let mut game = handle.lock().await;
        match game.vote_rematch(user) {
            RematchVote::Ignored => {
                debug!("Ignored rematch vote by {} in {}", user.short(), session_id.short());
                Ok(())
            }
            RematchVote::Pending { waiting_on } => {
                let registry = self.registry.lock().await;
                if registry.is_occupied(&waiting_on)
                    || !registry.send_to(&waiting_on, ServerMessage::RematchRequested { from_user: user })
                {
                    game.decline_rematch(&user);
                    return Err(LobbyError::OpponentUnavailable);
                }
                Ok(())
            }
            RematchVote::Ready => {
                let mut registry = self.registry.lock().await;
                let mut available = true;
                for participant in &handle.participants {
                    available &= registry.is_present(participant)
                        && !registry.is_occupied(participant)
                        && self.sessions.is_mapped_to(participant, &session_id).await;
                }
                if !available {
                    game.decline_rematch(&user);
                    return Err(LobbyError::OpponentUnavailable);
                }

                game.restart();
                let update = game_update(&game);
                for participant in handle.participants {
                    registry.mark_occupied(&participant, true);
                    registry.send_to(&participant, ServerMessage::UpdateGame(update.clone()));
                }
                registry.broadcast_snapshot();
                info!(
                    "Match {} started in session {}",
                    game.matches_played(),
                    session_id.short()
                );
                Ok(())
            }
        }
    }

    /// Refuse a rematch. Clears all votes and tells the other participant.
    pub async fn refuse_rematch(&self, session_id: SessionId, user: UserId) {
        let Some(handle) = self.sessions.get_session(&session_id).await else {
            return;
        };
        let mut game = handle.lock().await;
        if let Some(other) = game.decline_rematch(&user) {
            let registry = self.registry.lock().await;
            registry.send_to(&other, ServerMessage::RematchRefused { by_user: user });
        }
    }

    // =========================================================================
    // Settlement
    // =========================================================================

    /// Commit stats for a decided match, then release both participants.
    async fn settle(&self, handle: &Arc<SessionHandle>, outcome: Outcome, teardown: Teardown) {
        let commits = stats::commit_outcome(self.directory.store(), handle.participants, outcome).await;

        let mut game = handle.lock().await;
        game.mark_settled();

        let mut registry = self.registry.lock().await;
        if teardown == Teardown::Remove {
            self.sessions.remove_session(&handle.id).await;
            debug!("Removed session {}", handle.id.short());
        }
        for commit in &commits {
            match &commit.result {
                Ok(stats) => registry.update_stats(&commit.user_id, *stats),
                Err(e) => {
                    registry.send_to(
                        &commit.user_id,
                        ServerMessage::error(
                            ErrorCode::StatsNotSaved,
                            format!("Your result could not be saved: {}", e),
                        ),
                    );
                }
            }
            registry.mark_occupied(&commit.user_id, false);
            registry.send_to(
                &commit.user_id,
                ServerMessage::GameEnded {
                    session_id: handle.id,
                    outcome,
                },
            );
        }

        registry.broadcast_snapshot();
    }

    /// Remove a finished session because `leaver` is done with it.
    async fn discard_finished(&self, handle: &Arc<SessionHandle>, leaver: UserId) {
        let game = handle.lock().await;
        if !game.is_finished() {
            warn!("Refusing to discard running session {}", handle.id.short());
            return;
        }
        let registry = self.registry.lock().await;
        if self.sessions.remove_session(&handle.id).await.is_some() {
            if let Some(other) = handle.opponent_of(&leaver) {
                registry.send_to(&other, ServerMessage::RematchRefused { by_user: leaver });
            }
            debug!("Discarded finished session {}", handle.id.short());
        }
    }
}
