//! Session Management
//!
//! Owns every game session and the user → session mapping. Each session
//! sits behind its own mutex so independent games never contend and moves
//! within one game are applied one at a time, in arrival order.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard, RwLock};

use crate::core::id::{SessionId, UserId};
use crate::game::session::GameSession;

/// A session plus the data that never changes after creation.
#[derive(Debug)]
pub struct SessionHandle {
    /// Session id.
    pub id: SessionId,
    /// Participants, challenger first. Readable without the game lock.
    pub participants: [UserId; 2],
    game: Mutex<GameSession>,
}

impl SessionHandle {
    /// Lock the game state.
    pub async fn lock(&self) -> MutexGuard<'_, GameSession> {
        self.game.lock().await
    }

    /// The other participant.
    pub fn opponent_of(&self, user: &UserId) -> Option<UserId> {
        match self.participants {
            [a, b] if a == *user => Some(b),
            [a, b] if b == *user => Some(a),
            _ => None,
        }
    }
}

/// Manages all sessions.
pub struct SessionManager {
    /// Live and dormant sessions.
    sessions: RwLock<BTreeMap<SessionId, Arc<SessionHandle>>>,
    /// User to session mapping.
    player_sessions: RwLock<BTreeMap<UserId, SessionId>>,
}

impl SessionManager {
    /// Create new session manager.
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(BTreeMap::new()),
            player_sessions: RwLock::new(BTreeMap::new()),
        }
    }

    /// Create a session and map both participants to it.
    pub async fn create_session(&self, challenger: UserId, challenged: UserId) -> Arc<SessionHandle> {
        let id = SessionId::random();
        let handle = Arc::new(SessionHandle {
            id,
            participants: [challenger, challenged],
            game: Mutex::new(GameSession::new(id, challenger, challenged)),
        });

        let mut sessions = self.sessions.write().await;
        sessions.insert(id, handle.clone());
        let mut player_sessions = self.player_sessions.write().await;
        player_sessions.insert(challenger, id);
        player_sessions.insert(challenged, id);

        handle
    }

    /// Get a session by ID.
    pub async fn get_session(&self, id: &SessionId) -> Option<Arc<SessionHandle>> {
        let sessions = self.sessions.read().await;
        sessions.get(id).cloned()
    }

    /// Session the user is mapped to.
    pub async fn session_of(&self, user: &UserId) -> Option<Arc<SessionHandle>> {
        let id = {
            let player_sessions = self.player_sessions.read().await;
            player_sessions.get(user).copied()
        };
        match id {
            Some(id) => self.get_session(&id).await,
            None => None,
        }
    }

    /// Is the user mapped to this session.
    pub async fn is_mapped_to(&self, user: &UserId, id: &SessionId) -> bool {
        let player_sessions = self.player_sessions.read().await;
        player_sessions.get(user) == Some(id)
    }

    /// Remove a session. Participants still mapped to it are unmapped.
    pub async fn remove_session(&self, id: &SessionId) -> Option<Arc<SessionHandle>> {
        let mut sessions = self.sessions.write().await;
        let handle = sessions.remove(id)?;

        let mut player_sessions = self.player_sessions.write().await;
        for user in &handle.participants {
            if player_sessions.get(user) == Some(id) {
                player_sessions.remove(user);
            }
        }
        Some(handle)
    }

    /// Get active session count.
    pub async fn session_count(&self) -> usize {
        let sessions = self.sessions.read().await;
        sessions.len()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}
