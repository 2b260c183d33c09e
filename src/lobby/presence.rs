//! Presence Registry
//!
//! Who is connected, over which connection, and whether they are bound
//! to a live game. Not synchronized itself; the lobby owns it behind a
//! mutex so that "read state, then send it" is a single critical section.

use std::collections::BTreeMap;

use tokio::sync::mpsc;
use tracing::debug;

use crate::core::id::{ConnectionId, UserId};
use crate::network::protocol::{OnlinePlayer, ServerMessage};
use crate::store::{Stats, UserRecord};

/// Outbound message queue of one connection.
pub type ClientSender = mpsc::UnboundedSender<ServerMessage>;

/// Handle to one live transport connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    /// Connection id.
    pub id: ConnectionId,
    /// Outbound queue, drained by the connection's writer task.
    pub sender: ClientSender,
}

impl ConnectionHandle {
    /// Create a handle.
    pub fn new(id: ConnectionId, sender: ClientSender) -> Self {
        Self { id, sender }
    }

    /// Queue a message. Returns false if the connection is gone.
    pub fn send(&self, message: ServerMessage) -> bool {
        self.sender.send(message).is_ok()
    }
}

/// One connected, joined user.
#[derive(Debug, Clone)]
pub struct PresenceEntry {
    /// User id.
    pub user_id: UserId,
    /// Current connection.
    pub connection: ConnectionHandle,
    /// Display name at join time.
    pub display_name: String,
    /// Bound to a live game.
    pub occupied: bool,
    /// Cached stats.
    pub stats: Stats,
}

impl PresenceEntry {
    fn summary(&self) -> OnlinePlayer {
        OnlinePlayer {
            user_id: self.user_id,
            display_name: self.display_name.clone(),
            in_game: self.occupied,
            games_played: self.stats.games_played,
            games_won: self.stats.games_won,
            games_lost: self.stats.games_lost,
        }
    }
}

/// Connected users keyed by id.
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    entries: BTreeMap<UserId, PresenceEntry>,
}

impl PresenceRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for `record.id`. Last connection wins;
    /// a replaced entry's `occupied` flag carries over.
    ///
    /// Returns the replaced connection, if it was a different one.
    pub fn join(&mut self, record: &UserRecord, connection: ConnectionHandle) -> Option<ConnectionHandle> {
        let previous = self.entries.remove(&record.id);
        let occupied = previous.as_ref().map(|p| p.occupied).unwrap_or(false);

        self.entries.insert(
            record.id,
            PresenceEntry {
                user_id: record.id,
                connection: connection.clone(),
                display_name: record.display_name.clone(),
                occupied,
                stats: record.stats,
            },
        );

        previous
            .map(|p| p.connection)
            .filter(|old| old.id != connection.id)
    }

    /// Remove the entry held by this connection. `None` if no entry
    /// matches, which makes repeated calls harmless.
    pub fn leave(&mut self, connection: ConnectionId) -> Option<PresenceEntry> {
        let user_id = self.user_for_connection(connection)?;
        self.entries.remove(&user_id)
    }

    /// User currently joined over this connection.
    pub fn user_for_connection(&self, connection: ConnectionId) -> Option<UserId> {
        self.entries
            .values()
            .find(|e| e.connection.id == connection)
            .map(|e| e.user_id)
    }

    /// Does `connection` currently hold `user`'s entry.
    pub fn is_current(&self, user: &UserId, connection: ConnectionId) -> bool {
        self.entries
            .get(user)
            .map(|e| e.connection.id == connection)
            .unwrap_or(false)
    }

    /// Look up an entry.
    pub fn get(&self, user: &UserId) -> Option<&PresenceEntry> {
        self.entries.get(user)
    }

    /// Is `user` connected.
    pub fn is_present(&self, user: &UserId) -> bool {
        self.entries.contains_key(user)
    }

    /// Is `user` connected and bound to a game.
    pub fn is_occupied(&self, user: &UserId) -> bool {
        self.entries.get(user).map(|e| e.occupied).unwrap_or(false)
    }

    /// Set the occupied flag. Returns true if it changed.
    pub fn mark_occupied(&mut self, user: &UserId, occupied: bool) -> bool {
        match self.entries.get_mut(user) {
            Some(entry) if entry.occupied != occupied => {
                entry.occupied = occupied;
                true
            }
            _ => false,
        }
    }

    /// Refresh cached stats.
    pub fn update_stats(&mut self, user: &UserId, stats: Stats) {
        if let Some(entry) = self.entries.get_mut(user) {
            entry.stats = stats;
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nobody is joined.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Lobby summary, ordered by user id. Clients choose their own order.
    pub fn snapshot(&self) -> Vec<OnlinePlayer> {
        self.entries.values().map(PresenceEntry::summary).collect()
    }

    /// Send to one user's current connection. Returns false if the user is
    /// absent or the connection is gone.
    pub fn send_to(&self, user: &UserId, message: ServerMessage) -> bool {
        match self.entries.get(user) {
            Some(entry) => {
                let sent = entry.connection.send(message);
                if !sent {
                    debug!("Dropped message to closed connection of {}", user.short());
                }
                sent
            }
            None => false,
        }
    }

    /// Send the current snapshot to every joined connection.
    pub fn broadcast_snapshot(&self) {
        let message = ServerMessage::OnlinePlayers {
            players: self.snapshot(),
        };
        for entry in self.entries.values() {
            entry.connection.send(message.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn record(byte: u8, name: &str) -> UserRecord {
        UserRecord::new(UserId::new([byte; 16]), None, name)
    }

    fn handle() -> (ConnectionHandle, UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ConnectionHandle::new(ConnectionId::next(), tx), rx)
    }

    #[test]
    fn test_join_and_leave() {
        let mut registry = PresenceRegistry::new();
        let (conn, _rx) = handle();
        let ada = record(1, "Ada");

        assert!(registry.join(&ada, conn.clone()).is_none());
        assert!(registry.is_present(&ada.id));
        assert_eq!(registry.user_for_connection(conn.id), Some(ada.id));

        let removed = registry.leave(conn.id).unwrap();
        assert_eq!(removed.user_id, ada.id);
        assert!(registry.is_empty());

        // Second leave for the same handle is a no-op.
        assert!(registry.leave(conn.id).is_none());
    }

    #[test]
    fn test_last_connection_wins_and_keeps_occupied() {
        let mut registry = PresenceRegistry::new();
        let (old, _rx1) = handle();
        let (new, _rx2) = handle();
        let ada = record(1, "Ada");

        registry.join(&ada, old.clone());
        registry.mark_occupied(&ada.id, true);

        let replaced = registry.join(&ada, new.clone()).unwrap();
        assert_eq!(replaced.id, old.id);
        assert_eq!(registry.len(), 1);
        assert!(registry.is_occupied(&ada.id));
        assert!(registry.is_current(&ada.id, new.id));
        assert!(!registry.is_current(&ada.id, old.id));

        // The stale connection closing does not remove the live entry.
        assert!(registry.leave(old.id).is_none());
        assert!(registry.is_present(&ada.id));
    }

    #[test]
    fn test_mark_occupied_reports_change() {
        let mut registry = PresenceRegistry::new();
        let (conn, _rx) = handle();
        let ada = record(1, "Ada");
        registry.join(&ada, conn);

        assert!(registry.mark_occupied(&ada.id, true));
        assert!(!registry.mark_occupied(&ada.id, true));
        assert!(registry.mark_occupied(&ada.id, false));
        assert!(!registry.mark_occupied(&UserId::new([9; 16]), true));
    }

    #[test]
    fn test_broadcast_reaches_everyone() {
        let mut registry = PresenceRegistry::new();
        let (c1, mut rx1) = handle();
        let (c2, mut rx2) = handle();
        registry.join(&record(1, "Ada"), c1);
        registry.join(&record(2, "Bob"), c2);

        registry.broadcast_snapshot();

        for rx in [&mut rx1, &mut rx2] {
            match rx.try_recv().unwrap() {
                ServerMessage::OnlinePlayers { players } => {
                    assert_eq!(players.len(), 2);
                    assert!(players.iter().all(|p| !p.in_game));
                }
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[test]
    fn test_send_to_closed_connection() {
        let mut registry = PresenceRegistry::new();
        let (conn, rx) = handle();
        let ada = record(1, "Ada");
        registry.join(&ada, conn);
        drop(rx);

        assert!(!registry.send_to(&ada.id, ServerMessage::Shutdown { reason: "x".into() }));
    }
}
