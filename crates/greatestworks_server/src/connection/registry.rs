//! Live-session registry.
//!
//! Tracks every open session by connection id and, once login completes,
//! by player id. Used for server-initiated pushes and for releasing all
//! sessions at shutdown.

use super::session::{ConnectionId, Session};
use crate::error::TransportError;
use crate::protocol::{Message, MessageType};
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    sessions: DashMap<ConnectionId, Arc<Session>>,
    players: DashMap<u64, ConnectionId>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, session: Arc<Session>) {
        self.sessions.insert(session.id(), session);
    }

    /// Removes a session and its player mapping.
    pub fn unregister(&self, id: ConnectionId) -> Option<Arc<Session>> {
        let (_, session) = self.sessions.remove(&id)?;
        if let Some(player_id) = session.player_id() {
            self.players.remove_if(&player_id, |_, owner| *owner == id);
        }
        Some(session)
    }

    /// Binds a player to a session.
    ///
    /// A player logging in again from a new connection takes over the
    /// mapping; the older session stays open but no longer receives pushes.
    pub fn bind_player(&self, session: &Session, player_id: u64) {
        if let Some(previous) = session.player_id() {
            if previous != player_id {
                self.players.remove_if(&previous, |_, owner| *owner == session.id());
            }
        }

        session.bind_player(player_id);
        if let Some(old) = self.players.insert(player_id, session.id()) {
            if old != session.id() {
                warn!(
                    player_id,
                    previous_connection = %old,
                    connection_id = %session.id(),
                    "Player logged in from a new connection"
                );
            }
        }
    }

    pub fn unbind_player(&self, session: &Session) -> Option<u64> {
        let player_id = session.unbind_player()?;
        self.players.remove_if(&player_id, |_, owner| *owner == session.id());
        Some(player_id)
    }

    pub fn session(&self, id: ConnectionId) -> Option<Arc<Session>> {
        self.sessions.get(&id).map(|entry| entry.value().clone())
    }

    pub fn session_for_player(&self, player_id: u64) -> Option<Arc<Session>> {
        let id = *self.players.get(&player_id)?.value();
        self.session(id)
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// Pushes a server-initiated message to one player.
    pub async fn send_to_player(
        &self,
        player_id: u64,
        message_type: MessageType,
        payload: Value,
    ) -> Result<(), TransportError> {
        let session = self
            .session_for_player(player_id)
            .ok_or(TransportError::PlayerNotConnected(player_id))?;

        let message = push_message(&session, message_type, player_id, payload);
        session.send_message(&message).await
    }

    /// Pushes a message to every authenticated session.
    ///
    /// A session that cannot take the message right away is closed as a
    /// slow consumer and skipped, so one stalled peer never delays the rest.
    ///
    /// # Returns
    ///
    /// How many sessions accepted the message.
    pub async fn broadcast(&self, message_type: MessageType, payload: Value) -> usize {
        let targets = self
            .sessions
            .iter()
            .filter_map(|entry| {
                let session = entry.value();
                session.player_id().map(|player_id| (session.clone(), player_id))
            })
            .collect::<Vec<_>>();

        let mut delivered = 0;
        for (session, player_id) in targets {
            let message = push_message(&session, message_type, player_id, payload.clone());
            match session.send_message(&message).await {
                Ok(()) => delivered += 1,
                Err(e) => debug!(connection_id = %session.id(), "Broadcast skipped session: {}", e),
            }
        }
        delivered
    }

    /// Removes and closes every registered session.
    ///
    /// # Returns
    ///
    /// The number of sessions released.
    pub fn close_all(&self) -> usize {
        let ids = self
            .sessions
            .iter()
            .map(|entry| *entry.key())
            .collect::<Vec<_>>();

        let mut released = 0;
        for id in ids {
            if let Some((_, session)) = self.sessions.remove(&id) {
                session.close();
                released += 1;
            }
        }
        self.players.clear();

        if released > 0 {
            info!("🔌 Released {} open session(s)", released);
        }
        released
    }
}

fn push_message(
    session: &Session,
    message_type: MessageType,
    player_id: u64,
    payload: Value,
) -> Message {
    let mut message = Message::new(message_type, 0, player_id, payload);
    message.header.sequence = session.next_sequence();
    message
}
