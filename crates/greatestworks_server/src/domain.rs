//! Boundary to the domain services.
//!
//! Handlers never reach into game logic directly. They build a
//! [`DomainRequest`] from the decoded, authenticated message and hand it to
//! a [`CommandBus`] (state changes) or a [`QueryBus`] (reads). The
//! [`PlayerDirectory`] is a small in-memory implementation of both so a
//! service runs without external storage.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};

/// The domain operation a request asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DomainAction {
    Login,
    Logout,
    Move,
    Status,
    Stats,
}

/// A decoded request handed to a collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainRequest {
    pub action: DomainAction,
    /// Authenticated player, 0 for login
    pub player_id: u64,
    pub payload: Value,
}

/// Errors returned by domain collaborators.
///
/// Only [`DomainError::public_message`] ever reaches a client.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DomainError {
    /// The request was understood and refused
    #[error("{0}")]
    Rejected(String),
    #[error("{0}")]
    NotFound(String),
    /// The collaborator failed; details stay in the logs
    #[error("Domain failure: {0}")]
    Internal(String),
}

impl DomainError {
    /// Text safe to send back to the client.
    pub fn public_message(&self) -> &str {
        match self {
            DomainError::Rejected(message) | DomainError::NotFound(message) => message,
            DomainError::Internal(_) => "internal error",
        }
    }
}

/// Executes state-changing domain actions.
#[async_trait]
pub trait CommandBus: Send + Sync {
    async fn execute(&self, request: DomainRequest) -> Result<Value, DomainError>;
}

/// Answers read-only domain queries.
#[async_trait]
pub trait QueryBus: Send + Sync {
    async fn query(&self, request: DomainRequest) -> Result<Value, DomainError>;
}

#[derive(Debug, Clone, Default)]
struct PlayerRecord {
    username: String,
    online: bool,
    position: [f64; 3],
    logins: u64,
    moves: u64,
}

#[derive(Deserialize)]
struct LoginRequest {
    username: String,
}

#[derive(Deserialize)]
struct MoveRequest {
    x: f64,
    y: f64,
    z: f64,
}

/// In-memory player store implementing both buses.
///
/// Player ids are assigned on first login and reused for the same
/// username afterwards.
#[derive(Debug)]
pub struct PlayerDirectory {
    next_id: AtomicU64,
    by_name: DashMap<String, u64>,
    players: DashMap<u64, PlayerRecord>,
}

impl Default for PlayerDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl PlayerDirectory {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            by_name: DashMap::new(),
            players: DashMap::new(),
        }
    }

    fn login(&self, payload: &Value) -> Result<Value, DomainError> {
        let request = LoginRequest::deserialize(payload)
            .map_err(|_| DomainError::Rejected("username is required".to_string()))?;
        let username = request.username.trim();
        if username.is_empty() {
            return Err(DomainError::Rejected("username is required".to_string()));
        }

        let player_id = *self
            .by_name
            .entry(username.to_string())
            .or_insert_with(|| self.next_id.fetch_add(1, Ordering::Relaxed));

        let mut record = self.players.entry(player_id).or_insert_with(|| PlayerRecord {
            username: username.to_string(),
            ..PlayerRecord::default()
        });
        record.online = true;
        record.logins += 1;

        Ok(json!({ "player_id": player_id, "username": record.username }))
    }

    fn logout(&self, player_id: u64) -> Result<Value, DomainError> {
        let mut record = self.record_mut(player_id)?;
        record.online = false;
        Ok(json!({ "player_id": player_id }))
    }

    fn move_player(&self, player_id: u64, payload: &Value) -> Result<Value, DomainError> {
        let target = MoveRequest::deserialize(payload)
            .map_err(|_| DomainError::Rejected("invalid position".to_string()))?;
        if ![target.x, target.y, target.z].iter().all(|c| c.is_finite()) {
            return Err(DomainError::Rejected("invalid position".to_string()));
        }

        let mut record = self.record_mut(player_id)?;
        record.position = [target.x, target.y, target.z];
        record.moves += 1;
        Ok(json!({ "x": target.x, "y": target.y, "z": target.z }))
    }

    fn status(&self, player_id: u64) -> Result<Value, DomainError> {
        let record = self
            .players
            .get(&player_id)
            .ok_or_else(|| DomainError::NotFound("player not found".to_string()))?;
        let [x, y, z] = record.position;
        Ok(json!({
            "player_id": player_id,
            "username": record.username,
            "online": record.online,
            "position": { "x": x, "y": y, "z": z },
        }))
    }

    fn stats(&self, player_id: u64) -> Result<Value, DomainError> {
        let record = self
            .players
            .get(&player_id)
            .ok_or_else(|| DomainError::NotFound("player not found".to_string()))?;
        Ok(json!({
            "player_id": player_id,
            "logins": record.logins,
            "moves": record.moves,
        }))
    }

    fn record_mut(
        &self,
        player_id: u64,
    ) -> Result<dashmap::mapref::one::RefMut<'_, u64, PlayerRecord>, DomainError> {
        self.players
            .get_mut(&player_id)
            .ok_or_else(|| DomainError::NotFound("player not found".to_string()))
    }
}

#[async_trait]
impl CommandBus for PlayerDirectory {
    async fn execute(&self, request: DomainRequest) -> Result<Value, DomainError> {
        match request.action {
            DomainAction::Login => self.login(&request.payload),
            DomainAction::Logout => self.logout(request.player_id),
            DomainAction::Move => self.move_player(request.player_id, &request.payload),
            other => Err(DomainError::Internal(format!("{other:?} is not a command"))),
        }
    }
}

#[async_trait]
impl QueryBus for PlayerDirectory {
    async fn query(&self, request: DomainRequest) -> Result<Value, DomainError> {
        match request.action {
            DomainAction::Status => self.status(request.player_id),
            DomainAction::Stats => self.stats(request.player_id),
            other => Err(DomainError::Internal(format!("{other:?} is not a query"))),
        }
    }
}
