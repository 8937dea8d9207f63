//! Game message handlers and their routing table.
//!
//! Player actions are forwarded to the domain buses; chat and team
//! messages are acknowledged with the generic reply helper. Every
//! collaborator-backed action except login needs an authenticated session
//! whose player matches the header.

use super::dispatcher::{
    reply_error, reply_ok, reply_ok_with_data, Dispatcher, DispatcherBuilder, MessageHandler,
};
use crate::connection::{ConnectionRegistry, Session};
use crate::domain::{CommandBus, DomainAction, DomainError, DomainRequest, QueryBus};
use crate::error::{DispatchError, HandlerError};
use crate::protocol::{Message, MessageHeader, MessageType};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    /// Forward to a domain bus and reply with the given text
    Domain(DomainAction, &'static str),
    /// Acknowledge without touching the domain
    Ack(&'static str),
}

const ROUTES: [(MessageType, Route); 10] = [
    (MessageType::PLAYER_LOGIN, Route::Domain(DomainAction::Login, "login successful")),
    (MessageType::PLAYER_LOGOUT, Route::Domain(DomainAction::Logout, "logout successful")),
    (MessageType::PLAYER_MOVE, Route::Domain(DomainAction::Move, "move accepted")),
    (MessageType::PLAYER_STATUS, Route::Domain(DomainAction::Status, "player status")),
    (MessageType::PLAYER_STATS, Route::Domain(DomainAction::Stats, "player stats")),
    (MessageType::CHAT_MESSAGE, Route::Ack("chat received")),
    (MessageType::TEAM_CREATE, Route::Ack("team created")),
    (MessageType::TEAM_JOIN, Route::Ack("team joined")),
    (MessageType::TEAM_LEAVE, Route::Ack("team left")),
    (MessageType::TEAM_INFO, Route::Ack("team info")),
];

/// Game-facing handler set wired to the domain collaborators.
pub struct GameHandler {
    commands: Arc<dyn CommandBus>,
    queries: Arc<dyn QueryBus>,
    registry: Arc<ConnectionRegistry>,
}

impl GameHandler {
    pub fn new(
        commands: Arc<dyn CommandBus>,
        queries: Arc<dyn QueryBus>,
        registry: Arc<ConnectionRegistry>,
    ) -> Self {
        Self {
            commands,
            queries,
            registry,
        }
    }

    /// Registers one handler per entry of the routing table.
    pub fn register(
        self: Arc<Self>,
        mut builder: DispatcherBuilder,
    ) -> Result<DispatcherBuilder, DispatchError> {
        for (message_type, route) in ROUTES {
            builder = builder.register(
                message_type,
                Arc::new(GameRoute {
                    game: self.clone(),
                    route,
                }),
            )?;
        }
        Ok(builder)
    }

    /// Builds a dispatcher holding only the game routes.
    pub fn into_dispatcher(self: Arc<Self>) -> Result<Dispatcher, DispatchError> {
        Ok(self.register(Dispatcher::builder())?.build())
    }

    async fn handle_domain(
        &self,
        session: &Arc<Session>,
        message: Message,
        action: DomainAction,
        success_text: &str,
    ) -> Result<(), HandlerError> {
        let header = message.header;

        let player_id = if action == DomainAction::Login {
            0
        } else {
            match authorize(session, &header) {
                Ok(player_id) => player_id,
                Err(reason) => {
                    warn!(
                        connection_id = %session.id(),
                        message_type = %header.message_type,
                        "Rejected request: {}", reason
                    );
                    reply_error(session, &header, reason).await?;
                    return Ok(());
                }
            }
        };

        let request = DomainRequest {
            action,
            player_id,
            payload: message.payload,
        };
        let result = match action {
            DomainAction::Login | DomainAction::Logout | DomainAction::Move => {
                self.commands.execute(request).await
            }
            DomainAction::Status | DomainAction::Stats => self.queries.query(request).await,
        };

        let data = match result {
            Ok(data) => data,
            Err(e) => {
                reply_domain_error(session, &header, &e).await?;
                return Ok(());
            }
        };

        match action {
            DomainAction::Login => {
                let Some(player_id) = data.get("player_id").and_then(Value::as_u64).filter(|id| *id != 0)
                else {
                    error!(connection_id = %session.id(), "Login result carried no player id");
                    reply_error(session, &header, "internal error").await?;
                    return Ok(());
                };
                self.registry.bind_player(session, player_id);
                info!(connection_id = %session.id(), player_id, "🔐 Player logged in");
                reply_ok_with_data(session, &header, success_text, data).await?;
            }
            DomainAction::Logout => {
                self.registry.unbind_player(session);
                info!(connection_id = %session.id(), player_id, "👋 Player logged out");
                reply_ok(session, &header, success_text).await?;
            }
            _ => reply_ok_with_data(session, &header, success_text, data).await?,
        }
        Ok(())
    }
}

struct GameRoute {
    game: Arc<GameHandler>,
    route: Route,
}

#[async_trait]
impl MessageHandler for GameRoute {
    async fn handle(&self, session: &Arc<Session>, message: Message) -> Result<(), HandlerError> {
        match self.route {
            Route::Domain(action, text) => self.game.handle_domain(session, message, action, text).await,
            Route::Ack(text) => {
                reply_ok(session, &message.header, text).await?;
                Ok(())
            }
        }
    }
}

fn authorize(session: &Session, header: &MessageHeader) -> Result<u64, &'static str> {
    match session.player_id() {
        None => Err("not authenticated"),
        Some(player_id) if player_id != header.player_id => Err("player mismatch"),
        Some(player_id) => Ok(player_id),
    }
}

async fn reply_domain_error(
    session: &Session,
    header: &MessageHeader,
    error: &DomainError,
) -> Result<(), HandlerError> {
    match error {
        DomainError::Internal(detail) => error!(
            connection_id = %session.id(),
            message_type = %header.message_type,
            "Domain failure: {}", detail
        ),
        other => info!(
            connection_id = %session.id(),
            message_type = %header.message_type,
            "Domain rejected request: {}", other
        ),
    }
    reply_error(session, header, error.public_message()).await?;
    Ok(())
}
