//! Type-routed message dispatch.
//!
//! Handlers are registered once per [`MessageType`] while the service is
//! being wired, then the table is frozen into a [`Dispatcher`] that is
//! shared by every connection and read without locks.

use crate::connection::Session;
use crate::error::{DispatchError, HandlerError, TransportError};
use crate::protocol::{BaseResponse, Message, MessageHeader, MessageType};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// Handles every message of one type.
///
/// Runs inline on the connection's read path: a handler that stalls delays
/// further reads on its own connection only.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, session: &Arc<Session>, message: Message) -> Result<(), HandlerError>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(Arc<Session>, Message) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, session: &Arc<Session>, message: Message) -> Result<(), HandlerError> {
        (self.0)(session.clone(), message).await
    }
}

/// Adapts an async closure into a [`MessageHandler`].
///
/// ```rust,ignore
/// let echo = handler_fn(|session, message| async move {
///     reply_ok(&session, &message.header, "echo").await?;
///     Ok(())
/// });
/// ```
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn MessageHandler>
where
    F: Fn(Arc<Session>, Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// Collects handlers before traffic starts.
#[derive(Default)]
pub struct DispatcherBuilder {
    handlers: HashMap<MessageType, Arc<dyn MessageHandler>>,
}

impl DispatcherBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the handler for a message type.
    ///
    /// # Errors
    ///
    /// [`DispatchError::DuplicateHandler`] if the type already has one.
    pub fn register(
        mut self,
        message_type: MessageType,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Self, DispatchError> {
        if self.handlers.contains_key(&message_type) {
            return Err(DispatchError::DuplicateHandler(message_type));
        }
        self.handlers.insert(message_type, handler);
        Ok(self)
    }

    pub fn build(self) -> Dispatcher {
        Dispatcher {
            handlers: self.handlers,
        }
    }
}

/// Immutable routing table from message type to handler.
pub struct Dispatcher {
    handlers: HashMap<MessageType, Arc<dyn MessageHandler>>,
}

impl Dispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::new()
    }

    pub fn handles(&self, message_type: MessageType) -> bool {
        self.handlers.contains_key(&message_type)
    }

    /// Registered types in ascending code order.
    pub fn registered_types(&self) -> Vec<MessageType> {
        let mut types = self.handlers.keys().copied().collect::<Vec<_>>();
        types.sort();
        types
    }

    /// Invokes the handler registered for the message's type, exactly once.
    ///
    /// # Errors
    ///
    /// * [`DispatchError::UnknownMessageType`] when no handler is registered;
    ///   no handler runs in that case.
    /// * [`DispatchError::Handler`] wrapping whatever the handler returned.
    pub async fn dispatch(
        &self,
        session: &Arc<Session>,
        message: Message,
    ) -> Result<(), DispatchError> {
        let message_type = message.message_type();
        let handler = self
            .handlers
            .get(&message_type)
            .ok_or(DispatchError::UnknownMessageType(message_type))?;

        debug!(
            connection_id = %session.id(),
            message_id = message.header.message_id,
            %message_type,
            "Dispatching message"
        );

        handler
            .handle(session, message)
            .await
            .map_err(|source| DispatchError::Handler {
                message_type,
                source,
            })
    }
}

/// Sends a successful acknowledgment echoing the request's correlation
/// fields.
pub async fn reply_ok(
    session: &Session,
    request: &MessageHeader,
    text: &str,
) -> Result<(), TransportError> {
    session
        .send_message(&Message::ack(request, BaseResponse::ok(text)))
        .await
}

/// Like [`reply_ok`] with a `data` object attached.
pub async fn reply_ok_with_data(
    session: &Session,
    request: &MessageHeader,
    text: &str,
    data: Value,
) -> Result<(), TransportError> {
    session
        .send_message(&Message::ack(request, BaseResponse::ok(text).with_data(data)))
        .await
}

/// Sends a failure acknowledgment. `text` must never contain client input.
pub async fn reply_error(
    session: &Session,
    request: &MessageHeader,
    text: &str,
) -> Result<(), TransportError> {
    session
        .send_message(&Message::ack(request, BaseResponse::error(text)))
        .await
}
