//! Error taxonomy for the server core.
//!
//! Errors are grouped by where they are handled:
//!
//! * [`ProtocolError`] and [`TransportError`] stop at the session boundary.
//!   They close the offending connection and never reach domain code.
//! * [`DispatchError`] and [`HandlerError`] are per-message. The connection
//!   stays open and the client receives a generic failure acknowledgment.
//! * [`StartupError`] and [`ShutdownError`] belong to the service lifecycle
//!   and end up as the process exit code.

use crate::domain::DomainError;
use crate::protocol::MessageType;
use crate::server::ServiceState;
use greatestworks_config::ConfigError;
use std::net::SocketAddr;

/// Malformed bytes on the wire.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Fewer bytes than a full header
    #[error("Message too short: {len} bytes, a header needs 44")]
    Truncated { len: usize },
    /// The header does not start with the protocol magic
    #[error("Invalid magic number: {0:#010x}")]
    BadMagic(u32),
    /// A frame length prefix above the configured limit
    #[error("Frame of {size} bytes exceeds the limit of {max} bytes")]
    FrameTooLarge { size: usize, max: usize },
    /// A frame length prefix too small to hold a header
    #[error("Frame of {size} bytes cannot hold a message header")]
    FrameTooSmall { size: usize },
    /// The payload is not valid JSON
    #[error("Invalid payload: {0}")]
    Payload(#[source] serde_json::Error),
}

/// Failures reading from or writing to a connection.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The session was closed before or during the operation
    #[error("Connection closed")]
    Closed,
    /// The peer stopped reading and the outbound queue filled up; the
    /// session has been closed
    #[error("Peer is not reading; outbound queue is full")]
    SlowConsumer,
    /// No live session is bound to the player
    #[error("Player {0} is not connected")]
    PlayerNotConnected(u64),
    /// The peer sent bytes that violate the framing or header rules
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// Underlying socket error
    #[error("Transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors returned by a single message handler.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// Writing the reply failed; the session is unusable
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// A domain collaborator failed
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("Handler failed: {0}")]
    Internal(String),
}

/// Routing failures.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// No handler is registered for the message type
    #[error("Unhandled message type {0}")]
    UnknownMessageType(MessageType),
    /// A second handler was registered for the same type during wiring
    #[error("A handler is already registered for message type {0}")]
    DuplicateHandler(MessageType),
    /// The handler ran and failed
    #[error("Handler for {message_type} failed: {source}")]
    Handler {
        message_type: MessageType,
        #[source]
        source: HandlerError,
    },
}

/// Failures bringing the service up. Always fatal for the process.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("Service already started")]
    AlreadyStarted,
    #[error("Service cannot start from state {0:?}")]
    InvalidState(ServiceState),
    /// The listener could not be created or bound
    #[error("Failed to bind listener on {address}: {source}")]
    Bind {
        address: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Dispatcher wiring failed: {0}")]
    Wiring(#[from] DispatchError),
}

/// Faults observed while stopping the service.
#[derive(Debug, thiserror::Error)]
pub enum ShutdownError {
    /// Connection tasks that panicked instead of finishing
    #[error("{0} connection task(s) panicked during shutdown")]
    TaskPanicked(usize),
}
