//! # Greatestworks Server
//!
//! Networking and lifecycle core for greatestworks game services: a binary
//! header + JSON payload protocol over TCP, per-connection sessions, a
//! type-routed dispatcher and a service that can take configuration
//! changes and shut down gracefully.
//!
//! ## Architecture Overview
//!
//! * **Protocol** ([`protocol`]) - 44-byte big-endian header, JSON payload,
//!   length-prefixed frames
//! * **Sessions** ([`connection`]) - one per connection, all writes
//!   serialized through a single writer task
//! * **Dispatcher** ([`messaging`]) - immutable table from message type to
//!   handler, built before traffic starts
//! * **Domain boundary** ([`domain`]) - command and query buses the handlers
//!   forward authenticated requests to
//! * **Service** ([`server`]) - listener, connection tasks, live config and
//!   graceful stop
//!
//! ### Message Flow
//!
//! 1. A connection task reads one frame and decodes the header and payload
//! 2. The dispatcher picks the handler registered for the message type
//! 3. The handler calls a domain bus if needed and replies through the session
//! 4. Only then is the next frame read, so a connection's messages are
//!    processed in arrival order
//!
//! ## Error Handling
//!
//! Protocol and transport errors close the connection. Unknown message
//! types and handler failures are answered with a generic failure
//! acknowledgment and the connection stays open. See [`error`].

pub mod connection;
pub mod domain;
pub mod error;
pub mod messaging;
pub mod protocol;
pub mod server;

pub use connection::{ConnectionId, ConnectionRegistry, Session};
pub use domain::{CommandBus, DomainAction, DomainError, DomainRequest, PlayerDirectory, QueryBus};
pub use error::{DispatchError, HandlerError, ProtocolError, ShutdownError, StartupError, TransportError};
pub use messaging::{handler_fn, reply_error, reply_ok, Dispatcher, GameHandler, MessageHandler};
pub use protocol::{BaseResponse, Message, MessageFlags, MessageHeader, MessageType};
pub use server::{DoneReason, GameService, ServiceDependencies, ServiceState, StatsSnapshot};

#[cfg(test)]
pub(crate) mod test_support {
    use crate::connection::Session;
    use crate::protocol::{read_frame, Message};
    use std::sync::Arc;
    use tokio::io::{AsyncRead, DuplexStream};
    use tokio::sync::watch;

    /// A session writing into an in-memory pipe. The returned stream is the
    /// peer's end; the sender controls the server shutdown flag.
    pub(crate) fn session_pair(
        send_queue_capacity: usize,
    ) -> (Arc<Session>, DuplexStream, watch::Sender<bool>) {
        let (server, peer) = tokio::io::duplex(1024);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let session = Session::new(
            server,
            "127.0.0.1:9999".parse().unwrap(),
            send_queue_capacity,
            shutdown_rx,
        );
        (session, peer, shutdown)
    }

    pub(crate) async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Message {
        let frame = tokio::time::timeout(std::time::Duration::from_secs(2), read_frame(reader, 1 << 20))
            .await
            .expect("timed out waiting for a message")
            .unwrap()
            .expect("stream ended before a message arrived");
        Message::decode(&frame).unwrap()
    }
}
