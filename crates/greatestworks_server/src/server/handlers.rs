//! Per-connection processing.
//!
//! Each accepted socket gets its own task running [`handle_connection`]:
//! it creates the [`Session`], registers it, then reads frames in arrival
//! order and hands each decoded message to the dispatcher before reading
//! the next one.

use super::stats::ServiceStats;
use crate::connection::{ConnectionRegistry, Session};
use crate::error::{DispatchError, HandlerError, TransportError};
use crate::messaging::{reply_error, Dispatcher};
use crate::protocol::{read_frame, Message, MessageHeader};
use arc_swap::ArcSwap;
use greatestworks_config::Config;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Shared handles every connection task needs.
#[derive(Clone)]
pub(crate) struct ConnectionContext {
    pub(crate) dispatcher: Arc<Dispatcher>,
    pub(crate) registry: Arc<ConnectionRegistry>,
    pub(crate) config: Arc<ArcSwap<Config>>,
    pub(crate) shutdown: watch::Receiver<bool>,
    pub(crate) stats: Arc<ServiceStats>,
}

/// Keeps the active-connection count and the registry consistent however
/// the connection task ends, including when it is aborted.
pub(crate) struct ConnectionGuard {
    stats: Arc<ServiceStats>,
    registry: Arc<ConnectionRegistry>,
    session: Option<Arc<Session>>,
}

impl ConnectionGuard {
    /// Counts the connection as active until the guard is dropped.
    pub(crate) fn new(stats: Arc<ServiceStats>, registry: Arc<ConnectionRegistry>) -> Self {
        stats.connection_accepted();
        Self {
            stats,
            registry,
            session: None,
        }
    }

    fn attach(&mut self, session: Arc<Session>) {
        self.registry.register(session.clone());
        self.session = Some(session);
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            session.close();
            self.registry.unregister(session.id());
        }
        self.stats.connection_closed();
    }
}

/// Runs one TCP connection to completion.
pub(crate) async fn handle_connection(
    stream: TcpStream,
    remote_addr: SocketAddr,
    ctx: ConnectionContext,
    mut guard: ConnectionGuard,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(%remote_addr, "Failed to set TCP_NODELAY: {}", e);
    }

    let (reader, writer) = stream.into_split();
    let send_queue_capacity = ctx.config.load().server.send_queue_capacity;
    let session = Session::new(writer, remote_addr, send_queue_capacity, ctx.shutdown.clone());
    guard.attach(session.clone());

    info!(connection_id = %session.id(), %remote_addr, "🔗 Connection established");
    run_session(session.clone(), reader, &ctx).await;
    info!(
        connection_id = %session.id(),
        player_id = session.player_id().unwrap_or(0),
        "🔌 Connection closed"
    );
}

/// Reads and dispatches messages until the connection ends.
///
/// The loop ends on EOF, idle timeout, a protocol violation, a failed
/// reply, session close or server shutdown, and always leaves the session
/// closed. Shutdown is only observed between messages, so an in-flight
/// handler always runs to completion.
pub(crate) async fn run_session<R>(session: Arc<Session>, mut reader: R, ctx: &ConnectionContext)
where
    R: AsyncRead + Unpin,
{
    let mut shutdown = ctx.shutdown.clone();
    let mut last_sequence = 0u64;

    loop {
        // Limits are re-read per frame so a hot-reloaded snapshot applies
        // to open connections too.
        let (idle_timeout_secs, max_frame_size) = {
            let config = ctx.config.load();
            (config.server.idle_timeout_secs, config.server.max_frame_size)
        };

        let read = tokio::select! {
            biased;
            _ = session.closed() => break,
            _ = shutdown.wait_for(|shutting_down| *shutting_down) => {
                debug!(connection_id = %session.id(), "Server shutting down, no more reads");
                break;
            }
            read = with_idle_timeout(idle_timeout_secs, read_frame(&mut reader, max_frame_size)) => read,
        };

        let frame = match read {
            Some(Ok(Some(frame))) => frame,
            Some(Ok(None)) => {
                debug!(connection_id = %session.id(), "Peer closed the connection");
                break;
            }
            None => {
                info!(
                    connection_id = %session.id(),
                    "⏰ Idle for {}s, closing connection", idle_timeout_secs
                );
                break;
            }
            Some(Err(TransportError::Protocol(e))) => {
                warn!(connection_id = %session.id(), "Protocol violation, closing connection: {}", e);
                break;
            }
            Some(Err(e)) => {
                debug!(connection_id = %session.id(), "Read failed: {}", e);
                break;
            }
        };

        let message = match Message::decode(&frame) {
            Ok(message) => message,
            Err(e) => {
                warn!(connection_id = %session.id(), "Undecodable message, closing connection: {}", e);
                break;
            }
        };

        // Sequence 0 means the client does not number its messages.
        let sequence = message.header.sequence;
        if sequence != 0 {
            if last_sequence != 0 && sequence <= last_sequence {
                warn!(
                    connection_id = %session.id(),
                    "Sequence went backwards: {} after {}", sequence, last_sequence
                );
            } else if last_sequence != 0 && sequence > last_sequence + 1 {
                warn!(
                    connection_id = %session.id(),
                    "Sequence gap: {} message(s) missing before {}",
                    sequence - last_sequence - 1,
                    sequence
                );
            }
            last_sequence = sequence;
        }

        let header = message.header;
        match ctx.dispatcher.dispatch(&session, message).await {
            Ok(()) => ctx.stats.message_dispatched(),
            Err(e) => {
                ctx.stats.dispatch_failed();
                if !answer_dispatch_error(&session, &header, e).await {
                    break;
                }
            }
        }
    }

    session.close();
}

async fn with_idle_timeout<F: Future>(idle_timeout_secs: u64, future: F) -> Option<F::Output> {
    if idle_timeout_secs == 0 {
        return Some(future.await);
    }
    tokio::time::timeout(Duration::from_secs(idle_timeout_secs), future)
        .await
        .ok()
}

/// Sends the generic failure ack for a dispatch error. Returns whether the
/// connection can keep going.
async fn answer_dispatch_error(session: &Session, header: &MessageHeader, error: DispatchError) -> bool {
    let reply = match &error {
        DispatchError::UnknownMessageType(message_type) => {
            warn!(
                connection_id = %session.id(),
                message_id = header.message_id,
                %message_type,
                "Unhandled message type"
            );
            "unsupported message type"
        }
        DispatchError::Handler {
            source: HandlerError::Transport(e),
            ..
        } => {
            debug!(connection_id = %session.id(), "Reply could not be sent: {}", e);
            return false;
        }
        DispatchError::Handler {
            source: HandlerError::Domain(e),
            ..
        } => e.public_message(),
        other => {
            warn!(connection_id = %session.id(), message_id = header.message_id, "{}", other);
            "request failed"
        }
    };

    reply_error(session, header, reply).await.is_ok()
}
