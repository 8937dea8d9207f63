//! One live client connection.
//!
//! All writes go through a bounded queue drained by a single writer task
//! that owns the write half of the transport. Every [`Session::send`] is
//! queued as one pre-framed buffer, so concurrent senders can never
//! interleave partial writes on the wire. Sending never waits on the peer:
//! a session whose queue is full is closed.

use crate::error::TransportError;
use crate::protocol::{frame, Message};
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};
use uuid::Uuid;

/// Unique identifier of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Server-side handle for one live connection.
///
/// Owned by the connection task that created it. Handlers and the
/// registry hold `Arc` references for the duration of a call or while the
/// connection is registered.
pub struct Session {
    id: ConnectionId,
    remote_addr: SocketAddr,
    connected_at: SystemTime,
    /// Bound after login, 0 while unauthenticated
    player_id: AtomicU64,
    /// Counter for server-initiated pushes
    sequence: AtomicU64,
    outbound: mpsc::Sender<Vec<u8>>,
    closed: Arc<watch::Sender<bool>>,
    shutdown: watch::Receiver<bool>,
}

impl Session {
    /// Creates a session over the write half of a transport and spawns its
    /// writer task.
    ///
    /// # Arguments
    ///
    /// * `writer` - Write half of the connection, owned by the writer task
    /// * `remote_addr` - Peer address, for logging
    /// * `send_queue_capacity` - Frames buffered before `send` waits
    /// * `shutdown` - Server-wide shutdown flag, exposed to handlers
    pub fn new<W>(
        writer: W,
        remote_addr: SocketAddr,
        send_queue_capacity: usize,
        shutdown: watch::Receiver<bool>,
    ) -> Arc<Self>
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (outbound, rx) = mpsc::channel(send_queue_capacity.max(1));
        let (closed, _) = watch::channel(false);
        let closed = Arc::new(closed);
        let id = ConnectionId::new();

        tokio::spawn(write_loop(id, writer, rx, closed.clone()));

        Arc::new(Self {
            id,
            remote_addr,
            connected_at: SystemTime::now(),
            player_id: AtomicU64::new(0),
            sequence: AtomicU64::new(0),
            outbound,
            closed,
            shutdown,
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn connected_at(&self) -> SystemTime {
        self.connected_at
    }

    /// Player bound to this session, `None` until login completes.
    pub fn player_id(&self) -> Option<u64> {
        match self.player_id.load(Ordering::Acquire) {
            0 => None,
            id => Some(id),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.player_id().is_some()
    }

    pub(crate) fn bind_player(&self, player_id: u64) {
        self.player_id.store(player_id, Ordering::Release);
    }

    pub(crate) fn unbind_player(&self) -> Option<u64> {
        match self.player_id.swap(0, Ordering::AcqRel) {
            0 => None,
            id => Some(id),
        }
    }

    /// Next value of the outbound sequence counter, starting at 1.
    pub fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Whether the server has begun shutting down. Long-running handlers
    /// may poll this to wind down early.
    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Queues one encoded message for delivery.
    ///
    /// Success means the bytes were accepted by the writer, not that the
    /// peer received them. Never waits on the peer: when the outbound queue
    /// is full the session is closed as a slow consumer and
    /// [`TransportError::SlowConsumer`] is returned. Fails with
    /// [`TransportError::Closed`] once the session is closed.
    pub async fn send(&self, bytes: &[u8]) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        match self.outbound.try_send(frame(bytes)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!(
                    connection_id = %self.id,
                    remote_addr = %self.remote_addr,
                    "🐢 Outbound queue full, closing slow session"
                );
                self.close();
                Err(TransportError::SlowConsumer)
            }
            Err(TrySendError::Closed(_)) => Err(TransportError::Closed),
        }
    }

    /// Encodes and queues a message.
    pub async fn send_message(&self, message: &Message) -> Result<(), TransportError> {
        let bytes = message.encode()?;
        self.send(&bytes).await
    }

    /// Closes the session. Returns `true` only for the call that actually
    /// closed it; later calls are no-ops.
    pub fn close(&self) -> bool {
        let was_closed = self.closed.send_replace(true);
        if !was_closed {
            debug!(connection_id = %self.id, "Session closed");
        }
        !was_closed
    }

    /// Resolves once the session is closed.
    pub async fn closed(&self) {
        let mut closed = self.closed.subscribe();
        let _ = closed.wait_for(|closed| *closed).await;
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("remote_addr", &self.remote_addr)
            .field("player_id", &self.player_id())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Drains the outbound queue into the transport until the session closes.
///
/// Frames already queued when the session closes are still written as long
/// as the transport accepts them without blocking.
async fn write_loop<W>(
    id: ConnectionId,
    mut writer: W,
    mut rx: mpsc::Receiver<Vec<u8>>,
    closed: Arc<watch::Sender<bool>>,
) where
    W: AsyncWrite + Send + Unpin + 'static,
{
    let mut closed_rx = closed.subscribe();

    loop {
        let frame = tokio::select! {
            biased;
            frame = rx.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
            _ = closed_rx.wait_for(|closed| *closed) => break,
        };

        let written = tokio::select! {
            biased;
            result = write_frame_bytes(&mut writer, &frame) => result,
            _ = closed_rx.wait_for(|closed| *closed) => break,
        };

        if let Err(e) = written {
            warn!(connection_id = %id, "Write failed, closing session: {}", e);
            closed.send_replace(true);
            break;
        }
    }

    rx.close();
    let _ = writer.shutdown().await;
}

async fn write_frame_bytes<W>(writer: &mut W, frame: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(frame).await?;
    writer.flush().await
}
