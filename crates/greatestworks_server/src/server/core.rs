//! Service lifecycle.
//!
//! [`GameService`] owns the listener, the connection tasks and the current
//! configuration snapshot, and drives the state machine
//! `Created → Running → Stopping → Stopped`.

use super::handlers::{handle_connection, ConnectionContext, ConnectionGuard};
use super::stats::{ServiceStats, StatsSnapshot};
use crate::connection::ConnectionRegistry;
use crate::domain::{CommandBus, PlayerDirectory, QueryBus};
use crate::error::{ShutdownError, StartupError};
use crate::messaging::GameHandler;
use arc_swap::ArcSwap;
use futures::stream::{FuturesUnordered, StreamExt};
use greatestworks_config::Config;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// How long force-closed connections get to unwind before their tasks are
/// aborted.
const FORCE_CLOSE_WAIT: Duration = Duration::from_millis(250);

/// Lifecycle states. There is no transition out of `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Created,
    Running,
    Stopping,
    Stopped,
}

/// Why [`GameService::done`] resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DoneReason {
    /// An operator asked the service to stop
    StopRequested,
    /// The service hit an unrecoverable fault
    Fault(String),
}

/// Domain collaborators handed to the game handlers.
#[derive(Clone)]
pub struct ServiceDependencies {
    pub commands: Arc<dyn CommandBus>,
    pub queries: Arc<dyn QueryBus>,
}

impl ServiceDependencies {
    /// Both buses backed by one in-memory [`PlayerDirectory`].
    pub fn in_memory() -> Self {
        let directory = Arc::new(PlayerDirectory::new());
        Self {
            commands: directory.clone(),
            queries: directory,
        }
    }
}

impl Default for ServiceDependencies {
    fn default() -> Self {
        Self::in_memory()
    }
}

type AcceptTask = JoinHandle<Vec<JoinHandle<()>>>;

/// The game service: listener, connections and live configuration.
///
/// # Lifecycle
///
/// * [`start`](Self::start) binds the listener and moves to `Running`
/// * [`done`](Self::done) resolves when a stop is requested or a fault occurs
/// * [`update_config`](Self::update_config) swaps the snapshot at any time
/// * [`stop`](Self::stop) shuts down gracefully and is idempotent
pub struct GameService {
    config: Arc<ArcSwap<Config>>,
    dependencies: ServiceDependencies,
    registry: Arc<ConnectionRegistry>,
    stats: Arc<ServiceStats>,
    state: watch::Sender<ServiceState>,
    shutdown: watch::Sender<bool>,
    done: Arc<watch::Sender<Option<DoneReason>>>,
    /// Serializes start and stop; holds the accept task while running
    lifecycle: Mutex<Option<AcceptTask>>,
}

impl GameService {
    pub fn new(config: Arc<Config>, dependencies: ServiceDependencies) -> Self {
        let (state, _) = watch::channel(ServiceState::Created);
        let (shutdown, _) = watch::channel(false);
        let (done, _) = watch::channel(None);

        Self {
            config: Arc::new(ArcSwap::new(config)),
            dependencies,
            registry: Arc::new(ConnectionRegistry::new()),
            stats: Arc::new(ServiceStats::default()),
            state,
            shutdown,
            done: Arc::new(done),
            lifecycle: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ServiceState {
        *self.state.borrow()
    }

    /// Current configuration snapshot.
    pub fn config(&self) -> Arc<Config> {
        self.config.load_full()
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Wires the handlers, binds the listener and starts accepting.
    ///
    /// # Returns
    ///
    /// The address actually bound (useful with port 0).
    ///
    /// # Errors
    ///
    /// * [`StartupError::AlreadyStarted`] when running or stopping
    /// * [`StartupError::InvalidState`] after the service was stopped
    /// * [`StartupError::Bind`] when the listener cannot be bound; the
    ///   service stays in `Created`
    pub async fn start(&self) -> Result<SocketAddr, StartupError> {
        let mut lifecycle = self.lifecycle.lock().await;
        match self.state() {
            ServiceState::Created => {}
            ServiceState::Running | ServiceState::Stopping => {
                return Err(StartupError::AlreadyStarted)
            }
            state @ ServiceState::Stopped => return Err(StartupError::InvalidState(state)),
        }

        let config = self.config();
        info!(
            "🚀 Starting {} v{} on {}",
            config.service.name, config.service.version, config.server.bind_address
        );

        let game = Arc::new(GameHandler::new(
            self.dependencies.commands.clone(),
            self.dependencies.queries.clone(),
            self.registry.clone(),
        ));
        let dispatcher = Arc::new(game.into_dispatcher()?);

        let address = config.bind_address()?;
        let listener = bind_listener(address)?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| StartupError::Bind { address, source })?;

        let ctx = ConnectionContext {
            dispatcher,
            registry: self.registry.clone(),
            config: self.config.clone(),
            shutdown: self.shutdown.subscribe(),
            stats: self.stats.clone(),
        };
        *lifecycle = Some(tokio::spawn(accept_loop(listener, ctx, self.done.clone())));
        self.state.send_replace(ServiceState::Running);

        info!("✅ Listening on {}", local_addr);
        Ok(local_addr)
    }

    /// Resolves once a stop has been requested or the service faulted.
    ///
    /// Safe to call from any number of tasks, before or after the event.
    pub async fn done(&self) -> DoneReason {
        let mut done = self.done.subscribe();
        let reason = match done.wait_for(Option::is_some).await {
            Ok(reason) => (*reason).clone().unwrap_or(DoneReason::StopRequested),
            Err(_) => DoneReason::StopRequested,
        };
        reason
    }

    /// Asks the owner of the service to stop it; resolves [`done`](Self::done).
    pub fn request_stop(&self) {
        if signal_done(&self.done, DoneReason::StopRequested) {
            info!("Stop requested");
        }
    }

    /// Applies a new configuration snapshot.
    ///
    /// The swap is atomic: readers see the old or the new snapshot, never a
    /// mix. Listener settings only take effect on the next start.
    pub fn update_config(&self, next: Arc<Config>) {
        let previous = self.config.swap(next.clone());
        if previous.server.bind_address != next.server.bind_address {
            warn!(
                "server.bind_address changed to {}; the listener keeps {} until restart",
                next.server.bind_address, previous.server.bind_address
            );
        }
        info!(
            "🔄 Configuration applied: {} v{} ({})",
            next.service.name, next.service.version, next.app.environment
        );
    }

    /// Gracefully shuts the service down.
    ///
    /// Stops accepting, lets in-flight handlers finish for up to
    /// `server.shutdown_grace_period_ms`, then force-closes the sessions
    /// still open and aborts their tasks. Calling it again after it
    /// returned is a no-op.
    ///
    /// # Errors
    ///
    /// [`ShutdownError::TaskPanicked`] if connection tasks panicked; the
    /// service is `Stopped` regardless.
    pub async fn stop(&self) -> Result<(), ShutdownError> {
        let mut lifecycle = self.lifecycle.lock().await;
        match self.state() {
            ServiceState::Stopped => return Ok(()),
            ServiceState::Created => {
                self.shutdown.send_replace(true);
                signal_done(&self.done, DoneReason::StopRequested);
                self.state.send_replace(ServiceState::Stopped);
                return Ok(());
            }
            ServiceState::Running | ServiceState::Stopping => {}
        }

        self.state.send_replace(ServiceState::Stopping);
        info!("🛑 Stopping service...");
        self.shutdown.send_replace(true);
        signal_done(&self.done, DoneReason::StopRequested);

        let mut panicked = 0;
        let connections = match lifecycle.take() {
            Some(accept_task) => match accept_task.await {
                Ok(connections) => connections,
                Err(e) => {
                    error!("Accept loop ended abnormally: {}", e);
                    if e.is_panic() {
                        panicked += 1;
                    }
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        let grace = Duration::from_millis(self.config().server.shutdown_grace_period_ms);
        let mut pending = connections.into_iter().collect::<FuturesUnordered<_>>();
        info!("⏳ Waiting up to {:?} for {} connection(s)", grace, pending.len());

        if tokio::time::timeout(grace, join_connections(&mut pending, &mut panicked))
            .await
            .is_err()
        {
            let forced = self.registry.close_all();
            self.stats.sessions_force_closed(forced);
            warn!(
                "⏱️ Grace period elapsed, force-closed {} session(s)",
                forced
            );

            if tokio::time::timeout(FORCE_CLOSE_WAIT, join_connections(&mut pending, &mut panicked))
                .await
                .is_err()
            {
                warn!("Aborting {} unresponsive connection task(s)", pending.len());
                for task in pending.iter() {
                    task.abort();
                }
                join_connections(&mut pending, &mut panicked).await;
            }
        }

        self.state.send_replace(ServiceState::Stopped);
        if panicked > 0 {
            error!("❌ {} task(s) panicked during shutdown", panicked);
            return Err(ShutdownError::TaskPanicked(panicked));
        }

        info!("✅ Service stopped");
        Ok(())
    }
}

/// Records the first reason only. Returns whether this call recorded it.
fn signal_done(done: &watch::Sender<Option<DoneReason>>, reason: DoneReason) -> bool {
    done.send_if_modified(|current| {
        if current.is_some() {
            return false;
        }
        *current = Some(reason);
        true
    })
}

async fn join_connections(
    pending: &mut FuturesUnordered<JoinHandle<()>>,
    panicked: &mut usize,
) {
    while let Some(result) = pending.next().await {
        if let Err(e) = result {
            if e.is_panic() {
                error!("Connection task panicked: {}", e);
                *panicked += 1;
            }
        }
    }
}

fn bind_listener(address: SocketAddr) -> Result<TcpListener, StartupError> {
    let bind_error = |source| StartupError::Bind { address, source };

    let socket = Socket::new(Domain::for_address(address), Type::STREAM, Some(Protocol::TCP))
        .map_err(bind_error)?;
    socket.set_reuse_address(true).map_err(bind_error)?;
    socket.set_nonblocking(true).map_err(bind_error)?;
    socket.bind(&address.into()).map_err(bind_error)?;
    socket.listen(1024).map_err(bind_error)?;

    TcpListener::from_std(socket.into()).map_err(bind_error)
}

/// Accepts connections until shutdown. Returns the handles of connection
/// tasks that may still be running.
async fn accept_loop(
    listener: TcpListener,
    ctx: ConnectionContext,
    done: Arc<watch::Sender<Option<DoneReason>>>,
) -> Vec<JoinHandle<()>> {
    let mut shutdown = ctx.shutdown.clone();
    let mut connections: Vec<JoinHandle<()>> = Vec::new();

    loop {
        let accepted = tokio::select! {
            biased;
            _ = shutdown.wait_for(|shutting_down| *shutting_down) => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, remote_addr)) => {
                connections.retain(|task| !task.is_finished());

                let max_connections = ctx.config.load().server.max_connections;
                if ctx.stats.active() >= max_connections {
                    ctx.stats.connection_rejected();
                    warn!(
                        %remote_addr,
                        "🚫 Connection limit of {} reached, rejecting", max_connections
                    );
                    drop(stream);
                    continue;
                }

                let guard = ConnectionGuard::new(ctx.stats.clone(), ctx.registry.clone());
                connections.push(tokio::spawn(handle_connection(
                    stream,
                    remote_addr,
                    ctx.clone(),
                    guard,
                )));
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
                signal_done(&done, DoneReason::Fault(format!("accept loop failed: {e}")));
                break;
            }
        }
    }

    info!("Listener closed");
    connections
}
