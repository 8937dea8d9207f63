//! Live configuration management with hot reload.
//!
//! The [`ConfigManager`] owns the current [`Config`] snapshot and the list
//! of subscribers interested in changes. Three concurrent pieces cooperate:
//!
//! * **Readers** call [`ConfigManager::config`] and receive an `Arc<Config>`.
//!   Snapshots are swapped whole, so a reader never observes a mix of two.
//! * **The watch loop** (started by [`ConfigManager::start_watching`]) polls
//!   the loader's source files and re-runs the loader when any of them
//!   changes. Only candidates that pass validation are published.
//! * **The notifier task** receives every published snapshot over an
//!   internal channel and invokes subscribers one after another, in
//!   registration order, on the blocking pool. A slow subscriber delays the
//!   ones after it but never the detection of the next change, and a
//!   panicking subscriber is logged and skipped.
//!
//! Publishing swaps the snapshot and enqueues it for the notifier under one
//! lock, so subscribers see snapshots in the order they became current.

use crate::{Config, ConfigError, ConfigSource, Loader};
use arc_swap::ArcSwap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime};
use tokio::sync::{mpsc, watch, RwLock};
use tracing::{debug, error, info, warn};

/// Callback invoked with each newly published snapshot.
pub type ConfigCallback = Arc<dyn Fn(Arc<Config>) + Send + Sync>;

/// Modification stamp of one watched file (`None` when absent).
type FileStamp = (PathBuf, Option<(SystemTime, u64)>);

#[derive(Debug)]
struct Snapshot {
    config: Arc<Config>,
    sources: Arc<Vec<ConfigSource>>,
}

struct ManagerInner {
    loader: Loader,
    current: ArcSwap<Snapshot>,
    /// Held across swap + enqueue so notification order matches swap order
    publish_lock: Mutex<()>,
    subscribers: RwLock<Vec<ConfigCallback>>,
    notify_tx: mpsc::UnboundedSender<Arc<Config>>,
    closed: watch::Sender<bool>,
    watching: AtomicBool,
}

/// Process-wide configuration owner.
///
/// Lifecycle: constructed at startup (initial load), optionally watching,
/// closed at shutdown. Dropping the manager closes it.
pub struct ConfigManager {
    inner: Arc<ManagerInner>,
}

impl ConfigManager {
    /// Performs the initial load and starts the subscriber notifier.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Any [`ConfigError`] from the initial load. The process should not
    /// start with a broken configuration.
    pub fn new(loader: Loader) -> Result<Self, ConfigError> {
        let (config, sources) = loader.load()?;
        let current = ArcSwap::from_pointee(Snapshot {
            config: Arc::new(config),
            sources: Arc::new(sources),
        });
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let (closed, _) = watch::channel(false);

        let inner = Arc::new(ManagerInner {
            loader,
            current,
            publish_lock: Mutex::new(()),
            subscribers: RwLock::new(Vec::new()),
            notify_tx,
            closed,
            watching: AtomicBool::new(false),
        });

        tokio::spawn(run_notifier(inner.clone(), notify_rx));

        Ok(Self { inner })
    }

    /// Returns the current snapshot.
    pub fn config(&self) -> Arc<Config> {
        self.inner.config()
    }

    /// Returns the sources that produced the current snapshot.
    pub fn sources(&self) -> Vec<ConfigSource> {
        self.inner.current.load().sources.as_ref().clone()
    }

    /// Registers a subscriber invoked after every successful publish.
    pub async fn on_change<F>(&self, callback: F)
    where
        F: Fn(Arc<Config>) + Send + Sync + 'static,
    {
        self.inner.subscribers.write().await.push(Arc::new(callback));
    }

    /// Validates and publishes a candidate snapshot.
    ///
    /// An invalid candidate is rejected: the current snapshot stays in
    /// place and no subscriber is notified.
    pub fn publish(&self, candidate: Config) -> Result<Arc<Config>, ConfigError> {
        let sources = self.inner.current.load().sources.clone();
        self.inner.publish(candidate, sources)
    }

    /// Re-runs the loader and publishes the result.
    ///
    /// Reads files and the environment synchronously; async callers on a
    /// busy runtime may want to run it through `spawn_blocking`.
    pub fn reload(&self) -> Result<Arc<Config>, ConfigError> {
        self.inner.reload()
    }

    /// Starts the background watch loop.
    ///
    /// The loop polls every `environment.watch_interval_ms` of the current
    /// snapshot and ends when `cancel` becomes `true` (or its sender is
    /// dropped) or when the manager is closed.
    ///
    /// # Errors
    ///
    /// Fails if the manager is closed or a watch loop is already running.
    pub fn start_watching(&self, mut cancel: watch::Receiver<bool>) -> Result<(), ConfigError> {
        if *self.inner.closed.borrow() {
            return Err(ConfigError::Manager("manager is closed".to_string()));
        }
        if self
            .inner
            .watching
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ConfigError::Manager("already watching".to_string()));
        }

        let inner = self.inner.clone();
        tokio::spawn(async move {
            let mut closed = inner.closed.subscribe();
            let mut stamps = inner.stamps().await;
            info!("👀 Watching {} configuration source(s)", stamps.len());

            loop {
                let interval = Duration::from_millis(
                    inner.config().environment.watch_interval_ms.max(1),
                );

                tokio::select! {
                    _ = cancel.wait_for(|cancelled| *cancelled) => break,
                    _ = closed.wait_for(|closed| *closed) => break,
                    _ = tokio::time::sleep(interval) => {}
                }

                let next = inner.stamps().await;
                if next == stamps {
                    continue;
                }
                stamps = next;

                debug!("Configuration source change detected");
                let reloading = inner.clone();
                match tokio::task::spawn_blocking(move || reloading.reload()).await {
                    Ok(Ok(config)) => info!(
                        "🔄 Configuration reloaded (service version {})",
                        config.service.version
                    ),
                    Ok(Err(e)) => warn!("⚠️ Rejected configuration change, keeping current snapshot: {}", e),
                    Err(e) => error!("Configuration reload task failed: {}", e),
                }
            }

            inner.watching.store(false, Ordering::Release);
            debug!("Configuration watch loop stopped");
        });

        Ok(())
    }

    /// Returns whether a watch loop is currently running.
    pub fn is_watching(&self) -> bool {
        self.inner.watching.load(Ordering::Acquire)
    }

    /// Stops the watch loop and the notifier. Safe to call repeatedly.
    pub fn close(&self) {
        if !self.inner.closed.send_replace(true) {
            debug!("Configuration manager closed");
        }
    }
}

impl Drop for ConfigManager {
    fn drop(&mut self) {
        self.close();
    }
}

impl ManagerInner {
    fn config(&self) -> Arc<Config> {
        self.current.load().config.clone()
    }

    fn publish(
        &self,
        candidate: Config,
        sources: Arc<Vec<ConfigSource>>,
    ) -> Result<Arc<Config>, ConfigError> {
        if *self.closed.borrow() {
            return Err(ConfigError::Manager("manager is closed".to_string()));
        }
        if let Err(e) = candidate.validate() {
            warn!("⚠️ Invalid configuration candidate rejected: {}", e);
            return Err(e);
        }

        let config = Arc::new(candidate);
        let _guard = self.publish_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.current.store(Arc::new(Snapshot {
            config: config.clone(),
            sources,
        }));

        if self.notify_tx.send(config.clone()).is_err() {
            warn!("Configuration notifier is gone; subscribers will not be told");
        }
        Ok(config)
    }

    fn reload(&self) -> Result<Arc<Config>, ConfigError> {
        let (config, sources) = self.loader.load()?;
        self.publish(config, Arc::new(sources))
    }

    async fn stamps(&self) -> Vec<FileStamp> {
        let environment = self.config().app.environment.clone();
        let mut stamps = Vec::new();
        for path in self.loader.candidate_paths(&environment) {
            let stamp = match tokio::fs::metadata(&path).await {
                Ok(meta) => meta.modified().ok().map(|modified| (modified, meta.len())),
                Err(_) => None,
            };
            stamps.push((path, stamp));
        }
        stamps
    }
}

async fn run_notifier(inner: Arc<ManagerInner>, mut rx: mpsc::UnboundedReceiver<Arc<Config>>) {
    let mut closed = inner.closed.subscribe();
    loop {
        let config = tokio::select! {
            next = rx.recv() => match next {
                Some(config) => config,
                None => break,
            },
            _ = closed.wait_for(|closed| *closed) => break,
        };

        let subscribers = inner.subscribers.read().await.clone();
        let notified = tokio::task::spawn_blocking(move || notify_all(&subscribers, &config)).await;
        if let Err(e) = notified {
            error!("Configuration notifier task failed: {}", e);
        }
    }
}

/// Invokes every subscriber in order. A panic is logged and the remaining
/// subscribers still run.
fn notify_all(subscribers: &[ConfigCallback], config: &Arc<Config>) {
    for (index, subscriber) in subscribers.iter().enumerate() {
        if catch_unwind(AssertUnwindSafe(|| subscriber(config.clone()))).is_err() {
            error!(
                "💥 Configuration subscriber #{} panicked (service version {})",
                index, config.service.version
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;
    use tokio::time::timeout;

    fn write_config(dir: &TempDir, version: &str, interval_ms: u64) {
        fs::write(
            dir.path().join("config.toml"),
            format!(
                "[service]\nversion = \"{version}\"\n\n[environment]\nhot_reload = true\nwatch_interval_ms = {interval_ms}\n"
            ),
        )
        .unwrap();
    }

    fn manager(dir: &TempDir) -> ConfigManager {
        let loader = Loader::new()
            .with_service("auth-service")
            .with_config_dir(dir.path())
            .with_env_vars(Vec::<(String, String)>::new());
        ConfigManager::new(loader).unwrap()
    }

    async fn record(manager: &ConfigManager, id: usize, calls: Arc<Mutex<Vec<(usize, String)>>>) {
        manager
            .on_change(move |config: Arc<Config>| {
                let version = config.service.version.clone();
                calls.lock().unwrap().push((id, version));
            })
            .await;
    }

    async fn wait_for_calls(calls: &Arc<Mutex<Vec<(usize, String)>>>, n: usize) {
        timeout(Duration::from_secs(3), async {
            loop {
                if calls.lock().unwrap().len() >= n {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("subscribers were not notified in time");
    }

    async fn wait_for_version(manager: &ConfigManager, version: &str) {
        timeout(Duration::from_secs(3), async {
            while manager.config().service.version != version {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("version {version} was never published"));
    }

    #[tokio::test]
    async fn test_initial_load() {
        let dir = TempDir::new().unwrap();
        write_config(&dir, "1.0.0", 20);

        let manager = manager(&dir);
        assert_eq!(manager.config().service.version, "1.0.0");
        assert_eq!(manager.sources().len(), 2);
    }

    #[tokio::test]
    async fn test_initial_load_failure_is_fatal() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("config.toml"), "[logging]\nlevel = \"shout\"\n").unwrap();

        let loader = Loader::new()
            .with_service("auth-service")
            .with_config_dir(dir.path())
            .with_env_vars(Vec::<(String, String)>::new());
        assert!(ConfigManager::new(loader).is_err());
    }

    #[tokio::test]
    async fn test_valid_publish_notifies_subscribers_in_order() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        let calls = Arc::new(Mutex::new(Vec::new()));
        record(&manager, 1, calls.clone()).await;
        record(&manager, 2, calls.clone()).await;

        let mut next = (*manager.config()).clone();
        next.service.version = "2.0.0".to_string();
        let published = manager.publish(next).unwrap();

        assert_eq!(published.service.version, "2.0.0");
        assert_eq!(manager.config().service.version, "2.0.0");

        wait_for_calls(&calls, 2).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            *calls.lock().unwrap(),
            vec![(1, "2.0.0".to_string()), (2, "2.0.0".to_string())]
        );
    }

    #[tokio::test]
    async fn test_invalid_publish_keeps_snapshot() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        let calls = Arc::new(Mutex::new(Vec::new()));
        record(&manager, 1, calls.clone()).await;

        let before = manager.config();
        let mut bad = (*before).clone();
        bad.server.bind_address = "not an address".to_string();

        assert!(manager.publish(bad).is_err());
        assert!(Arc::ptr_eq(&before, &manager.config()));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_watch_publishes_file_changes() {
        let dir = TempDir::new().unwrap();
        write_config(&dir, "1.0.0", 20);
        let manager = manager(&dir);
        let calls = Arc::new(Mutex::new(Vec::new()));
        record(&manager, 1, calls.clone()).await;

        let (cancel_tx, cancel_rx) = watch::channel(false);
        manager.start_watching(cancel_rx).unwrap();
        assert!(manager.is_watching());
        assert!(manager.start_watching(cancel_tx.subscribe()).is_err());

        tokio::time::sleep(Duration::from_millis(60)).await;
        write_config(&dir, "1.1.10", 20);

        wait_for_calls(&calls, 1).await;
        assert_eq!(manager.config().service.version, "1.1.10");

        cancel_tx.send_replace(true);
    }

    #[tokio::test]
    async fn test_watch_rejects_broken_file() {
        let dir = TempDir::new().unwrap();
        write_config(&dir, "1.0.0", 20);
        let manager = manager(&dir);
        let calls = Arc::new(Mutex::new(Vec::new()));
        record(&manager, 1, calls.clone()).await;

        let (cancel_tx, cancel_rx) = watch::channel(false);
        manager.start_watching(cancel_rx).unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;
        fs::write(dir.path().join("config.toml"), "[service\nversion = ").unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(manager.config().service.version, "1.0.0");
        assert!(calls.lock().unwrap().is_empty());

        cancel_tx.send_replace(true);
    }

    #[tokio::test]
    async fn test_slow_subscriber_does_not_delay_next_reload() {
        let dir = TempDir::new().unwrap();
        write_config(&dir, "1.0.0", 20);
        let manager = manager(&dir);

        let (gate_tx, gate_rx) = std::sync::mpsc::channel::<()>();
        let gate_rx = Mutex::new(gate_rx);
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = seen.clone();
            manager
                .on_change(move |config: Arc<Config>| {
                    // Blocks until the gate sender is dropped.
                    let _ = gate_rx.lock().unwrap().recv();
                    seen.lock().unwrap().push(config.service.version.clone());
                })
                .await;
        }

        let (cancel_tx, cancel_rx) = watch::channel(false);
        manager.start_watching(cancel_rx).unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;
        write_config(&dir, "2.0.10", 20);
        wait_for_version(&manager, "2.0.10").await;

        tokio::time::sleep(Duration::from_millis(60)).await;
        write_config(&dir, "3.0.100", 20);
        wait_for_version(&manager, "3.0.100").await;
        assert!(seen.lock().unwrap().is_empty());

        drop(gate_tx);
        timeout(Duration::from_secs(3), async {
            while seen.lock().unwrap().len() < 2 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("subscriber never caught up");
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["2.0.10".to_string(), "3.0.100".to_string()]
        );

        cancel_tx.send_replace(true);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_publishes_notify_in_swap_order() {
        let dir = TempDir::new().unwrap();
        let manager = Arc::new(manager(&dir));
        let last_seen = Arc::new(Mutex::new(String::new()));
        let notified = Arc::new(AtomicUsize::new(0));
        {
            let last_seen = last_seen.clone();
            let notified = notified.clone();
            manager
                .on_change(move |config: Arc<Config>| {
                    *last_seen.lock().unwrap() = config.service.version.clone();
                    notified.fetch_add(1, Ordering::SeqCst);
                })
                .await;
        }

        let publishers = (0..8)
            .map(|thread| {
                let manager = manager.clone();
                tokio::task::spawn_blocking(move || {
                    for round in 0..25 {
                        let mut next = (*manager.config()).clone();
                        next.service.version = format!("{thread}.{round}.0");
                        manager.publish(next).unwrap();
                    }
                })
            })
            .collect::<Vec<_>>();
        for publisher in publishers {
            publisher.await.unwrap();
        }

        timeout(Duration::from_secs(3), async {
            while notified.load(Ordering::SeqCst) < 200 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("not every publish was notified");

        // The last snapshot handed to subscribers is the one that is current.
        assert_eq!(*last_seen.lock().unwrap(), manager.config().service.version);
    }

    #[tokio::test]
    async fn test_panicking_subscriber_does_not_stop_notifications() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        manager
            .on_change(|config: Arc<Config>| {
                panic!("subscriber rejected {}", config.service.version);
            })
            .await;
        let calls = Arc::new(Mutex::new(Vec::new()));
        record(&manager, 2, calls.clone()).await;

        for version in ["2.0.0", "3.0.0"] {
            let mut next = (*manager.config()).clone();
            next.service.version = version.to_string();
            manager.publish(next).unwrap();
        }

        wait_for_calls(&calls, 2).await;
        assert_eq!(
            *calls.lock().unwrap(),
            vec![(2, "2.0.0".to_string()), (2, "3.0.0".to_string())]
        );
    }

    #[tokio::test]
    async fn test_cancel_stops_watch_loop() {
        let dir = TempDir::new().unwrap();
        write_config(&dir, "1.0.0", 20);
        let manager = manager(&dir);

        let (cancel_tx, cancel_rx) = watch::channel(false);
        manager.start_watching(cancel_rx).unwrap();
        cancel_tx.send_replace(true);

        timeout(Duration::from_secs(1), async {
            while manager.is_watching() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("watch loop did not stop");

        // A fresh loop may be started after cancellation.
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        assert!(manager.start_watching(cancel_rx).is_ok());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);

        manager.close();
        manager.close();

        let (_cancel_tx, cancel_rx) = watch::channel(false);
        assert!(manager.start_watching(cancel_rx).is_err());
        assert!(manager.publish((*manager.config()).clone()).is_err());
    }
}
