//! Block shipper lifecycle.
//!
//! [`BlockShipper`] ties the pieces together: on [`BlockShipper::init`] it
//! checks the destination, reconciles the backlog, attaches the directory
//! watcher and starts the uploader. Without a destination it stays inert so
//! hosts can run the same way whether or not archiving is enabled.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use notify::RecommendedWatcher;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio::task::{JoinHandle, spawn_blocking};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::block::{BlockNaming, BlockNumber};
use crate::error::{Result, ShipperError};
use crate::store::{Destination, ObjectStore, S3Options};

pub mod reconcile;
pub mod state;
pub mod uploader;
pub(crate) mod watcher;

pub use reconcile::{reconcile, remote_cursor, scan_directory};
pub use state::{Backlog, Offer, PendingQueue, StateSnapshot, next_expected};
pub use uploader::TickOutcome;

use state::ShipperState;

/// Default uploader cadence.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Consecutive stalled ticks between "missing block" warnings.
pub const DEFAULT_STALL_WARN_TICKS: u64 = 10;

const WATCH_CHANNEL_CAPACITY: usize = 1024;

/// Callbacks fired as files move through the shipper.
///
/// Both hooks run on shipper tasks and must not block.
pub trait FileObserver: Send + Sync {
    /// A block file was newly queued for upload. Fires exactly once per
    /// queued path, never for temporary files or duplicates.
    fn on_file(&self, path: &Path);

    /// A block was uploaded and the cursor advanced to it.
    fn on_uploaded(&self, _block: BlockNumber, _path: &Path) {}
}

impl<F> FileObserver for F
where
    F: Fn(&Path) + Send + Sync,
{
    fn on_file(&self, path: &Path) {
        self(path)
    }
}

/// Runtime configuration for a [`BlockShipper`].
#[derive(Clone)]
pub struct ShipperConfig {
    /// `None` leaves the shipper inert.
    pub destination: Option<Destination>,
    pub source_directory: PathBuf,
    pub file_observers: Vec<Arc<dyn FileObserver>>,
    pub poll_interval: Duration,
    pub stall_warn_ticks: u64,
    pub naming: BlockNaming,
    /// Descend into subdirectories of `source_directory`.
    pub recursive: bool,
}

impl fmt::Debug for ShipperConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShipperConfig")
            .field("destination", &self.destination)
            .field("source_directory", &self.source_directory)
            .field("file_observers", &self.file_observers.len())
            .field("poll_interval", &self.poll_interval)
            .field("stall_warn_ticks", &self.stall_warn_ticks)
            .field("naming", &self.naming)
            .field("recursive", &self.recursive)
            .finish()
    }
}

impl ShipperConfig {
    pub fn new(destination: Option<Destination>, source_directory: impl Into<PathBuf>) -> Self {
        Self {
            destination,
            source_directory: source_directory.into(),
            file_observers: Vec::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            stall_warn_ticks: DEFAULT_STALL_WARN_TICKS,
            naming: BlockNaming::default(),
            recursive: false,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn FileObserver>) -> Self {
        self.file_observers.push(observer);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_stall_warn_ticks(mut self, ticks: u64) -> Self {
        self.stall_warn_ticks = ticks;
        self
    }

    pub fn with_naming(mut self, naming: BlockNaming) -> Self {
        self.naming = naming;
        self
    }

    pub fn with_recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(ShipperError::InvalidConfig(
                "poll interval must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// State shared between the lifecycle controller, the watch loop and the
/// uploader.
pub(crate) struct ShipperInner {
    pub(crate) naming: BlockNaming,
    pub(crate) directory: PathBuf,
    pub(crate) recursive: bool,
    pub(crate) store: Arc<dyn ObjectStore>,
    pub(crate) state: AsyncMutex<ShipperState>,
    /// Held for a whole uploader step so the periodic loop and manual
    /// ticks never upload concurrently.
    pub(crate) upload_guard: AsyncMutex<()>,
    pub(crate) observers: Vec<Arc<dyn FileObserver>>,
    pub(crate) poll_interval: Duration,
    pub(crate) stall_warn_ticks: u64,
}

impl ShipperInner {
    pub(crate) fn notify_queued(&self, path: &Path) {
        for observer in &self.observers {
            observer.on_file(path);
        }
    }

    pub(crate) fn notify_uploaded(&self, block: BlockNumber, path: &Path) {
        for observer in &self.observers {
            observer.on_uploaded(block, path);
        }
    }
}

/// Status report for hosts and operators.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ShipperStatus {
    pub enabled: bool,
    pub active: bool,
    pub destination: Option<String>,
    #[serde(flatten)]
    pub state: StateSnapshot,
}

/// Ships block files from a directory to an object store in strict order.
pub struct BlockShipper {
    config: ShipperConfig,
    store: Option<Arc<dyn ObjectStore>>,
    inner: OnceLock<Arc<ShipperInner>>,
    /// Claimed by the first `init` before any I/O; released only if that
    /// activation fails.
    starting: AtomicBool,
    watcher: Mutex<Option<RecommendedWatcher>>,
    shutdown_token: CancellationToken,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl fmt::Debug for BlockShipper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let task_count = self
            .task_handles
            .try_lock()
            .map(|handles| handles.len())
            .unwrap_or_default();
        f.debug_struct("BlockShipper")
            .field("config", &self.config)
            .field("has_store", &self.store.is_some())
            .field("initialised", &self.inner.get().is_some())
            .field("task_count", &task_count)
            .field("shutdown_cancelled", &self.shutdown_token.is_cancelled())
            .finish()
    }
}

impl BlockShipper {
    /// Shipper writing to an already constructed store.
    pub fn new(config: ShipperConfig, store: Arc<dyn ObjectStore>) -> Self {
        Self::build(config, Some(store))
    }

    /// Shipper whose store is built from `config.destination`.
    pub async fn open(config: ShipperConfig, s3: &S3Options) -> Self {
        let store = match config.destination.as_ref() {
            Some(destination) => Some(destination.open(s3).await),
            None => None,
        };
        Self::build(config, store)
    }

    fn build(config: ShipperConfig, store: Option<Arc<dyn ObjectStore>>) -> Self {
        Self {
            config,
            store,
            inner: OnceLock::new(),
            starting: AtomicBool::new(false),
            watcher: Mutex::new(None),
            shutdown_token: CancellationToken::new(),
            task_handles: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &ShipperConfig {
        &self.config
    }

    /// Whether a destination is configured.
    pub fn is_enabled(&self) -> bool {
        self.config.destination.is_some() && self.store.is_some()
    }

    /// Whether `init` succeeded and `stop` has not been called.
    pub fn is_active(&self) -> bool {
        self.inner.get().is_some() && !self.shutdown_token.is_cancelled()
    }

    /// Activate the shipper. Activation errors are returned here and leave
    /// nothing running; steady-state failures are only logged.
    pub async fn init(&self) -> Result<()> {
        let (Some(destination), Some(store)) = (self.config.destination.as_ref(), self.store.as_ref())
        else {
            info!(target: "blocklog::shipper", "no destination configured; block shipping disabled");
            return Ok(());
        };

        if self
            .starting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ShipperError::InvalidConfig(
                "shipper already initialised".into(),
            ));
        }

        let started = self.start(destination, store).await;
        if started.is_err() && self.inner.get().is_none() {
            self.starting.store(false, Ordering::Release);
        }
        started
    }

    async fn start(&self, destination: &Destination, store: &Arc<dyn ObjectStore>) -> Result<()> {
        if self.shutdown_token.is_cancelled() {
            return Err(ShipperError::InvalidConfig(
                "shipper has been stopped".into(),
            ));
        }
        self.config.validate()?;
        let stall_warn_ticks = self.config.stall_warn_ticks.max(1);

        store
            .exists()
            .await
            .map_err(|source| ShipperError::DestinationUnavailable {
                destination: destination.to_string(),
                source,
            })?;

        let directory = self.config.source_directory.clone();
        let backlog = reconcile(
            store.as_ref(),
            &self.config.naming,
            &directory,
            self.config.recursive,
        )
        .await?;

        let inner = Arc::new(ShipperInner {
            naming: self.config.naming.clone(),
            directory: directory.clone(),
            recursive: self.config.recursive,
            store: Arc::clone(store),
            state: AsyncMutex::new(ShipperState::new(backlog)),
            upload_guard: AsyncMutex::new(()),
            observers: self.config.file_observers.clone(),
            poll_interval: self.config.poll_interval,
            stall_warn_ticks,
        });

        let (tx, rx) = mpsc::channel(WATCH_CHANNEL_CAPACITY);
        let recursive = self.config.recursive;
        let watcher_dir = directory.clone();
        let watcher = spawn_blocking(move || watcher::init_watcher(watcher_dir, recursive, tx))
            .await
            .map_err(|join_err| ShipperError::Watch {
                path: directory.clone(),
                message: format!("watcher initialization panicked: {join_err}"),
            })??;
        *self.watcher.lock() = Some(watcher);

        let watch_task =
            watcher::spawn_watch_loop(Arc::clone(&inner), rx, self.shutdown_token.clone());
        self.task_handles.lock().push(watch_task);

        // Files that landed between the backlog scan and the subscription.
        let caught_up = match watcher::sweep(&inner).await {
            Ok(caught_up) => caught_up,
            Err(err) => {
                self.stop();
                return Err(err);
            }
        };

        let upload_task =
            uploader::spawn_upload_loop(Arc::clone(&inner), self.shutdown_token.clone());
        self.task_handles.lock().push(upload_task);

        let snapshot = inner.state.lock().await.snapshot();
        if self.inner.set(inner).is_err() {
            self.stop();
            return Err(ShipperError::InvalidConfig(
                "shipper already initialised".into(),
            ));
        }

        info!(
            target: "blocklog::shipper",
            destination = %destination,
            directory = %directory.display(),
            cursor = ?snapshot.current_block.map(BlockNumber::get),
            pending = snapshot.pending,
            caught_up,
            "block shipper started"
        );
        Ok(())
    }

    /// Stop the watcher and let the uploader exit after its current tick.
    /// Safe to call more than once, or on an inert shipper.
    pub fn stop(&self) {
        if self.shutdown_token.is_cancelled() {
            return;
        }
        self.shutdown_token.cancel();

        // Dropping the watcher ends the notify subscription.
        if self.watcher.lock().take().is_some() {
            info!(target: "blocklog::shipper", "block shipper stopped");
        }
    }

    /// [`stop`](Self::stop), then wait for the background tasks to finish.
    pub async fn shutdown(&self) {
        self.stop();
        let handles: Vec<_> = self.task_handles.lock().drain(..).collect();
        for handle in handles {
            if let Err(err) = handle.await {
                warn!(target: "blocklog::shipper", error = %err, "shipper task ended abnormally");
            }
        }
    }

    /// Highest block confirmed uploaded; `None` before anything is known to
    /// be in the store.
    pub async fn current_block(&self) -> Option<BlockNumber> {
        match self.inner.get() {
            Some(inner) => inner.state.lock().await.cursor(),
            None => None,
        }
    }

    /// Pending file paths, ascending by block number.
    pub async fn pending_queue(&self) -> Vec<PathBuf> {
        match self.inner.get() {
            Some(inner) => inner.state.lock().await.pending().paths(),
            None => Vec::new(),
        }
    }

    pub async fn status(&self) -> ShipperStatus {
        let state = match self.inner.get() {
            Some(inner) => inner.state.lock().await.snapshot(),
            None => StateSnapshot::default(),
        };
        ShipperStatus {
            enabled: self.is_enabled(),
            active: self.is_active(),
            destination: self.config.destination.as_ref().map(ToString::to_string),
            state,
        }
    }

    /// Run one uploader step immediately, outside the periodic loop.
    /// Returns `None` when the shipper is not active.
    pub async fn tick(&self) -> Option<TickOutcome> {
        if !self.is_active() {
            return None;
        }
        let inner = self.inner.get()?;
        Some(uploader::upload_tick(inner).await)
    }
}

impl Drop for BlockShipper {
    fn drop(&mut self) {
        self.shutdown_token.cancel();
    }
}
