#![allow(dead_code)]

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use blocklog_core::{
    BlockNaming, BlockNumber, BlockShipper, DEFAULT_TEMP_MARKER, Destination, FileObserver,
    ListPage, MemoryStore, ObjectStore, ShipperConfig, StoreError,
};
use bytes::Bytes;
use parking_lot::Mutex;
use tempfile::TempDir;

pub const TICK: Duration = Duration::from_millis(20);
pub const WAIT: Duration = Duration::from_secs(10);

/// Observer that records every callback.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    queued: Mutex<Vec<PathBuf>>,
    uploaded: Mutex<Vec<BlockNumber>>,
}

impl RecordingObserver {
    pub fn queued(&self) -> Vec<PathBuf> {
        self.queued.lock().clone()
    }

    pub fn uploaded(&self) -> Vec<BlockNumber> {
        self.uploaded.lock().clone()
    }
}

impl FileObserver for RecordingObserver {
    fn on_file(&self, path: &Path) {
        self.queued.lock().push(path.to_path_buf());
    }

    fn on_uploaded(&self, block: BlockNumber, _path: &Path) {
        self.uploaded.lock().push(block);
    }
}

/// Memory store whose puts take `delay` and that tracks how many puts
/// overlapped.
#[derive(Debug)]
pub struct SlowStore {
    pub inner: MemoryStore,
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl SlowStore {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: MemoryStore::new(),
            delay,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for SlowStore {
    async fn exists(&self) -> Result<(), StoreError> {
        self.inner.exists().await
    }

    async fn list_objects(&self, continuation: Option<String>) -> Result<ListPage, StoreError> {
        self.inner.list_objects(continuation).await
    }

    async fn put_object(&self, key: &str, body: Bytes) -> Result<(), StoreError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        let result = self.inner.put_object(key, body).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

pub fn key(n: u64) -> String {
    BlockNaming::default().encode(BlockNumber(n))
}

pub fn block_path(dir: &Path, n: u64) -> PathBuf {
    dir.join(key(n))
}

/// Write a block the way producers do: through the temp name, then rename.
pub fn produce_block(dir: &Path, n: u64) -> PathBuf {
    let temp = dir.join(DEFAULT_TEMP_MARKER);
    std::fs::write(&temp, format!("block {n}")).unwrap();
    let target = block_path(dir, n);
    std::fs::rename(&temp, &target).unwrap();
    target
}

/// Write a block directly under its final name.
pub fn write_block(dir: &Path, n: u64) -> PathBuf {
    let target = block_path(dir, n);
    std::fs::write(&target, format!("block {n}")).unwrap();
    target
}

pub fn config(dir: &TempDir) -> ShipperConfig {
    ShipperConfig::new(
        Some(Destination::Memory("test".into())),
        dir.path(),
    )
    .with_poll_interval(TICK)
    .with_stall_warn_ticks(3)
}

pub struct Harness {
    pub dir: TempDir,
    pub store: Arc<MemoryStore>,
    pub observer: Arc<RecordingObserver>,
    pub shipper: BlockShipper,
}

impl Harness {
    pub fn new(dir: TempDir, store: MemoryStore) -> Self {
        let store = Arc::new(store);
        let observer = Arc::new(RecordingObserver::default());
        let config = config(&dir).with_observer(observer.clone());
        let shipper = BlockShipper::new(config, store.clone());
        Self {
            dir,
            store,
            observer,
            shipper,
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub async fn wait_for_cursor(&self, target: u64) {
        let shipper = &self.shipper;
        wait_until(|| async move { shipper.current_block().await == Some(BlockNumber(target)) })
            .await;
    }
}

/// Poll `condition` until it holds, panicking after [`WAIT`].
pub async fn wait_until<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        if condition().await {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached within {WAIT:?}"
        );
        tokio::time::sleep(TICK).await;
    }
}
