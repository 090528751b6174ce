//! Sequential uploader.
//!
//! One task, one upload at a time. Each tick looks at the lowest pending
//! block and uploads it only when it is exactly the block after the cursor;
//! a gap stalls the pipeline until the missing file shows up. Failed
//! uploads leave the queue untouched and are retried on the next tick.

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::block::BlockNumber;
use crate::store::{ObjectStore, StoreError};

use super::ShipperInner;

/// What a single uploader tick did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing pending.
    Idle,
    /// The head was uploaded and the cursor moved to it.
    Uploaded(BlockNumber),
    /// The head is not the next expected block. `warned` is set on the
    /// ticks that logged the missing block.
    Stalled {
        missing: Option<BlockNumber>,
        head: BlockNumber,
        ticks: u64,
        warned: bool,
    },
    /// Uploading the head failed; it stays queued.
    Failed { block: BlockNumber, attempts: u32 },
}

pub(crate) fn spawn_upload_loop(
    inner: Arc<ShipperInner>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        // First tick one interval after start, not immediately.
        let mut ticker = interval_at(Instant::now() + inner.poll_interval, inner.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!(target: "blocklog::uploader", "uploader shutting down");
                    break;
                }
                _ = ticker.tick() => {}
            }

            // Cancellation is only observed between ticks; an upload that
            // has started runs to completion.
            upload_tick(&inner).await;
        }
    })
}

pub(crate) async fn upload_tick(inner: &ShipperInner) -> TickOutcome {
    let _serial = inner.upload_guard.lock().await;

    let (head, path) = {
        let mut state = inner.state.lock().await;
        let Some((head, path)) = state
            .pending()
            .head()
            .map(|(head, path)| (head, path.to_path_buf()))
        else {
            return TickOutcome::Idle;
        };

        let expected = state.next_expected();
        if expected != Some(head) {
            let ticks = state.record_stall();
            drop(state);

            let warned = ticks % inner.stall_warn_ticks == 0;
            if warned {
                warn!(
                    target: "blocklog::uploader",
                    missing = ?expected.map(BlockNumber::get),
                    head = %head,
                    ticks,
                    "uploads stalled waiting for missing block"
                );
            }
            return TickOutcome::Stalled {
                missing: expected,
                head,
                ticks,
                warned,
            };
        }

        (head, path)
    };

    let key = inner.naming.encode(head);
    match upload_file(inner.store.as_ref(), &path, &key).await {
        Ok(()) => {
            let committed = inner.state.lock().await.record_upload(head);
            match committed {
                Some(path) => {
                    info!(
                        target: "blocklog::uploader",
                        block = %head,
                        path = %path.display(),
                        "uploaded block"
                    );
                    inner.notify_uploaded(head, &path);
                    TickOutcome::Uploaded(head)
                }
                None => {
                    // Only reachable if the queue changed while the upload
                    // guard was held, which nothing else does.
                    warn!(target: "blocklog::uploader", block = %head, "upload finished but queue head moved");
                    TickOutcome::Idle
                }
            }
        }
        Err(err) => {
            let attempts = inner.state.lock().await.record_failure();
            warn!(
                target: "blocklog::uploader",
                block = %head,
                path = %path.display(),
                attempts,
                error = %err,
                "block upload failed; retrying next tick"
            );
            TickOutcome::Failed {
                block: head,
                attempts,
            }
        }
    }
}

async fn upload_file(
    store: &dyn ObjectStore,
    path: &Path,
    key: &str,
) -> Result<(), StoreError> {
    let body = tokio::fs::read(path).await?;
    store.put_object(key, Bytes::from(body)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockNaming;
    use crate::shipper::state::{Backlog, ShipperState};
    use crate::store::{MemoryStore, MockObjectStore};
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::{TempDir, tempdir};

    fn write_blocks(dir: &TempDir, numbers: &[u64]) -> Vec<(BlockNumber, PathBuf)> {
        let naming = BlockNaming::default();
        numbers
            .iter()
            .map(|n| {
                let path = dir.path().join(naming.encode(BlockNumber(*n)));
                std::fs::write(&path, format!("block {n}")).unwrap();
                (BlockNumber(*n), path)
            })
            .collect()
    }

    fn inner_with(
        store: Arc<dyn ObjectStore>,
        dir: &TempDir,
        cursor: Option<BlockNumber>,
        files: Vec<(BlockNumber, PathBuf)>,
    ) -> ShipperInner {
        let mut backlog = Backlog::new(cursor);
        for (number, path) in files {
            backlog.offer(number, path);
        }
        ShipperInner {
            naming: BlockNaming::default(),
            directory: dir.path().to_path_buf(),
            recursive: false,
            store,
            state: tokio::sync::Mutex::new(ShipperState::new(backlog)),
            upload_guard: tokio::sync::Mutex::new(()),
            observers: Vec::new(),
            poll_interval: Duration::from_millis(10),
            stall_warn_ticks: 3,
        }
    }

    #[tokio::test]
    async fn uploads_in_order_and_advances_cursor() {
        let dir = tempdir().unwrap();
        let files = write_blocks(&dir, &[0, 1, 2]);
        let store = Arc::new(MemoryStore::new());
        let inner = inner_with(store.clone(), &dir, None, files);

        for expected in 0..3 {
            assert_eq!(
                upload_tick(&inner).await,
                TickOutcome::Uploaded(BlockNumber(expected))
            );
        }
        assert_eq!(upload_tick(&inner).await, TickOutcome::Idle);

        let naming = BlockNaming::default();
        let expected_keys: Vec<String> =
            (0..3).map(|n| naming.encode(BlockNumber(n))).collect();
        assert_eq!(store.put_log(), expected_keys);
        assert_eq!(
            store.object(&expected_keys[1]).unwrap(),
            Bytes::from_static(b"block 1")
        );
        assert_eq!(inner.state.lock().await.cursor(), Some(BlockNumber(2)));
    }

    #[tokio::test]
    async fn gap_stalls_without_uploading() {
        let dir = tempdir().unwrap();
        let files = write_blocks(&dir, &[1]);
        let mut store = MockObjectStore::new();
        store.expect_put_object().never();
        let inner = inner_with(Arc::new(store), &dir, None, files);

        for tick in 1..=5 {
            assert_eq!(
                upload_tick(&inner).await,
                TickOutcome::Stalled {
                    missing: Some(BlockNumber(0)),
                    head: BlockNumber(1),
                    ticks: tick,
                    warned: tick == 3,
                }
            );
        }
        assert_eq!(inner.state.lock().await.cursor(), None);
    }

    #[tokio::test]
    async fn stall_warning_repeats_every_configured_ticks() {
        let dir = tempdir().unwrap();
        let files = write_blocks(&dir, &[7]);
        let inner = inner_with(
            Arc::new(MemoryStore::new()),
            &dir,
            Some(BlockNumber(4)),
            files,
        );

        let mut warned_at = Vec::new();
        for _ in 0..9 {
            match upload_tick(&inner).await {
                TickOutcome::Stalled {
                    missing,
                    ticks,
                    warned,
                    ..
                } => {
                    assert_eq!(missing, Some(BlockNumber(5)));
                    if warned {
                        warned_at.push(ticks);
                    }
                }
                other => panic!("expected a stall, got {other:?}"),
            }
        }
        assert_eq!(warned_at, vec![3, 6, 9]);
    }

    #[tokio::test]
    async fn failed_upload_keeps_head_and_retries() {
        let dir = tempdir().unwrap();
        let files = write_blocks(&dir, &[5]);
        let mut store = MockObjectStore::new();
        let mut seq = mockall::Sequence::new();
        store
            .expect_put_object()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(StoreError::backend("put_object", "connection reset")));
        store
            .expect_put_object()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        let inner = inner_with(Arc::new(store), &dir, Some(BlockNumber(4)), files);

        assert_eq!(
            upload_tick(&inner).await,
            TickOutcome::Failed {
                block: BlockNumber(5),
                attempts: 1
            }
        );
        assert_eq!(
            upload_tick(&inner).await,
            TickOutcome::Failed {
                block: BlockNumber(5),
                attempts: 2
            }
        );
        assert_eq!(inner.state.lock().await.cursor(), Some(BlockNumber(4)));
        assert_eq!(inner.state.lock().await.pending().len(), 1);

        assert_eq!(
            upload_tick(&inner).await,
            TickOutcome::Uploaded(BlockNumber(5))
        );
        let snapshot = inner.state.lock().await.snapshot();
        assert_eq!(snapshot.current_block, Some(BlockNumber(5)));
        assert_eq!(snapshot.failed_attempts, 0);
        assert_eq!(snapshot.pending, 0);
    }

    #[tokio::test]
    async fn vanished_file_counts_as_failure() {
        let dir = tempdir().unwrap();
        let files = write_blocks(&dir, &[0]);
        std::fs::remove_file(&files[0].1).unwrap();
        let store = Arc::new(MemoryStore::new());
        let inner = inner_with(store.clone(), &dir, None, files);

        assert!(matches!(
            upload_tick(&inner).await,
            TickOutcome::Failed { attempts: 1, .. }
        ));
        assert!(store.put_log().is_empty());
    }

    #[tokio::test]
    async fn loop_stops_on_cancellation() {
        let dir = tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let inner = Arc::new(inner_with(store, &dir, None, Vec::new()));
        let token = CancellationToken::new();

        let handle = spawn_upload_loop(inner, token.clone());
        token.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("uploader did not stop")
            .unwrap();
    }
}
