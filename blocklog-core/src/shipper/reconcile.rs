//! Startup reconciliation between the destination and the block directory.
//!
//! The remote listing decides the cursor: the highest block key already in
//! the store. Every local block file above it becomes pending. A listing
//! failure aborts activation because shipping from an unknown cursor could
//! duplicate or skip blocks.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::block::{BlockNaming, BlockNumber, PathClass};
use crate::error::{Result, ShipperError};
use crate::store::ObjectStore;

use super::state::{Backlog, Offer};

/// Highest block key in the store, paging through the whole listing.
pub async fn remote_cursor(
    store: &dyn ObjectStore,
    naming: &BlockNaming,
) -> Result<Option<BlockNumber>> {
    let mut continuation = None;
    let mut top: Option<BlockNumber> = None;
    let mut pages = 0usize;

    loop {
        let page = store
            .list_objects(continuation)
            .await
            .map_err(ShipperError::Listing)?;
        pages += 1;

        for key in &page.keys {
            match naming.parse(key) {
                Some(number) => top = top.max(Some(number)),
                None => {
                    debug!(target: "blocklog::reconcile", key = %key, "skipping non-block key");
                }
            }
        }

        continuation = page.next_continuation;
        if continuation.is_none() {
            break;
        }
    }

    debug!(target: "blocklog::reconcile", pages, top = ?top, "remote listing complete");
    Ok(top)
}

/// Block files in `directory`, ascending by number. Temporary and foreign
/// files are skipped. Subdirectories are descended only when `recursive`.
pub async fn scan_directory(
    naming: &BlockNaming,
    directory: &Path,
    recursive: bool,
) -> Result<Vec<(BlockNumber, PathBuf)>> {
    let mut found = Vec::new();
    let mut dirs = vec![directory.to_path_buf()];

    while let Some(dir) = dirs.pop() {
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|err| ShipperError::io(&dir, err))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| ShipperError::io(&dir, err))?
        {
            let path = entry.path();
            let metadata = match tokio::fs::metadata(&path).await {
                Ok(metadata) => metadata,
                // Raced with retention or a producer rename.
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => return Err(ShipperError::io(&path, err)),
            };

            if metadata.is_dir() {
                if recursive {
                    dirs.push(path);
                }
                continue;
            }

            match naming.classify(&path) {
                PathClass::Block(number) => found.push((number, path)),
                PathClass::Temporary => {}
                PathClass::Foreign => {
                    debug!(target: "blocklog::reconcile", path = %path.display(), "ignoring non-block file");
                }
            }
        }
    }

    found.sort();
    Ok(found)
}

/// Derive the starting cursor and pending queue.
pub async fn reconcile(
    store: &dyn ObjectStore,
    naming: &BlockNaming,
    directory: &Path,
    recursive: bool,
) -> Result<Backlog> {
    let cursor = remote_cursor(store, naming).await?;
    let files = scan_directory(naming, directory, recursive).await?;

    let mut backlog = Backlog::new(cursor);
    let mut already_uploaded = 0usize;
    for (number, path) in files {
        match backlog.offer(number, path) {
            Offer::Accepted | Offer::AlreadyQueued => {}
            Offer::AlreadyUploaded => already_uploaded += 1,
            Offer::Conflict { existing } => {
                warn!(
                    target: "blocklog::reconcile",
                    block = %number,
                    kept = %existing.display(),
                    "duplicate block number in directory; keeping first path"
                );
            }
        }
    }

    info!(
        target: "blocklog::reconcile",
        cursor = ?cursor.map(BlockNumber::get),
        pending = backlog.pending.len(),
        already_uploaded,
        "reconciled backlog"
    );

    Ok(backlog)
}
