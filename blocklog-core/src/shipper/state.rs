//! Pending queue and upload cursor.
//!
//! Both live in one [`ShipperState`] behind a single lock owned by the
//! shipper; the watch loop only adds to the queue and the uploader is the
//! only code that removes from it or moves the cursor.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::block::BlockNumber;

/// Block files known locally but not yet confirmed uploaded, ordered by
/// block number. Holds at most one path per number and never the same
/// path twice.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PendingQueue {
    entries: BTreeMap<BlockNumber, PathBuf>,
}

/// Result of offering a path to the queue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Offer {
    /// Newly queued.
    Accepted,
    /// The same path is already queued.
    AlreadyQueued,
    /// The block number is at or below the upload cursor.
    AlreadyUploaded,
    /// A different path already carries this block number.
    Conflict { existing: PathBuf },
}

impl PendingQueue {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Lowest-numbered pending block.
    pub fn head(&self) -> Option<(BlockNumber, &Path)> {
        self.entries
            .first_key_value()
            .map(|(number, path)| (*number, path.as_path()))
    }

    pub fn contains_path(&self, path: &Path) -> bool {
        self.entries.values().any(|queued| queued == path)
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.entries.values().cloned().collect()
    }

    pub fn numbers(&self) -> Vec<BlockNumber> {
        self.entries.keys().copied().collect()
    }

    fn insert(&mut self, number: BlockNumber, path: PathBuf) -> Offer {
        if let Some(existing) = self.entries.get(&number) {
            return if *existing == path {
                Offer::AlreadyQueued
            } else {
                Offer::Conflict {
                    existing: existing.clone(),
                }
            };
        }
        if self.contains_path(&path) {
            return Offer::AlreadyQueued;
        }
        self.entries.insert(number, path);
        Offer::Accepted
    }

    fn pop_head(&mut self) -> Option<(BlockNumber, PathBuf)> {
        self.entries.pop_first()
    }
}

/// Pending queue plus cursor, as produced by reconciliation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Backlog {
    /// Highest block already present remotely.
    pub cursor: Option<BlockNumber>,
    pub pending: PendingQueue,
}

impl Backlog {
    pub fn new(cursor: Option<BlockNumber>) -> Self {
        Self {
            cursor,
            pending: PendingQueue::default(),
        }
    }

    /// Queue `path` unless it is at or below the cursor or already known.
    pub fn offer(&mut self, number: BlockNumber, path: PathBuf) -> Offer {
        if self.cursor.is_some_and(|cursor| number <= cursor) {
            return Offer::AlreadyUploaded;
        }
        self.pending.insert(number, path)
    }
}

/// Block that must be uploaded next given `cursor`. `None` only when the
/// cursor already sits at `u64::MAX`.
pub fn next_expected(cursor: Option<BlockNumber>) -> Option<BlockNumber> {
    match cursor {
        None => Some(BlockNumber::ZERO),
        Some(cursor) => cursor.next(),
    }
}

#[derive(Debug)]
pub(crate) struct ShipperState {
    backlog: Backlog,
    stalled_ticks: u64,
    failed_attempts: u32,
    uploaded_total: u64,
}

impl ShipperState {
    pub(crate) fn new(backlog: Backlog) -> Self {
        Self {
            backlog,
            stalled_ticks: 0,
            failed_attempts: 0,
            uploaded_total: 0,
        }
    }

    pub(crate) fn cursor(&self) -> Option<BlockNumber> {
        self.backlog.cursor
    }

    pub(crate) fn pending(&self) -> &PendingQueue {
        &self.backlog.pending
    }

    pub(crate) fn next_expected(&self) -> Option<BlockNumber> {
        next_expected(self.backlog.cursor)
    }

    pub(crate) fn offer(&mut self, number: BlockNumber, path: PathBuf) -> Offer {
        self.backlog.offer(number, path)
    }

    /// Commit a finished upload. Only the queue head, when it is exactly
    /// the next expected block, can be committed; anything else leaves the
    /// state untouched and returns `None`.
    pub(crate) fn record_upload(&mut self, number: BlockNumber) -> Option<PathBuf> {
        let head = self.backlog.pending.head().map(|(head, _)| head);
        if head != Some(number) || self.next_expected() != Some(number) {
            return None;
        }

        let (_, path) = self.backlog.pending.pop_head()?;
        self.backlog.cursor = Some(number);
        self.stalled_ticks = 0;
        self.failed_attempts = 0;
        self.uploaded_total += 1;
        Some(path)
    }

    pub(crate) fn record_stall(&mut self) -> u64 {
        self.stalled_ticks += 1;
        self.stalled_ticks
    }

    pub(crate) fn record_failure(&mut self) -> u32 {
        self.failed_attempts = self.failed_attempts.saturating_add(1);
        self.failed_attempts
    }

    pub(crate) fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            current_block: self.backlog.cursor,
            next_expected: self.next_expected(),
            pending: self.backlog.pending.len(),
            pending_head: self.backlog.pending.head().map(|(head, _)| head),
            stalled_ticks: self.stalled_ticks,
            failed_attempts: self.failed_attempts,
            uploaded_total: self.uploaded_total,
        }
    }
}

/// Point-in-time view of the queue and cursor.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StateSnapshot {
    pub current_block: Option<BlockNumber>,
    pub next_expected: Option<BlockNumber>,
    pub pending: usize,
    pub pending_head: Option<BlockNumber>,
    /// Consecutive ticks the head was not the next expected block.
    pub stalled_ticks: u64,
    /// Consecutive failed attempts to upload the head.
    pub failed_attempts: u32,
    /// Uploads committed since the shipper started.
    pub uploaded_total: u64,
}
