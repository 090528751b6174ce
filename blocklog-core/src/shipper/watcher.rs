//! Directory watcher feeding the pending queue.
//!
//! A thin wrapper around `notify`: raw notifications are pushed through a
//! bounded channel into a single watch-loop task, which admits block files
//! into the queue and fires the file observers. Watcher errors and overflow
//! notifications fall back to a full directory rescan through the same
//! admission path, so duplicates are absorbed by the queue.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use notify::event::{CreateKind, EventKind, ModifyKind, RenameMode};
use notify::{Config as NotifyConfig, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::block::PathClass;
use crate::error::{Result, ShipperError};

use super::ShipperInner;
use super::reconcile::scan_directory;
use super::state::Offer;

pub(crate) enum WatchMessage {
    Event(Event),
    Error(String),
}

impl fmt::Debug for WatchMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatchMessage::Event(event) => f
                .debug_struct("WatchMessage::Event")
                .field("kind", &event.kind)
                .field("path_count", &event.paths.len())
                .finish(),
            WatchMessage::Error(message) => f
                .debug_struct("WatchMessage::Error")
                .field("message", message)
                .finish(),
        }
    }
}

/// What a raw notification asks the watch loop to do.
#[derive(Debug, PartialEq, Eq)]
enum Candidates {
    Paths(Vec<PathBuf>),
    Rescan,
    Ignore,
}

fn candidates(event: &Event, recursive: bool) -> Candidates {
    if event.need_rescan() {
        return Candidates::Rescan;
    }

    match &event.kind {
        // Files may land in a fresh subdirectory before notify watches it.
        EventKind::Create(CreateKind::Folder) if recursive => Candidates::Rescan,
        EventKind::Create(CreateKind::Folder) => Candidates::Ignore,
        EventKind::Create(_) => Candidates::Paths(event.paths.clone()),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            Candidates::Paths(event.paths.iter().take(1).cloned().collect())
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let target = event.paths.get(1).or(event.paths.first());
            Candidates::Paths(target.cloned().into_iter().collect())
        }
        // Backends that cannot tell the two sides apart; admission checks
        // which of them still exists.
        EventKind::Modify(ModifyKind::Name(RenameMode::Any)) => {
            Candidates::Paths(event.paths.clone())
        }
        EventKind::Other => Candidates::Rescan,
        _ => Candidates::Ignore,
    }
}

/// Subscribe to `directory`. Dropping the returned watcher ends the
/// subscription and closes the channel.
pub(crate) fn init_watcher(
    directory: PathBuf,
    recursive: bool,
    tx: mpsc::Sender<WatchMessage>,
) -> Result<RecommendedWatcher> {
    let path_clone = directory.clone();
    let mut watcher = RecommendedWatcher::new(
        move |res: std::result::Result<Event, notify::Error>| match res {
            Ok(event) => {
                if let Err(err) = tx.blocking_send(WatchMessage::Event(event)) {
                    warn!(
                        target: "blocklog::watcher",
                        "watch channel send failed for {}: {}",
                        path_clone.display(),
                        err
                    );
                }
            }
            Err(err) => {
                let _ = tx.blocking_send(WatchMessage::Error(err.to_string()));
            }
        },
        NotifyConfig::default(),
    )
    .map_err(|err| ShipperError::Watch {
        path: directory.clone(),
        message: format!("failed to create watcher: {err}"),
    })?;

    let mode = if recursive {
        RecursiveMode::Recursive
    } else {
        RecursiveMode::NonRecursive
    };
    watcher
        .watch(&directory, mode)
        .map_err(|err| ShipperError::Watch {
            path: directory.clone(),
            message: err.to_string(),
        })?;

    Ok(watcher)
}

pub(crate) fn spawn_watch_loop(
    inner: Arc<ShipperInner>,
    mut rx: mpsc::Receiver<WatchMessage>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                _ = shutdown.cancelled() => break,
                msg = rx.recv() => msg,
            };

            let Some(msg) = msg else {
                break;
            };

            match msg {
                WatchMessage::Event(event) => match candidates(&event, inner.recursive) {
                    Candidates::Paths(paths) => {
                        for path in paths {
                            admit(&inner, path).await;
                        }
                    }
                    Candidates::Rescan => rescan(&inner, "overflow").await,
                    Candidates::Ignore => {
                        trace!(target: "blocklog::watcher", kind = ?event.kind, "ignoring event");
                    }
                },
                WatchMessage::Error(error) => {
                    warn!(target: "blocklog::watcher", error = %error, "watcher reported an error; rescanning");
                    rescan(&inner, "watcher error").await;
                }
            }
        }

        debug!(target: "blocklog::watcher", "watch loop exiting");
    })
}

/// Offer one path to the queue. Returns true when it was newly queued, in
/// which case every observer has been called with it.
pub(crate) async fn admit(inner: &ShipperInner, path: PathBuf) -> bool {
    let number = match inner.naming.classify(&path) {
        PathClass::Block(number) => number,
        PathClass::Temporary => {
            trace!(target: "blocklog::watcher", path = %path.display(), "ignoring temporary file");
            return false;
        }
        PathClass::Foreign => return false,
    };

    // Rename sources, directories and files already removed by retention.
    let is_file = tokio::fs::metadata(&path)
        .await
        .map(|metadata| metadata.is_file())
        .unwrap_or(false);
    if !is_file {
        return false;
    }

    let mut state = inner.state.lock().await;
    match state.offer(number, path.clone()) {
        Offer::Accepted => {
            debug!(target: "blocklog::watcher", block = %number, path = %path.display(), "queued block");
            // Observers run before the lock is released so none of them can
            // see the file after the uploader has already taken it.
            inner.notify_queued(&path);
            true
        }
        Offer::AlreadyQueued | Offer::AlreadyUploaded => {
            trace!(target: "blocklog::watcher", block = %number, "block already known");
            false
        }
        Offer::Conflict { existing } => {
            warn!(
                target: "blocklog::watcher",
                block = %number,
                path = %path.display(),
                kept = %existing.display(),
                "another file already carries this block number; ignoring"
            );
            false
        }
    }
}

/// Walk the directory and admit everything found. Returns how many files
/// were newly queued.
pub(crate) async fn sweep(inner: &ShipperInner) -> Result<usize> {
    let files = scan_directory(&inner.naming, &inner.directory, inner.recursive).await?;
    let mut accepted = 0;
    for (_, path) in files {
        if admit(inner, path).await {
            accepted += 1;
        }
    }
    Ok(accepted)
}

async fn rescan(inner: &ShipperInner, reason: &'static str) {
    match sweep(inner).await {
        Ok(accepted) => {
            debug!(target: "blocklog::watcher", reason, accepted, "rescan complete");
        }
        Err(err) => {
            warn!(target: "blocklog::watcher", reason, error = %err, "rescan failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{Flag, RemoveKind};

    fn event(kind: EventKind, paths: &[&str]) -> Event {
        paths
            .iter()
            .fold(Event::new(kind), |event, path| event.add_path(PathBuf::from(path)))
    }

    #[test]
    fn creation_yields_every_path() {
        let ev = event(EventKind::Create(CreateKind::File), &["/d/a", "/d/b"]);
        assert_eq!(
            candidates(&ev, false),
            Candidates::Paths(vec![PathBuf::from("/d/a"), PathBuf::from("/d/b")])
        );
    }

    #[test]
    fn rename_into_place_yields_destination() {
        let both = event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &["/d/tmp-tx-log.bin", "/d/0001"],
        );
        assert_eq!(
            candidates(&both, false),
            Candidates::Paths(vec![PathBuf::from("/d/0001")])
        );

        let to = event(EventKind::Modify(ModifyKind::Name(RenameMode::To)), &["/d/0002"]);
        assert_eq!(
            candidates(&to, false),
            Candidates::Paths(vec![PathBuf::from("/d/0002")])
        );

        let from = event(
            EventKind::Modify(ModifyKind::Name(RenameMode::From)),
            &["/d/tmp-tx-log.bin"],
        );
        assert_eq!(candidates(&from, false), Candidates::Ignore);
    }

    #[test]
    fn overflow_and_rescan_flags_trigger_rescan() {
        assert_eq!(candidates(&Event::new(EventKind::Other), false), Candidates::Rescan);

        let flagged = Event::new(EventKind::Any).set_flag(Flag::Rescan);
        assert_eq!(candidates(&flagged, false), Candidates::Rescan);
    }

    #[test]
    fn new_folders_only_matter_when_recursive() {
        let ev = event(EventKind::Create(CreateKind::Folder), &["/d/sub"]);
        assert_eq!(candidates(&ev, false), Candidates::Ignore);
        assert_eq!(candidates(&ev, true), Candidates::Rescan);
    }

    #[test]
    fn removals_are_ignored() {
        let ev = event(EventKind::Remove(RemoveKind::File), &["/d/0001"]);
        assert_eq!(candidates(&ev, false), Candidates::Ignore);
    }
}
