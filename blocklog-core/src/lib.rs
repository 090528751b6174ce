//! # Blocklog Core
//!
//! Ships a growing directory of numbered block files to an object store,
//! strictly in block order.
//!
//! ## Overview
//!
//! A producer writes blocks into a directory, one file per block, named by
//! the block number as a fixed-width zero-padded decimal string. The
//! shipper:
//!
//! - **Reconciles** on startup: the highest block key already in the store
//!   becomes the cursor, and every local block above it is queued
//! - **Watches** the directory for new block files (temporary files written
//!   by the producer are ignored until renamed into place)
//! - **Uploads** one block per tick, and only the block right after the
//!   cursor; gaps stall the pipeline instead of being skipped
//! - **Notifies** registered [`FileObserver`]s once per newly queued file
//!
//! ## Architecture
//!
//! - [`block`]: block numbers and the file naming rules
//! - [`store`]: the [`ObjectStore`] seam and its S3, local directory and
//!   in-memory backends
//! - [`shipper`]: the [`BlockShipper`] lifecycle, pending queue, watcher and
//!   uploader
//!
//! ## Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use blocklog_core::{BlockShipper, Destination, S3Options, ShipperConfig};
//!
//! async fn run() -> blocklog_core::Result<()> {
//!     let destination = Destination::parse("s3://tx-log-archive")?;
//!     let config = ShipperConfig::new(destination, "/var/lib/node/tx-log")
//!         .with_observer(Arc::new(|path: &std::path::Path| {
//!             println!("queued {}", path.display());
//!         }));
//!
//!     let shipper = BlockShipper::open(config, &S3Options::default()).await;
//!     shipper.init().await?;
//!     // ...
//!     shipper.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod block;
pub mod error;
pub mod shipper;
pub mod store;

pub use block::{
    BlockNaming, BlockNumber, DEFAULT_BLOCK_NAME_WIDTH, DEFAULT_TEMP_MARKER, PathClass,
};
pub use error::{Result, ShipperError};
pub use shipper::{
    BlockShipper, DEFAULT_POLL_INTERVAL, DEFAULT_STALL_WARN_TICKS, FileObserver, ShipperConfig,
    ShipperStatus, StateSnapshot, TickOutcome,
};
pub use store::{
    Destination, ListPage, LocalDirStore, MemoryStore, ObjectStore, S3Options, S3Store,
    StoreError,
};
