//! Remote object store seam.
//!
//! The shipper needs three operations from its destination: an existence
//! check, a paginated key listing, and a whole-object put. `ObjectStore`
//! captures exactly that so S3, a local mirror directory, and the
//! in-memory store used by tests are interchangeable.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::error::{Result, ShipperError};

pub mod local;
pub mod memory;
pub mod s3;

pub use local::LocalDirStore;
pub use memory::MemoryStore;
pub use s3::{S3Options, S3Store};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{operation} failed: {message}")]
    Backend {
        operation: &'static str,
        message: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn backend(operation: &'static str, message: impl Into<String>) -> Self {
        StoreError::Backend {
            operation,
            message: message.into(),
        }
    }
}

/// One page of an object listing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListPage {
    pub keys: Vec<String>,
    /// Token for the next page; `None` once the listing is exhausted.
    pub next_continuation: Option<String>,
}

/// Destination bucket operations consumed by the shipper.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fails when the destination does not exist or is not accessible.
    async fn exists(&self) -> std::result::Result<(), StoreError>;

    /// Fetch one page of keys, starting after `continuation` when given.
    async fn list_objects(
        &self,
        continuation: Option<String>,
    ) -> std::result::Result<ListPage, StoreError>;

    /// Write `body` under `key`, overwriting any existing object.
    async fn put_object(
        &self,
        key: &str,
        body: Bytes,
    ) -> std::result::Result<(), StoreError>;
}

/// Where uploaded blocks go.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Destination {
    /// An S3 (or S3-compatible) bucket.
    S3 { bucket: String },
    /// A directory mirroring the bucket layout on local disk.
    LocalDir(PathBuf),
    /// A process-local store, for tests and dry runs.
    Memory(String),
}

impl Destination {
    /// Parse a destination string. Empty input means archiving is disabled.
    ///
    /// Accepted forms: `s3://bucket`, `file:///abs/path`, `memory://name`,
    /// or a bare bucket name.
    pub fn parse(raw: &str) -> Result<Option<Self>> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(None);
        }

        let destination = if let Some(bucket) = raw.strip_prefix("s3://") {
            let bucket = bucket.trim_end_matches('/');
            if bucket.is_empty() || bucket.contains('/') {
                return Err(ShipperError::InvalidConfig(format!(
                    "invalid s3 destination {raw:?}"
                )));
            }
            Destination::S3 {
                bucket: bucket.to_string(),
            }
        } else if let Some(path) = raw.strip_prefix("file://") {
            if path.is_empty() {
                return Err(ShipperError::InvalidConfig(format!(
                    "invalid file destination {raw:?}"
                )));
            }
            Destination::LocalDir(PathBuf::from(path))
        } else if let Some(name) = raw.strip_prefix("memory://") {
            Destination::Memory(name.to_string())
        } else if raw.contains("://") {
            return Err(ShipperError::InvalidConfig(format!(
                "unsupported destination scheme in {raw:?}"
            )));
        } else {
            Destination::S3 {
                bucket: raw.to_string(),
            }
        };

        Ok(Some(destination))
    }

    /// Build the store handle for this destination.
    pub async fn open(&self, s3: &S3Options) -> Arc<dyn ObjectStore> {
        match self {
            Destination::S3 { bucket } => {
                Arc::new(S3Store::connect(bucket.clone(), s3).await)
            }
            Destination::LocalDir(root) => Arc::new(LocalDirStore::new(root)),
            Destination::Memory(_) => Arc::new(MemoryStore::new()),
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::S3 { bucket } => write!(f, "s3://{bucket}"),
            Destination::LocalDir(root) => write!(f, "file://{}", root.display()),
            Destination::Memory(name) => write!(f, "memory://{name}"),
        }
    }
}
