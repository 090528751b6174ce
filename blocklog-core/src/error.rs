use std::path::PathBuf;

use thiserror::Error;

use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum ShipperError {
    #[error("destination {destination} non-existent or inaccessible: {source}")]
    DestinationUnavailable {
        destination: String,
        #[source]
        source: StoreError,
    },

    #[error("failed to list uploaded blocks: {0}")]
    Listing(#[source] StoreError),

    #[error("IO error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to watch {}: {message}", path.display())]
    Watch { path: PathBuf, message: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ShipperError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ShipperError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, ShipperError>;
