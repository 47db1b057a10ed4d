//! Per-file failure reasons.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("cannot read {path}: {source}")]
    Local {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{operation} gave up after {attempts} attempt(s): {source}")]
    Remote {
        operation: &'static str,
        attempts: u32,
        #[source]
        source: StoreError,
    },

    #[error("verification failed for {key}: {reason}")]
    Verification { key: String, reason: String },

    #[error("failed to build worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

impl SyncError {
    pub fn local(path: impl Into<PathBuf>, source: io::Error) -> Self {
        SyncError::Local {
            path: path.into(),
            source,
        }
    }
}

pub type SyncResult<T> = std::result::Result<T, SyncError>;
