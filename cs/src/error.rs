//! Sync error types

use std::path::PathBuf;
use thiserror::Error;

use castcore::CoreError;

/// Errors raised by the sync engine
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt sync state {path}: {source}")]
    CorruptState {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Unknown codebase: {0}")]
    UnknownCodebase(String),

    #[error("Cast at {0} is locked by another sync")]
    Locked(PathBuf),

    #[error("Prompt failed: {0}")]
    Prompt(String),
}

impl SyncError {
    /// Wrap an IO error with the path it happened at
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
