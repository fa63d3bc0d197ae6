//! Core error types

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while reading or writing cast files, configs and the registry
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid YAML in {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Cast not initialized: {0} not found")]
    NotInitialized(PathBuf),

    #[error("Cast config {path} is missing required field: {field}")]
    MissingField { path: PathBuf, field: &'static str },

    #[error("Could not determine home directory")]
    NoHomeDir,
}

impl CoreError {
    /// Wrap an IO error with the path it happened at
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
