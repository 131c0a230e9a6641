//! Error types shared by the cache and capture components.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// The resolver could not produce an answer.
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("lookup for {domain} failed: {source}")]
    Lookup {
        domain: String,
        #[source]
        source: io::Error,
    },

    #[error("no addresses found for {0}")]
    NoAddresses(String),

    #[error("resolution failed: {0}")]
    Other(String),
}

/// Lifecycle misuse of a cache manager.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CacheError {
    #[error("eviction loop already started")]
    AlreadyStarted,

    #[error("cache manager has been stopped")]
    Stopped,

    #[error("no tokio runtime available to spawn the eviction loop")]
    NoRuntime,
}

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("failed to remove artifact directory {path}: {source}")]
    RemoveArea {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to create artifact directory {path}: {source}")]
    CreateArea {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to read artifact {path}: {source}")]
    ReadArtifact {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
