//! Error types for dirmon
//!
//! Only registration-time and removal-time failures reach the caller.
//! Transient backend conditions are absorbed and logged where they happen.

use std::path::PathBuf;
use thiserror::Error;

use crate::watcher::WatchId;

/// Result type alias for dirmon operations
pub type DirmonResult<T> = Result<T, DirmonError>;

/// Main error type for dirmon operations
#[derive(Error, Debug)]
pub enum DirmonError {
    /// The watch table is full
    #[error("cannot watch more than {max} directories at once")]
    CapacityExceeded { max: usize },

    /// Root directory was given as an empty string
    #[error("watch root must not be empty")]
    EmptyRoot,

    /// Root directory is missing, unreadable or otherwise not watchable
    #[error("could not open/read directory {path}: {reason}")]
    InvalidRoot { path: PathBuf, reason: String },

    /// The platform backend could not arm notifications
    #[error("failed to register native watch on {path}: {source}")]
    Backend {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The id does not name a live watch
    #[error("unknown watch id {id}")]
    UnknownWatch { id: WatchId },

    /// Subdirectory does not exist or is not a directory
    #[error("watch directory '{path}' is not valid")]
    InvalidSubdir { path: String },

    /// Subdirectory is already part of the watch
    #[error("directory '{path}' is already watched")]
    DuplicateSubdir { path: String },

    /// Subdirectory is not part of the watch
    #[error("directory '{path}' is not watched")]
    SubdirNotWatched { path: String },

    /// Operation has no implementation on this platform
    #[error("{operation} is not supported on this platform")]
    Unsupported { operation: &'static str },

    /// Configuration file could not be parsed
    #[error("invalid configuration in {file}: {message}")]
    Config { file: PathBuf, message: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The background poller thread could not be started
    #[error("failed to spawn poller thread: {0}")]
    Spawn(#[source] std::io::Error),
}
