//! dirmon - cross-platform directory change notifications
//!
//! dirmon watches directories (optionally recursively) and delivers a unified
//! stream of CREATE, DELETE, MODIFY and MOVE events to per-watch callbacks
//! running on a background poller thread. Linux uses inotify, Windows uses
//! overlapped `ReadDirectoryChangesW` reads.

mod backend;
pub mod config;
pub mod error;
pub mod path;
pub mod watcher;

// Re-exports for convenience
pub use config::{ConfigWarning, EngineConfig};
pub use error::{DirmonError, DirmonResult};
pub use watcher::{Engine, WatchAction, WatchEvent, WatchFlags, WatchId};
