//! Platform backends
//!
//! Exactly one backend is compiled per target:
//! - Linux: inotify, one kernel descriptor per watched directory
//! - Windows: overlapped `ReadDirectoryChangesW` reads
//! - anything else: a backend that refuses to arm
//!
//! A backend arms native notification for a new watch, decodes readiness
//! into [`Notification`]s, re-arms after dispatch and reconfigures watched
//! subdirectories. Teardown is the `Drop` of the per-watch native value, so
//! handles are released on every exit path.

use std::time::Duration;

use crate::config::EngineConfig;
use crate::error::DirmonResult;
use crate::watcher::event::{Notification, WatchFlags};
use crate::watcher::table::{Watch, WatchTable};

pub(crate) mod change_records;
pub(crate) mod read_cycle;
pub(crate) mod subdirs;

#[cfg(target_os = "linux")]
mod inotify;
#[cfg(windows)]
mod overlapped;
#[cfg(not(any(target_os = "linux", windows)))]
mod unsupported;

#[cfg(target_os = "linux")]
pub(crate) type PlatformBackend = inotify::InotifyBackend;
#[cfg(windows)]
pub(crate) type PlatformBackend = overlapped::OverlappedBackend;
#[cfg(not(any(target_os = "linux", windows)))]
pub(crate) type PlatformBackend = unsupported::UnsupportedBackend;

pub(crate) trait Backend: Send + Sized + 'static {
    /// Native resources owned by one watch; dropping it releases them
    type Native: Send + 'static;

    fn new(config: &EngineConfig) -> DirmonResult<Self>;

    /// Start native notification on `root_dir` (absolute, trailing `/`)
    fn arm(&mut self, root_dir: &str, flags: WatchFlags) -> DirmonResult<Self::Native>;

    /// Wait up to `timeout` for readiness and decode whatever arrived.
    ///
    /// Runs on the poller thread with the table lock held.
    fn poll(
        &mut self,
        table: &mut WatchTable<Self::Native>,
        timeout: Duration,
    ) -> Vec<Notification>;

    /// Re-issue native reads for watches serviced by the last `poll`
    fn rearm(&mut self, _table: &mut WatchTable<Self::Native>) {}

    /// Start watching one more directory under the watch root.
    ///
    /// Returns the stored relative path.
    fn add_subdir(&mut self, watch: &mut Watch<Self::Native>, subdir: &str)
        -> DirmonResult<String>;

    /// Stop watching a directory previously added under the watch root
    fn remove_subdir(
        &mut self,
        watch: &mut Watch<Self::Native>,
        subdir: &str,
    ) -> DirmonResult<String>;

    /// Relative paths of separately monitored directories
    fn subdirs(_native: &Self::Native) -> Vec<String> {
        Vec::new()
    }
}
