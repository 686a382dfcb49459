//! Backend for targets without native directory notification support

use std::thread;
use std::time::Duration;

use crate::config::EngineConfig;
use crate::error::{DirmonError, DirmonResult};
use crate::watcher::event::{Notification, WatchFlags};
use crate::watcher::table::{Watch, WatchTable};

use super::Backend;

pub(crate) struct UnsupportedBackend;

impl Backend for UnsupportedBackend {
    type Native = ();

    fn new(_config: &EngineConfig) -> DirmonResult<Self> {
        Ok(Self)
    }

    fn arm(&mut self, _root_dir: &str, _flags: WatchFlags) -> DirmonResult<()> {
        Err(DirmonError::Unsupported { operation: "watch" })
    }

    fn poll(&mut self, _table: &mut WatchTable<()>, timeout: Duration) -> Vec<Notification> {
        thread::sleep(timeout);
        Vec::new()
    }

    fn add_subdir(&mut self, _watch: &mut Watch<()>, _subdir: &str) -> DirmonResult<String> {
        Err(DirmonError::Unsupported {
            operation: "watch_add_subdir",
        })
    }

    fn remove_subdir(&mut self, _watch: &mut Watch<()>, _subdir: &str) -> DirmonResult<String> {
        Err(DirmonError::Unsupported {
            operation: "watch_remove_subdir",
        })
    }
}
