//! Configuration type definitions

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::DirmonResult;

use super::loader::{self, ConfigWarning};

/// Default capacity of the watch table
pub const DEFAULT_MAX_WATCHES: usize = 64;
/// Default inotify debounce window in milliseconds
pub const DEFAULT_DEBOUNCE_MS: u64 = 100;
/// Default readiness wait per poller iteration in milliseconds
pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 10;
/// Default poller backoff in milliseconds
pub const DEFAULT_BACKOFF_MS: u64 = 10;

/// Engine configuration
///
/// Every field is optional in TOML; missing keys take the defaults above.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum number of simultaneously active watches
    #[serde(default = "default_max_watches")]
    pub max_watches: usize,

    /// How long raw inotify events are buffered before normalization
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Bounded wait for native readiness on each poller iteration
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,

    /// Sleep applied when the poller backs off
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_watches: DEFAULT_MAX_WATCHES,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            poll_timeout_ms: DEFAULT_POLL_TIMEOUT_MS,
            backoff_ms: DEFAULT_BACKOFF_MS,
        }
    }
}

fn default_max_watches() -> usize {
    DEFAULT_MAX_WATCHES
}

fn default_debounce_ms() -> u64 {
    DEFAULT_DEBOUNCE_MS
}

fn default_poll_timeout_ms() -> u64 {
    DEFAULT_POLL_TIMEOUT_MS
}

fn default_backoff_ms() -> u64 {
    DEFAULT_BACKOFF_MS
}

impl EngineConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> DirmonResult<Self> {
        Ok(loader::load_with_warnings(path)?.0)
    }

    /// Load configuration and collect non-fatal warnings (unknown keys)
    pub fn load_with_warnings(path: &Path) -> DirmonResult<(Self, Vec<ConfigWarning>)> {
        loader::load_with_warnings(path)
    }

    /// Load from `$DIRMON_CONFIG`, the user config dir, or defaults,
    /// then apply `DIRMON_*` environment overrides
    pub fn load_or_default() -> Self {
        loader::load_or_default()
    }

    /// Clamp values that would stall or disable the engine
    pub fn validate(mut self) -> Self {
        self.max_watches = self.max_watches.max(1);
        self.poll_timeout_ms = self.poll_timeout_ms.max(1);
        self.backoff_ms = self.backoff_ms.max(1);
        self
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}
