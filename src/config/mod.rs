//! Configuration module for dirmon
//!
//! Configuration hierarchy:
//! 1. Environment variables (DIRMON_*) (highest priority)
//! 2. Config file (`$DIRMON_CONFIG` or `~/.config/dirmon/config.toml`)
//! 3. Built-in defaults (lowest priority)

mod loader;
mod types;

pub use loader::{load_or_default, with_env_overrides, ConfigWarning, CONFIG_ENV};
pub use types::{
    EngineConfig, DEFAULT_BACKOFF_MS, DEFAULT_DEBOUNCE_MS, DEFAULT_MAX_WATCHES,
    DEFAULT_POLL_TIMEOUT_MS,
};
