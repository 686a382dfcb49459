//! Configuration loading
//!
//! Precedence, lowest to highest:
//! 1. Built-in defaults
//! 2. Config file (`$DIRMON_CONFIG`, else `<config dir>/dirmon/config.toml`)
//! 3. Environment variables (`DIRMON_*`)

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::warn;

use crate::error::{DirmonError, DirmonResult};

use super::types::EngineConfig;

/// Environment variable naming an explicit config file
pub const CONFIG_ENV: &str = "DIRMON_CONFIG";

/// Non-fatal configuration warning (unknown keys).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning {
    pub key: String,
    pub file: PathBuf,
    pub line: Option<usize>,
}

/// On-disk layout: every engine setting lives under `[engine]`.
#[derive(Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    engine: EngineConfig,
}

/// Load configuration and collect non-fatal warnings (e.g. unknown keys).
pub fn load_with_warnings(path: &Path) -> DirmonResult<(EngineConfig, Vec<ConfigWarning>)> {
    let content = fs::read_to_string(path)?;
    parse_with_warnings(&content, path)
}

pub(crate) fn parse_with_warnings(
    content: &str,
    path: &Path,
) -> DirmonResult<(EngineConfig, Vec<ConfigWarning>)> {
    let mut unknown_paths: Vec<String> = Vec::new();
    let deserializer = toml::de::Deserializer::new(content);

    let file: ConfigFile = serde_ignored::deserialize(deserializer, |p| {
        unknown_paths.push(p.to_string());
    })
    .map_err(|e| DirmonError::Config {
        file: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let warnings = unknown_paths
        .into_iter()
        .map(|path_str| {
            let key = path_str
                .split('.')
                .next_back()
                .unwrap_or(path_str.as_str())
                .to_string();
            ConfigWarning {
                line: find_line_number(content, &key),
                key,
                file: path.to_path_buf(),
            }
        })
        .collect();

    Ok((file.engine.validate(), warnings))
}

/// Load from `$DIRMON_CONFIG`, the user config, or defaults
pub fn load_or_default() -> EngineConfig {
    let candidates = std::env::var_os(CONFIG_ENV)
        .map(PathBuf::from)
        .into_iter()
        .chain(dirs::config_dir().map(|dir| dir.join("dirmon/config.toml")));

    for candidate in candidates {
        if !candidate.exists() {
            continue;
        }
        match load_with_warnings(&candidate) {
            Ok((config, warnings)) => {
                for warning in &warnings {
                    warn!(
                        key = %warning.key,
                        file = %warning.file.display(),
                        line = ?warning.line,
                        "unknown config key ignored"
                    );
                }
                return with_env_overrides(config);
            }
            Err(e) => {
                warn!(file = %candidate.display(), error = %e, "ignoring unreadable config");
            }
        }
    }

    with_env_overrides(EngineConfig::default())
}

/// Apply environment variable overrides (`DIRMON_*` prefix)
pub fn with_env_overrides(config: EngineConfig) -> EngineConfig {
    apply_overrides(config, |name| std::env::var(name).ok())
}

pub(crate) fn apply_overrides(
    mut config: EngineConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> EngineConfig {
    override_number(&lookup, "DIRMON_MAX_WATCHES", &mut config.max_watches);
    override_number(&lookup, "DIRMON_DEBOUNCE_MS", &mut config.debounce_ms);
    override_number(&lookup, "DIRMON_POLL_TIMEOUT_MS", &mut config.poll_timeout_ms);
    override_number(&lookup, "DIRMON_BACKOFF_MS", &mut config.backoff_ms);
    config.validate()
}

fn override_number<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &str,
    slot: &mut T,
) {
    let Some(raw) = lookup(var) else {
        return;
    };
    match raw.trim().parse() {
        Ok(value) => *slot = value,
        Err(_) => warn!(var, value = %raw, "invalid numeric override ignored"),
    }
}

fn find_line_number(content: &str, key: &str) -> Option<usize> {
    content
        .lines()
        .position(|line| {
            let trimmed = line.trim_start();
            trimmed
                .strip_prefix(key)
                .map(|rest| rest.trim_start().starts_with('='))
                .unwrap_or(false)
        })
        .map(|idx| idx + 1)
}
