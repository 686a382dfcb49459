//! Watch flags, actions and the unified event delivered to callbacks

use std::fmt;

use bitflags::bitflags;
use serde::Serialize;

use super::id::WatchId;

bitflags! {
    /// Options for a single watch
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct WatchFlags: u32 {
        /// Monitor the root and every directory below it
        const RECURSIVE = 0x1;
        /// Follow symlinked directories (and a symlinked root)
        const FOLLOW_SYMLINKS = 0x2;
        /// Let followed symlinks resolve outside the watch root
        const OUT_OF_SCOPE_LINKS = 0x4;
        /// Drop events whose subject is a directory
        const IGNORE_DIRECTORIES = 0x8;
    }
}

/// Kind of change reported to a callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchAction {
    Create,
    Delete,
    Modify,
    Move,
}

impl WatchAction {
    pub fn as_str(self) -> &'static str {
        match self {
            WatchAction::Create => "CREATE",
            WatchAction::Delete => "DELETE",
            WatchAction::Modify => "MODIFY",
            WatchAction::Move => "MOVE",
        }
    }
}

impl fmt::Display for WatchAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The cross-platform record handed to a watch callback
///
/// `path` and `old_path` are relative to `root_dir`, which always ends in `/`.
/// `old_path` is only present for [`WatchAction::Move`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WatchEvent {
    pub watch_id: WatchId,
    pub action: WatchAction,
    pub root_dir: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_path: Option<String>,
}

impl WatchEvent {
    /// One-line JSON form, suitable for NDJSON logs
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

impl fmt::Display for WatchEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.old_path {
            Some(old) => write!(
                f,
                "{}: [{}]{} -> [{}]{}",
                self.action, self.root_dir, old, self.root_dir, self.path
            ),
            None => write!(f, "{}: [{}]{}", self.action, self.root_dir, self.path),
        }
    }
}

/// A decoded change that still needs its watch's root attached.
///
/// Backends produce these; the poller resolves the watch at dispatch time so
/// a watch removed (or re-rooted) mid-batch is handled correctly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Notification {
    pub watch_id: WatchId,
    pub action: WatchAction,
    pub path: String,
    pub old_path: Option<String>,
}

impl Notification {
    pub(crate) fn new(watch_id: WatchId, action: WatchAction, path: impl Into<String>) -> Self {
        Self {
            watch_id,
            action,
            path: path.into(),
            old_path: None,
        }
    }

    pub(crate) fn moved(
        watch_id: WatchId,
        old_path: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            watch_id,
            action: WatchAction::Move,
            path: path.into(),
            old_path: Some(old_path.into()),
        }
    }

    pub(crate) fn into_event(self, root_dir: String) -> WatchEvent {
        WatchEvent {
            watch_id: self.watch_id,
            action: self.action,
            root_dir,
            path: self.path,
            old_path: self.old_path,
        }
    }
}
