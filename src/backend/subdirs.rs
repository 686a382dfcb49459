//! Per-watch table of separately monitored directories
//!
//! Used by the inotify backend, where each directory of a recursive tree
//! needs its own kernel descriptor.

#![cfg_attr(not(target_os = "linux"), allow(dead_code))]

use std::fs;

use crate::error::{DirmonError, DirmonResult};
use crate::path;

/// Ordered `(descriptor, relative path)` pairs.
///
/// Relative paths end in `/`; the watch root itself is stored as `""`.
/// Descriptors are unique. Removal is swap-remove, so positions are not
/// stable across removals; look entries up by descriptor or path instead.
#[derive(Debug, Clone)]
pub(crate) struct SubdirTable<D> {
    entries: Vec<(D, String)>,
}

impl<D: PartialEq> SubdirTable<D> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Record a descriptor. The kernel hands out one descriptor per inode, so
    /// a descriptor seen again (directory renamed, or reached twice through a
    /// link) is re-pointed at the new path. Returns `true` for a new entry.
    pub(crate) fn insert(&mut self, descriptor: D, relative: String) -> bool {
        if let Some(entry) = self.entries.iter_mut().find(|(d, _)| *d == descriptor) {
            entry.1 = relative;
            return false;
        }
        self.entries.push((descriptor, relative));
        true
    }

    pub(crate) fn contains_path(&self, relative: &str) -> bool {
        self.entries.iter().any(|(_, p)| p == relative)
    }

    pub(crate) fn path_of(&self, descriptor: &D) -> Option<&str> {
        self.entries
            .iter()
            .find(|(d, _)| d == descriptor)
            .map(|(_, p)| p.as_str())
    }

    pub(crate) fn remove_path(&mut self, relative: &str) -> Option<D> {
        let idx = self.entries.iter().position(|(_, p)| p == relative)?;
        Some(self.entries.swap_remove(idx).0)
    }

    pub(crate) fn remove_descriptor(&mut self, descriptor: &D) -> Option<String> {
        let idx = self.entries.iter().position(|(d, _)| d == descriptor)?;
        Some(self.entries.swap_remove(idx).1)
    }

    /// Remove `relative` and every entry below it, returning their descriptors
    pub(crate) fn remove_tree(&mut self, relative: &str) -> Vec<D> {
        let mut removed = Vec::new();
        let mut i = 0;
        while i < self.entries.len() {
            if self.entries[i].1.starts_with(relative) {
                removed.push(self.entries.swap_remove(i).0);
            } else {
                i += 1;
            }
        }
        removed
    }

    pub(crate) fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(_, p)| p.as_str())
    }
}

/// Resolve a caller-supplied subdirectory to a relative, `/`-terminated path.
///
/// Accepts either a path relative to the root or an absolute path inside it.
/// The directory must exist.
pub(crate) fn resolve_subdir(root_dir: &str, subdir: &str) -> DirmonResult<String> {
    let relative = relative_subdir(root_dir, subdir)?;
    let full = path::join(root_dir, &relative);
    match fs::metadata(&full) {
        Ok(meta) if meta.is_dir() => Ok(relative),
        _ => Err(DirmonError::InvalidSubdir {
            path: subdir.to_string(),
        }),
    }
}

/// Normalize a subdirectory to relative form without touching the filesystem
pub(crate) fn relative_subdir(root_dir: &str, subdir: &str) -> DirmonResult<String> {
    let normalized = path::normalize_slashes(subdir);
    let invalid = || DirmonError::InvalidSubdir {
        path: subdir.to_string(),
    };

    let relative = match path::strip_root(&normalized, root_dir) {
        Some(rest) => rest,
        // the root itself, written without its trailing slash
        None if path::with_trailing_slash(&normalized) == root_dir => "",
        None if normalized.starts_with('/') || has_drive_prefix(&normalized) => {
            return Err(invalid());
        }
        None => normalized.as_str(),
    };

    let relative = relative.trim_start_matches("./");
    if relative.is_empty() || relative.split('/').any(|c| c == "..") {
        return Err(invalid());
    }
    Ok(path::with_trailing_slash(relative))
}

fn has_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}
