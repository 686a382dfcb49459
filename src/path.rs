//! Path string helpers
//!
//! Watch roots and event paths are plain UTF-8 strings with `/` separators on
//! every platform. These helpers keep that representation consistent:
//! - backslash to slash normalization
//! - exactly one trailing separator on directory paths
//! - joining a root with a relative path
//! - stripping a root prefix back off

use std::path::{Path, PathBuf};

/// Replace every `\` with `/`, leaving everything else (including runs of `/`) untouched.
pub fn normalize_slashes(path: &str) -> String {
    path.replace('\\', "/")
}

/// Convert a filesystem path to a slash-normalized string.
pub fn to_slash_string(path: &Path) -> String {
    normalize_slashes(&path.to_string_lossy())
}

/// Ensure the path ends in exactly one `/`.
///
/// An empty input stays empty: it denotes the watch root itself in relative form.
pub fn with_trailing_slash(path: &str) -> String {
    if path.is_empty() {
        return String::new();
    }
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        // "/" or "///": the filesystem root
        return "/".to_string();
    }
    let mut out = String::with_capacity(trimmed.len() + 1);
    out.push_str(trimmed);
    out.push('/');
    out
}

/// Normalize a directory path for storage: slashes, then a single trailing `/`.
pub fn normalize_dir(path: &str) -> String {
    with_trailing_slash(&normalize_slashes(path))
}

/// Join a trailing-slash directory with a relative entry name.
pub fn join(dir: &str, relative: &str) -> String {
    let mut out = String::with_capacity(dir.len() + relative.len());
    out.push_str(dir);
    out.push_str(relative);
    out
}

/// Strip `root` from the front of `path` when `path` lies under it.
///
/// Callers pass slash-normalized strings. Returns `None` when `path` is not
/// inside `root`.
pub fn strip_root<'a>(path: &'a str, root: &str) -> Option<&'a str> {
    path.strip_prefix(root)
}

/// Make a path absolute against the current working directory.
pub fn absolutize(path: &Path) -> std::io::Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}
