//! Linux backend on top of inotify
//!
//! inotify is not recursive: a recursive watch walks the tree once at
//! registration and adds one kernel watch per directory, then keeps that set
//! current as directories appear, move or vanish. Raw records from every
//! watch go into one shared [`EventBatch`] and are normalized when its
//! debounce window closes.

use std::ffi::OsStr;
use std::fs;
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use ignore::WalkBuilder;
use inotify::{Event, EventMask, Inotify, WatchDescriptor, WatchMask};
use tracing::{debug, error, trace, warn};

use crate::config::EngineConfig;
use crate::error::{DirmonError, DirmonResult};
use crate::path;
use crate::watcher::event::{Notification, WatchFlags};
use crate::watcher::id::WatchId;
use crate::watcher::normalizer::{normalize, EventBatch, RawEvent, RawKind};
use crate::watcher::table::{Watch, WatchTable};

use super::subdirs::{relative_subdir, resolve_subdir, SubdirTable};
use super::Backend;

/// Room for roughly 1024 events with long names
const READ_BUFFER_SIZE: usize = 1024 * (16 + 256);

fn watch_mask() -> WatchMask {
    WatchMask::MOVED_TO
        | WatchMask::CREATE
        | WatchMask::MOVED_FROM
        | WatchMask::DELETE
        | WatchMask::MODIFY
}

/// Kernel resources of one watch
pub(crate) struct InotifyWatch {
    inotify: Inotify,
    subdirs: SubdirTable<WatchDescriptor>,
}

impl InotifyWatch {
    /// Add one directory; `relative` is `/`-terminated or empty for the root
    fn enroll_dir(&mut self, target: &Path, relative: String) -> io::Result<()> {
        let wd = self.inotify.watches().add(target, watch_mask())?;
        self.subdirs.insert(wd, relative);
        Ok(())
    }

    /// Add every directory below `relative` (not `relative` itself)
    fn enroll_tree(&mut self, root_dir: &str, relative: &str, flags: WatchFlags) -> usize {
        let follow = flags.contains(WatchFlags::FOLLOW_SYMLINKS);
        let allow_outside = flags.contains(WatchFlags::OUT_OF_SCOPE_LINKS);
        let scope: Option<PathBuf> = fs::canonicalize(root_dir).ok();
        let start = path::join(root_dir, relative);

        let walker = WalkBuilder::new(&start)
            .standard_filters(false)
            .follow_links(follow)
            .filter_entry(move |entry| {
                if !entry.path_is_symlink() || allow_outside {
                    return true;
                }
                match (&scope, fs::canonicalize(entry.path())) {
                    (Some(scope), Ok(real)) => real.starts_with(scope),
                    _ => false,
                }
            })
            .build();

        let root_path = Path::new(root_dir);
        let mut enrolled = 0;
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(root = root_dir, error = %err, "skipping entry during directory enrollment");
                    continue;
                }
            };
            if entry.depth() == 0 || !entry.file_type().is_some_and(|ft| ft.is_dir()) {
                continue;
            }
            let Ok(inner) = entry.path().strip_prefix(root_path) else {
                continue;
            };
            let relative = path::with_trailing_slash(&path::to_slash_string(inner));

            let target = if entry.path_is_symlink() {
                match fs::canonicalize(entry.path()) {
                    Ok(real) => real,
                    Err(err) => {
                        warn!(path = %entry.path().display(), error = %err, "cannot resolve symlink");
                        continue;
                    }
                }
            } else {
                entry.path().to_path_buf()
            };

            match self.enroll_dir(&target, relative) {
                Ok(()) => enrolled += 1,
                Err(err) => {
                    warn!(path = %target.display(), error = %err, "inotify_add_watch failed, directory skipped");
                }
            }
        }

        debug!(root = root_dir, relative, enrolled, "enrolled directory tree");
        enrolled
    }

    /// Drop kernel watches for `relative` and everything below it
    fn forget_tree(&mut self, relative: &str) {
        for wd in self.subdirs.remove_tree(relative) {
            if let Err(err) = self.inotify.watches().remove(wd) {
                debug!(tree = relative, error = %err, "kernel watch already gone");
            }
        }
    }
}

pub(crate) struct InotifyBackend {
    batch: EventBatch,
    debounce: Duration,
    buffer: Vec<u8>,
}

impl Backend for InotifyBackend {
    type Native = InotifyWatch;

    fn new(config: &EngineConfig) -> DirmonResult<Self> {
        Ok(Self {
            batch: EventBatch::new(),
            debounce: config.debounce(),
            buffer: vec![0; READ_BUFFER_SIZE],
        })
    }

    fn arm(&mut self, root_dir: &str, flags: WatchFlags) -> DirmonResult<InotifyWatch> {
        let backend_err = |source: io::Error| {
            error!(root = root_dir, error = %source, "inotify registration failed");
            DirmonError::Backend {
                path: PathBuf::from(root_dir),
                source,
            }
        };

        let inotify = Inotify::init().map_err(backend_err)?;
        let mut native = InotifyWatch {
            inotify,
            subdirs: SubdirTable::new(),
        };
        native
            .enroll_dir(Path::new(root_dir), String::new())
            .map_err(backend_err)?;

        if flags.contains(WatchFlags::RECURSIVE) {
            native.enroll_tree(root_dir, "", flags);
        }
        Ok(native)
    }

    fn poll(&mut self, table: &mut WatchTable<InotifyWatch>, timeout: Duration) -> Vec<Notification> {
        let ready = wait_readable(table, timeout);

        let now = Instant::now();
        for id in ready {
            if let Some(watch) = table.get_mut(id) {
                drain(watch, &mut self.buffer, &mut self.batch, now);
            }
        }

        if self.batch.is_due(Instant::now(), self.debounce) {
            trace!(events = self.batch.len(), "debounce window closed");
            return normalize(self.batch.take());
        }
        Vec::new()
    }

    fn add_subdir(&mut self, watch: &mut Watch<InotifyWatch>, subdir: &str) -> DirmonResult<String> {
        let relative = resolve_subdir(&watch.root_dir, subdir).inspect_err(|err| {
            warn!(root = %watch.root_dir, subdir, error = %err, "cannot add subdirectory");
        })?;
        if watch.native.subdirs.contains_path(&relative) {
            warn!(root = %watch.root_dir, subdir = %relative, "subdirectory already watched");
            return Err(DirmonError::DuplicateSubdir { path: relative });
        }

        let full = path::join(&watch.root_dir, &relative);
        watch
            .native
            .enroll_dir(Path::new(&full), relative.clone())
            .map_err(|source| {
                error!(path = %full, error = %source, "inotify_add_watch failed for subdirectory");
                DirmonError::Backend {
                    path: PathBuf::from(&full),
                    source,
                }
            })?;
        Ok(relative)
    }

    fn remove_subdir(
        &mut self,
        watch: &mut Watch<InotifyWatch>,
        subdir: &str,
    ) -> DirmonResult<String> {
        let relative = relative_subdir(&watch.root_dir, subdir).inspect_err(|err| {
            warn!(root = %watch.root_dir, subdir, error = %err, "cannot remove subdirectory");
        })?;
        let Some(wd) = watch.native.subdirs.remove_path(&relative) else {
            warn!(root = %watch.root_dir, subdir = %relative, "subdirectory is not watched");
            return Err(DirmonError::SubdirNotWatched { path: relative });
        };
        if let Err(err) = watch.native.inotify.watches().remove(wd) {
            debug!(path = %relative, error = %err, "kernel watch already gone");
        }
        Ok(relative)
    }

    fn subdirs(native: &InotifyWatch) -> Vec<String> {
        native.subdirs.paths().map(str::to_string).collect()
    }
}

/// `poll(2)` across every watch's inotify descriptor
fn wait_readable(table: &WatchTable<InotifyWatch>, timeout: Duration) -> Vec<WatchId> {
    let mut ids = Vec::with_capacity(table.len());
    let mut fds: Vec<libc::pollfd> = Vec::with_capacity(table.len());
    for watch in table.iter() {
        ids.push(watch.id);
        fds.push(libc::pollfd {
            fd: watch.native.inotify.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        });
    }
    if fds.is_empty() {
        return ids;
    }

    let timeout_ms = timeout.as_millis().min(i32::MAX as u128) as libc::c_int;
    // SAFETY: `fds` is a live, correctly sized array of pollfd for the whole call
    let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };
    if rc < 0 {
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            warn!(error = %err, "poll on inotify descriptors failed");
        }
        return Vec::new();
    }
    if rc == 0 {
        return Vec::new();
    }

    ids.into_iter()
        .zip(fds)
        .filter(|(_, fd)| fd.revents & libc::POLLIN != 0)
        .map(|(id, _)| id)
        .collect()
}

/// Read until the descriptor would block, buffering each record
fn drain(watch: &mut Watch<InotifyWatch>, buffer: &mut [u8], batch: &mut EventBatch, now: Instant) {
    loop {
        let events = match watch.native.inotify.read_events(buffer) {
            Ok(events) => events,
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => return,
            Err(err) => {
                warn!(root = %watch.root_dir, error = %err, "reading inotify events failed");
                return;
            }
        };

        let mut count = 0;
        for event in events {
            count += 1;
            record(watch, event, batch, now);
        }
        if count == 0 {
            return;
        }
    }
}

fn classify(mask: EventMask) -> Option<RawKind> {
    if mask.contains(EventMask::CREATE) {
        Some(RawKind::Create)
    } else if mask.contains(EventMask::DELETE) {
        Some(RawKind::Delete)
    } else if mask.contains(EventMask::MODIFY) {
        Some(RawKind::Modify)
    } else if mask.contains(EventMask::MOVED_FROM) {
        Some(RawKind::MovedFrom)
    } else if mask.contains(EventMask::MOVED_TO) {
        Some(RawKind::MovedTo)
    } else {
        None
    }
}

fn record(watch: &mut Watch<InotifyWatch>, event: Event<&OsStr>, batch: &mut EventBatch, now: Instant) {
    let mask = event.mask;

    if mask.contains(EventMask::Q_OVERFLOW) {
        warn!(root = %watch.root_dir, "inotify queue overflowed, events were lost");
        return;
    }
    if mask.contains(EventMask::IGNORED) {
        if let Some(relative) = watch.native.subdirs.remove_descriptor(&event.wd) {
            debug!(root = %watch.root_dir, %relative, "kernel dropped directory watch");
        }
        return;
    }

    let Some(dir) = watch.native.subdirs.path_of(&event.wd) else {
        trace!(root = %watch.root_dir, ?mask, "event for unknown descriptor");
        return;
    };
    let Some(name) = event.name else {
        return;
    };
    let Some(kind) = classify(mask) else {
        return;
    };
    let path = path::join(dir, &path::normalize_slashes(&name.to_string_lossy()));
    let is_dir = mask.contains(EventMask::ISDIR);
    trace!(root = %watch.root_dir, path = %path, ?kind, cookie = event.cookie, is_dir, "raw inotify event");

    if is_dir && watch.flags.contains(WatchFlags::RECURSIVE) {
        let relative = path::with_trailing_slash(&path);
        match kind {
            RawKind::Create | RawKind::MovedTo => {
                let full = path::join(&watch.root_dir, &relative);
                match watch.native.enroll_dir(Path::new(&full), relative.clone()) {
                    Ok(()) => {
                        watch.native.enroll_tree(&watch.root_dir, &relative, watch.flags);
                    }
                    Err(err) => warn!(path = %full, error = %err, "cannot watch new directory"),
                }
            }
            RawKind::MovedFrom => watch.native.forget_tree(&relative),
            _ => {}
        }
    }

    if is_dir && watch.flags.contains(WatchFlags::IGNORE_DIRECTORIES) {
        return;
    }
    batch.push(RawEvent::new(watch.id, kind, path, event.cookie), now);
}
