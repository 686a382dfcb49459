//! Engine context and background poller
//!
//! One [`Engine`] owns a watch table, a platform backend and a poller thread.
//! The table sits behind a reentrant lock so callbacks, which run on the
//! poller thread while it holds the lock, can call back into the engine
//! (unwatch themselves, add a subdirectory) without deadlocking. No `RefCell`
//! borrow is held while a callback runs.

use std::cell::RefCell;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};

use parking_lot::ReentrantMutex;
use tracing::{debug, error, trace, warn};

use crate::backend::{Backend, PlatformBackend};
use crate::config::EngineConfig;
use crate::error::{DirmonError, DirmonResult};
use crate::path;

use super::event::{Notification, WatchEvent, WatchFlags};
use super::id::WatchId;
use super::schedule::{try_enter, MutationGate, MutationIntent, SchedulePolicy};
use super::table::WatchTable;

struct State<B: Backend> {
    table: WatchTable<B::Native>,
    backend: B,
}

struct Shared<B: Backend> {
    state: ReentrantMutex<RefCell<State<B>>>,
    gate: MutationGate,
    quit: AtomicBool,
    poller: OnceLock<ThreadId>,
}

impl<B: Backend> Shared<B> {
    fn on_poller_thread(&self) -> bool {
        self.poller.get() == Some(&thread::current().id())
    }
}

/// Backend-generic engine; [`Engine`] fixes the backend to the platform's
pub(crate) struct EngineCore<B: Backend> {
    shared: Arc<Shared<B>>,
    poller: Option<JoinHandle<()>>,
    config: EngineConfig,
}

impl<B: Backend> EngineCore<B> {
    pub(crate) fn new(config: EngineConfig) -> DirmonResult<Self> {
        let config = config.validate();
        let backend = B::new(&config)?;
        Self::with_backend(config, backend)
    }

    pub(crate) fn with_backend(config: EngineConfig, backend: B) -> DirmonResult<Self> {
        let config = config.validate();
        let shared = Arc::new(Shared {
            state: ReentrantMutex::new(RefCell::new(State {
                table: WatchTable::new(config.max_watches),
                backend,
            })),
            gate: MutationGate::new(),
            quit: AtomicBool::new(false),
            poller: OnceLock::new(),
        });

        let policy = SchedulePolicy::from_config(&config);
        let poller_shared = Arc::clone(&shared);
        let poller = thread::Builder::new()
            .name("dirmon-poller".to_string())
            .spawn(move || poll_loop(&poller_shared, policy))
            .map_err(DirmonError::Spawn)?;

        debug!(
            max_watches = config.max_watches,
            poll_timeout_ms = config.poll_timeout_ms,
            "engine started"
        );
        Ok(Self {
            shared,
            poller: Some(poller),
            config,
        })
    }

    pub(crate) fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Writers on the poller thread already own the lock's attention
    fn announce(&self) -> Option<MutationIntent<'_>> {
        if self.shared.on_poller_thread() {
            None
        } else {
            Some(self.shared.gate.announce())
        }
    }

    pub(crate) fn watch<F>(&self, root: &str, flags: WatchFlags, callback: F) -> DirmonResult<WatchId>
    where
        F: Fn(&WatchEvent) + Send + Sync + 'static,
    {
        let root_dir = resolve_root(root, flags)?;

        let _intent = self.announce();
        let guard = self.shared.state.lock();
        let mut state = guard.borrow_mut();
        let State { table, backend } = &mut *state;

        if let Err(err) = table.ensure_capacity() {
            warn!(root = %root_dir, error = %err, "watch rejected");
            return Err(err);
        }
        let native = backend.arm(&root_dir, flags)?;
        let id = table.insert(root_dir.clone(), flags, Arc::new(callback), native)?;

        debug!(%id, root = %root_dir, ?flags, "watch registered");
        Ok(id)
    }

    pub(crate) fn unwatch(&self, id: WatchId) -> DirmonResult<()> {
        let _intent = self.announce();
        let guard = self.shared.state.lock();
        let removed = guard.borrow_mut().table.remove(id);

        // native handles and the callback are released outside the borrow
        match removed {
            Some(watch) => {
                debug!(%id, root = %watch.root_dir, "watch removed");
                drop(watch);
                Ok(())
            }
            None => Err(DirmonError::UnknownWatch { id }),
        }
    }

    pub(crate) fn add_subdir(&self, id: WatchId, subdir: &str) -> DirmonResult<()> {
        let _intent = self.announce();
        let guard = self.shared.state.lock();
        let mut state = guard.borrow_mut();
        let State { table, backend } = &mut *state;

        let watch = table.get_mut(id).ok_or(DirmonError::UnknownWatch { id })?;
        let relative = backend.add_subdir(watch, subdir)?;
        debug!(%id, subdir = %relative, "subdirectory added");
        Ok(())
    }

    pub(crate) fn remove_subdir(&self, id: WatchId, subdir: &str) -> DirmonResult<()> {
        let _intent = self.announce();
        let guard = self.shared.state.lock();
        let mut state = guard.borrow_mut();
        let State { table, backend } = &mut *state;

        let watch = table.get_mut(id).ok_or(DirmonError::UnknownWatch { id })?;
        let relative = backend.remove_subdir(watch, subdir)?;
        debug!(%id, subdir = %relative, "subdirectory removed");
        Ok(())
    }

    fn read<T>(&self, f: impl FnOnce(&State<B>) -> T) -> T {
        let _intent = self.announce();
        let guard = self.shared.state.lock();
        let state = guard.borrow();
        f(&state)
    }

    pub(crate) fn watch_count(&self) -> usize {
        self.read(|state| state.table.len())
    }

    pub(crate) fn root_dir(&self, id: WatchId) -> Option<String> {
        self.read(|state| state.table.get(id).map(|w| w.root_dir.clone()))
    }

    pub(crate) fn flags(&self, id: WatchId) -> Option<WatchFlags> {
        self.read(|state| state.table.get(id).map(|w| w.flags))
    }

    pub(crate) fn subdirs(&self, id: WatchId) -> Option<Vec<String>> {
        self.read(|state| state.table.get(id).map(|w| B::subdirs(&w.native)))
    }

    /// Stop the poller, then release every watch. Safe to call twice.
    fn shutdown(&mut self) {
        self.shared.quit.store(true, Ordering::Release);

        if let Some(handle) = self.poller.take() {
            // a callback dropping the last engine handle cannot join its own thread
            if !self.shared.on_poller_thread() && handle.join().is_err() {
                error!("poller thread panicked");
            }
        }

        let released = self.shared.state.lock().borrow_mut().table.drain();
        if !released.is_empty() {
            debug!(watches = released.len(), "releasing watches");
        }
        drop(released);
    }
}

impl<B: Backend> Drop for EngineCore<B> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn poll_loop<B: Backend>(shared: &Shared<B>, policy: SchedulePolicy) {
    let _ = shared.poller.set(thread::current().id());
    trace!("poller running");

    while !shared.quit.load(Ordering::Acquire) {
        let Some(guard) = try_enter(&shared.gate, &shared.state) else {
            policy.back_off();
            continue;
        };

        let notes = {
            let mut state = guard.borrow_mut();
            if state.table.is_empty() {
                None
            } else {
                let State { table, backend } = &mut *state;
                Some(backend.poll(table, policy.wait))
            }
        };
        let Some(notes) = notes else {
            drop(guard);
            policy.back_off();
            continue;
        };

        dispatch(&guard, notes);

        if !shared.quit.load(Ordering::Acquire) {
            let mut state = guard.borrow_mut();
            let State { table, backend } = &mut *state;
            backend.rearm(table);
        }
    }
    trace!("poller stopped");
}

/// Deliver notifications in order, resolving each watch at delivery time
fn dispatch<B: Backend>(state: &RefCell<State<B>>, notes: Vec<Notification>) {
    for note in notes {
        let target = {
            let state = state.borrow();
            state
                .table
                .get(note.watch_id)
                .map(|w| (Arc::clone(&w.callback), w.root_dir.clone()))
        };
        let Some((callback, root_dir)) = target else {
            trace!(id = %note.watch_id, "dropping event for removed watch");
            continue;
        };

        let event = note.into_event(root_dir);
        trace!(%event, "dispatching");
        if panic::catch_unwind(AssertUnwindSafe(|| callback(&event))).is_err() {
            error!(id = %event.watch_id, "watch callback panicked");
        }
    }
}

/// Validate a caller-supplied root and return its stored form
pub(super) fn resolve_root(root: &str, flags: WatchFlags) -> DirmonResult<String> {
    if root.is_empty() {
        return Err(DirmonError::EmptyRoot);
    }
    let invalid = |reason: String| {
        warn!(root, %reason, "invalid watch root");
        DirmonError::InvalidRoot {
            path: PathBuf::from(root),
            reason,
        }
    };

    let mut target = path::absolutize(Path::new(root)).map_err(|e| invalid(e.to_string()))?;
    let meta = fs::symlink_metadata(&target).map_err(|e| invalid(e.to_string()))?;
    if meta.file_type().is_symlink() {
        if !flags.contains(WatchFlags::FOLLOW_SYMLINKS) {
            return Err(invalid(
                "root is a symbolic link and FOLLOW_SYMLINKS is not set".to_string(),
            ));
        }
        target = fs::canonicalize(&target).map_err(|e| invalid(e.to_string()))?;
    }

    match fs::metadata(&target) {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => return Err(invalid("not a directory".to_string())),
        Err(e) => return Err(invalid(e.to_string())),
    }
    fs::read_dir(&target).map_err(|e| invalid(e.to_string()))?;

    let slashed = path::to_slash_string(&target);
    let slashed = slashed.strip_prefix("//?/").unwrap_or(&slashed);
    Ok(path::normalize_dir(slashed))
}

/// A running directory-change notification engine.
///
/// Dropping the engine (or calling [`Engine::deinit`]) stops the poller and
/// releases every watch.
///
/// ```no_run
/// use dirmon::{Engine, WatchFlags};
///
/// let engine = Engine::init()?;
/// let id = engine.watch("./assets", WatchFlags::RECURSIVE, |event| {
///     println!("{event}");
/// })?;
/// // ...
/// engine.unwatch(id)?;
/// engine.deinit();
/// # Ok::<(), dirmon::DirmonError>(())
/// ```
pub struct Engine {
    core: EngineCore<PlatformBackend>,
}

impl Engine {
    /// Start an engine with default settings
    pub fn init() -> DirmonResult<Self> {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> DirmonResult<Self> {
        Ok(Self {
            core: EngineCore::new(config)?,
        })
    }

    /// Stop the poller and release every watch
    pub fn deinit(self) {
        drop(self);
    }

    /// Start watching `root`.
    ///
    /// The callback runs on the engine's poller thread. It may call back
    /// into the engine, including `unwatch` for its own id.
    pub fn watch<F>(&self, root: &str, flags: WatchFlags, callback: F) -> DirmonResult<WatchId>
    where
        F: Fn(&WatchEvent) + Send + Sync + 'static,
    {
        self.core.watch(root, flags, callback)
    }

    pub fn unwatch(&self, id: WatchId) -> DirmonResult<()> {
        self.core.unwatch(id)
    }

    /// Start monitoring one more directory of a non-recursive watch.
    ///
    /// `subdir` is relative to the watch root, or absolute inside it.
    pub fn watch_add_subdir(&self, id: WatchId, subdir: &str) -> DirmonResult<()> {
        self.core.add_subdir(id, subdir)
    }

    pub fn watch_remove_subdir(&self, id: WatchId, subdir: &str) -> DirmonResult<()> {
        self.core.remove_subdir(id, subdir)
    }

    pub fn watch_count(&self) -> usize {
        self.core.watch_count()
    }

    /// Stored root of a live watch: absolute, `/`-separated, trailing `/`
    pub fn root_dir(&self, id: WatchId) -> Option<String> {
        self.core.root_dir(id)
    }

    pub fn flags(&self, id: WatchId) -> Option<WatchFlags> {
        self.core.flags(id)
    }

    /// Separately monitored directories, relative to the root (`""` is the root)
    pub fn subdirs(&self, id: WatchId) -> Option<Vec<String>> {
        self.core.subdirs(id)
    }

    pub fn config(&self) -> &EngineConfig {
        self.core.config()
    }
}
