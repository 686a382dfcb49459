//! Windows backend: overlapped `ReadDirectoryChangesW`
//!
//! Every watch owns a directory handle, a manual-reset event, an `OVERLAPPED`
//! block and a read buffer. One read is kept in flight per watch; the poller
//! waits on all events at once, decodes whichever buffer completed and
//! re-issues the read after dispatch. Recursion is native
//! (`bWatchSubtree`), so there is no per-directory bookkeeping.

use std::ffi::OsStr;
use std::os::windows::ffi::OsStrExt;
use std::path::PathBuf;
use std::ptr;
use std::thread;
use std::time::Duration;
use std::{io, mem, slice};

use tracing::{debug, error, trace};
use windows_sys::Win32::Foundation::{
    CloseHandle, GetLastError, ERROR_IO_INCOMPLETE, HANDLE, INVALID_HANDLE_VALUE,
};
use windows_sys::Win32::Storage::FileSystem::{
    CreateFileW, ReadDirectoryChangesW, FILE_FLAG_BACKUP_SEMANTICS, FILE_FLAG_OVERLAPPED,
    FILE_LIST_DIRECTORY, FILE_NOTIFY_CHANGE_CREATION, FILE_NOTIFY_CHANGE_DIR_NAME,
    FILE_NOTIFY_CHANGE_FILE_NAME, FILE_NOTIFY_CHANGE_LAST_WRITE, FILE_NOTIFY_CHANGE_SIZE,
    FILE_SHARE_DELETE, FILE_SHARE_READ, FILE_SHARE_WRITE, OPEN_EXISTING,
};
use windows_sys::Win32::System::Threading::{
    CreateEventW, ResetEvent, WaitForMultipleObjects, MAXIMUM_WAIT_OBJECTS,
};
use windows_sys::Win32::System::IO::{CancelIo, GetOverlappedResult, OVERLAPPED};

use crate::config::EngineConfig;
use crate::error::{DirmonError, DirmonResult};
use crate::path;
use crate::watcher::event::{Notification, WatchFlags};
use crate::watcher::id::WatchId;
use crate::watcher::table::{Watch, WatchTable};

use super::change_records::{lookup_entry, parse_records, ChangeDecoder, DirectoryMove};
use super::read_cycle::{must_idle, wait_outcome, waitable, Completion, ReadCycle, WaitOutcome};
use super::Backend;

/// Largest buffer `ReadDirectoryChangesW` accepts for network shares
const BUFFER_BYTES: usize = 64512;

const NOTIFY_FILTER: u32 = FILE_NOTIFY_CHANGE_CREATION
    | FILE_NOTIFY_CHANGE_LAST_WRITE
    | FILE_NOTIFY_CHANGE_FILE_NAME
    | FILE_NOTIFY_CHANGE_DIR_NAME
    | FILE_NOTIFY_CHANGE_SIZE;

/// Native state of one watch
pub(crate) struct OverlappedWatch {
    dir: HANDLE,
    event: HANDLE,
    overlapped: Box<OVERLAPPED>,
    /// `u32` storage keeps the records DWORD aligned
    buffer: Vec<u32>,
    recursive: bool,
    decoder: ChangeDecoder,
    cycle: ReadCycle,
}

// The handles are owned exclusively by this value and only touched by the
// thread holding the watch table lock.
unsafe impl Send for OverlappedWatch {}

impl OverlappedWatch {
    fn open(root_dir: &str, recursive: bool) -> io::Result<Self> {
        let native_path = root_dir.replace('/', "\\");
        let wide: Vec<u16> = OsStr::new(&native_path)
            .encode_wide()
            .chain(Some(0))
            .collect();

        // SAFETY: `wide` is NUL-terminated and outlives the call
        let dir = unsafe {
            CreateFileW(
                wide.as_ptr(),
                FILE_LIST_DIRECTORY,
                FILE_SHARE_READ | FILE_SHARE_WRITE | FILE_SHARE_DELETE,
                ptr::null_mut(),
                OPEN_EXISTING,
                FILE_FLAG_BACKUP_SEMANTICS | FILE_FLAG_OVERLAPPED,
                ptr::null_mut(),
            )
        };
        if dir == INVALID_HANDLE_VALUE {
            return Err(io::Error::last_os_error());
        }

        // SAFETY: no security attributes, unnamed manual-reset event
        let event = unsafe { CreateEventW(ptr::null_mut(), 1, 0, ptr::null_mut()) };
        if event.is_null() {
            let err = io::Error::last_os_error();
            // SAFETY: `dir` was opened above and is not shared
            unsafe { CloseHandle(dir) };
            return Err(err);
        }

        // SAFETY: OVERLAPPED is plain data; all-zero is its documented initial state
        let mut overlapped: Box<OVERLAPPED> = Box::new(unsafe { mem::zeroed() });
        overlapped.hEvent = event;

        let mut watch = Self {
            dir,
            event,
            overlapped,
            buffer: vec![0u32; BUFFER_BYTES / mem::size_of::<u32>()],
            recursive,
            decoder: ChangeDecoder::new(),
            cycle: ReadCycle::default(),
        };
        watch.issue_read()?;
        Ok(watch)
    }

    fn issue_read(&mut self) -> io::Result<()> {
        // SAFETY: event handle is live
        unsafe { ResetEvent(self.event) };
        let event = self.event;
        // SAFETY: zeroing plain data before reuse, event restored right after
        *self.overlapped = unsafe { mem::zeroed() };
        self.overlapped.hEvent = event;

        // SAFETY: buffer and OVERLAPPED are heap allocations owned by `self`,
        // which cancels and drains the read before freeing them in `Drop`
        let ok = unsafe {
            ReadDirectoryChangesW(
                self.dir,
                self.buffer.as_mut_ptr().cast(),
                BUFFER_BYTES as u32,
                i32::from(self.recursive),
                NOTIFY_FILTER,
                ptr::null_mut(),
                &mut *self.overlapped,
                None,
            )
        };
        if ok == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Byte count of a completed read, `None` while it is still pending
    fn completed_bytes(&mut self) -> Option<io::Result<usize>> {
        let mut bytes = 0u32;
        // SAFETY: handles and OVERLAPPED belong to the read issued on `self.dir`
        let ok = unsafe { GetOverlappedResult(self.dir, &*self.overlapped, &mut bytes, 0) };
        if ok != 0 {
            return Some(Ok(bytes as usize));
        }
        // SAFETY: reads the calling thread's last-error slot
        if unsafe { GetLastError() } == ERROR_IO_INCOMPLETE {
            return None;
        }
        Some(Err(io::Error::last_os_error()))
    }

    fn records(&self, bytes: usize) -> &[u8] {
        let len = bytes.min(BUFFER_BYTES);
        // SAFETY: `buffer` holds BUFFER_BYTES initialized bytes
        unsafe { slice::from_raw_parts(self.buffer.as_ptr().cast::<u8>(), len) }
    }
}

impl Drop for OverlappedWatch {
    fn drop(&mut self) {
        let mut bytes = 0u32;
        // SAFETY: the read is cancelled and waited for before its buffers go away
        unsafe {
            CancelIo(self.dir);
            GetOverlappedResult(self.dir, &*self.overlapped, &mut bytes, 1);
            CloseHandle(self.event);
            CloseHandle(self.dir);
        }
    }
}

pub(crate) struct OverlappedBackend;

impl Backend for OverlappedBackend {
    type Native = OverlappedWatch;

    fn new(_config: &EngineConfig) -> DirmonResult<Self> {
        Ok(Self)
    }

    fn arm(&mut self, root_dir: &str, flags: WatchFlags) -> DirmonResult<OverlappedWatch> {
        OverlappedWatch::open(root_dir, flags.contains(WatchFlags::RECURSIVE)).map_err(|source| {
            error!(root = root_dir, error = %source, "ReadDirectoryChangesW registration failed");
            DirmonError::Backend {
                path: PathBuf::from(root_dir),
                source,
            }
        })
    }

    fn poll(&mut self, table: &mut WatchTable<OverlappedWatch>, timeout: Duration) -> Vec<Notification> {
        let mut out = Vec::new();
        for id in wait_completed(table, timeout) {
            let Some(watch) = table.get_mut(id) else {
                continue;
            };
            let moved = service(watch, &mut out);
            if !moved.is_empty() {
                rename_moved_roots(table, id, &moved);
            }
        }
        out
    }

    fn rearm(&mut self, table: &mut WatchTable<OverlappedWatch>) {
        for watch in table.iter_mut() {
            if !watch.native.cycle.take_rearm() {
                continue;
            }
            if let Err(err) = watch.native.issue_read() {
                error!(root = %watch.root_dir, error = %err, "re-arming directory read failed, watch is now inert");
                watch.native.cycle.rearm_failed();
            }
        }
    }

    fn add_subdir(&mut self, _watch: &mut Watch<OverlappedWatch>, _subdir: &str) -> DirmonResult<String> {
        Err(DirmonError::Unsupported {
            operation: "watch_add_subdir",
        })
    }

    fn remove_subdir(
        &mut self,
        _watch: &mut Watch<OverlappedWatch>,
        _subdir: &str,
    ) -> DirmonResult<String> {
        Err(DirmonError::Unsupported {
            operation: "watch_remove_subdir",
        })
    }
}

/// Wait on every live watch's event, at most `MAXIMUM_WAIT_OBJECTS` at a time.
///
/// Sleeps out `timeout` when no wait blocked (every watch inert, or the
/// first wait failed) so the poller never spins.
fn wait_completed(table: &WatchTable<OverlappedWatch>, timeout: Duration) -> Vec<WatchId> {
    let live = waitable(
        table
            .iter()
            .map(|w| ((w.id, w.native.event), w.native.cycle)),
    );

    let mut ready = Vec::new();
    let mut first = None;
    let mut wait_ms = timeout.as_millis().min(u128::from(u32::MAX - 1)) as u32;
    for chunk in live.chunks(MAXIMUM_WAIT_OBJECTS as usize) {
        let handles: Vec<HANDLE> = chunk.iter().map(|(_, h)| *h).collect();
        // SAFETY: every handle is a live event owned by a watch in `table`
        let result =
            unsafe { WaitForMultipleObjects(handles.len() as u32, handles.as_ptr(), 0, wait_ms) };
        // only the first chunk may block
        wait_ms = 0;

        let outcome = wait_outcome(result, chunk.len());
        first.get_or_insert(outcome);
        match outcome {
            WaitOutcome::Signalled(index) => ready.push(chunk[index].0),
            WaitOutcome::TimedOut => {}
            WaitOutcome::Failed => {
                error!(code = result, error = %io::Error::last_os_error(), "waiting on directory events failed");
            }
        }
    }

    if must_idle(live.len(), first) {
        thread::sleep(timeout);
    }
    ready
}

/// Drain one signalled watch into `out`, returning directory moves it saw
fn service(watch: &mut Watch<OverlappedWatch>, out: &mut Vec<Notification>) -> Vec<DirectoryMove> {
    let result = watch.native.completed_bytes();
    let bytes = match watch.native.cycle.complete(result) {
        Completion::Pending => return Vec::new(),
        Completion::Failed(err) => {
            error!(root = %watch.root_dir, error = %err, "directory read failed");
            return Vec::new();
        }
        Completion::Dropped => {
            // the OS dropped the batch; nothing to decode
            trace!(root = %watch.root_dir, "zero-byte completion, events lost");
            return Vec::new();
        }
        Completion::Records(bytes) => bytes,
    };

    let records = parse_records(watch.native.records(bytes));
    let (notes, moved) = watch.native.decoder.decode(
        watch.id,
        &watch.root_dir,
        watch.flags,
        &records,
        lookup_entry,
    );
    out.extend(notes);
    if watch.native.recursive {
        moved
    } else {
        Vec::new()
    }
}

fn rename_moved_roots(table: &mut WatchTable<OverlappedWatch>, id: WatchId, moved: &[DirectoryMove]) {
    let Some(root) = table.get(id).map(|w| w.root_dir.clone()) else {
        return;
    };
    for mv in moved {
        let old_root = path::with_trailing_slash(&path::join(&root, &mv.old_path));
        let new_root = path::with_trailing_slash(&path::join(&root, &mv.new_path));
        let renamed = table.rename_roots(&old_root, &new_root);
        if renamed > 0 {
            debug!(old = %old_root, new = %new_root, renamed, "watch roots followed directory rename");
        }
    }
}
