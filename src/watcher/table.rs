//! Fixed-capacity registry of active watches
//!
//! Slots are recycled through a free list. Every removal bumps the slot's
//! generation so stale [`WatchId`]s stop resolving instead of aliasing the
//! next watch placed in that slot.

use std::sync::Arc;

use crate::error::{DirmonError, DirmonResult};

use super::event::{WatchEvent, WatchFlags};
use super::id::WatchId;

/// User callback, shared so it can be invoked without holding a table borrow
pub(crate) type Callback = Arc<dyn Fn(&WatchEvent) + Send + Sync + 'static>;

/// One actively monitored root and the native resources behind it
pub(crate) struct Watch<N> {
    pub id: WatchId,
    /// Absolute, slash-normalized, trailing `/`
    pub root_dir: String,
    pub flags: WatchFlags,
    pub callback: Callback,
    pub native: N,
}

struct Slot<N> {
    generation: u32,
    watch: Option<Watch<N>>,
}

pub(crate) struct WatchTable<N> {
    slots: Vec<Slot<N>>,
    free: Vec<usize>,
    len: usize,
    capacity: usize,
}

impl<N> WatchTable<N> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            len: 0,
            capacity,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Fail early, before any native resource is acquired for a new watch
    pub(crate) fn ensure_capacity(&self) -> DirmonResult<()> {
        if self.len >= self.capacity {
            return Err(DirmonError::CapacityExceeded { max: self.capacity });
        }
        Ok(())
    }

    pub(crate) fn insert(
        &mut self,
        root_dir: String,
        flags: WatchFlags,
        callback: Callback,
        native: N,
    ) -> DirmonResult<WatchId> {
        self.ensure_capacity()?;

        let slot = match self.free.pop() {
            Some(slot) => slot,
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    watch: None,
                });
                self.slots.len() - 1
            }
        };

        let id = WatchId::new(slot, self.slots[slot].generation);
        debug_assert!(self.slots[slot].watch.is_none());
        self.slots[slot].watch = Some(Watch {
            id,
            root_dir,
            flags,
            callback,
            native,
        });
        self.len += 1;
        Ok(id)
    }

    /// Detach a watch; dropping the returned value releases its native handles
    pub(crate) fn remove(&mut self, id: WatchId) -> Option<Watch<N>> {
        let slot = self.slots.get_mut(id.slot())?;
        if slot.generation != id.generation() {
            return None;
        }
        let watch = slot.watch.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.slot());
        self.len -= 1;
        Some(watch)
    }

    pub(crate) fn get(&self, id: WatchId) -> Option<&Watch<N>> {
        let slot = self.slots.get(id.slot())?;
        if slot.generation != id.generation() {
            return None;
        }
        slot.watch.as_ref()
    }

    pub(crate) fn get_mut(&mut self, id: WatchId) -> Option<&mut Watch<N>> {
        let slot = self.slots.get_mut(id.slot())?;
        if slot.generation != id.generation() {
            return None;
        }
        slot.watch.as_mut()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Watch<N>> {
        self.slots.iter().filter_map(|s| s.watch.as_ref())
    }

    #[cfg_attr(not(windows), allow(dead_code))]
    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Watch<N>> {
        self.slots.iter_mut().filter_map(|s| s.watch.as_mut())
    }

    /// Re-point every watch rooted at `old_root` to `new_root`.
    ///
    /// Both arguments are trailing-slash directory strings. Returns the number
    /// of watches rewritten.
    #[cfg_attr(not(windows), allow(dead_code))]
    pub(crate) fn rename_roots(&mut self, old_root: &str, new_root: &str) -> usize {
        let mut renamed = 0;
        for watch in self.iter_mut() {
            if watch.root_dir == old_root {
                watch.root_dir = new_root.to_string();
                renamed += 1;
            }
        }
        renamed
    }

    /// Remove every watch, returning them so the caller controls drop order
    pub(crate) fn drain(&mut self) -> Vec<Watch<N>> {
        let ids: Vec<WatchId> = self.iter().map(|w| w.id).collect();
        ids.into_iter().filter_map(|id| self.remove(id)).collect()
    }
}
