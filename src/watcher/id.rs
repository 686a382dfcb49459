//! Generation-tagged watch identifiers

use std::fmt;
use std::num::NonZeroU64;

use serde::{Serialize, Serializer};

/// Identifies one registered watch.
///
/// The low 32 bits hold `slot + 1`, the high 32 bits the slot's generation.
/// A slot's generation is bumped every time it is freed, so an id kept
/// after `unwatch` can never name a newer watch that reused the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchId(NonZeroU64);

impl WatchId {
    pub(crate) fn new(slot: usize, generation: u32) -> Self {
        let low = slot as u64 + 1;
        debug_assert!(low <= u64::from(u32::MAX));
        let raw = (u64::from(generation) << 32) | low;
        // low >= 1, so raw is never zero
        Self(NonZeroU64::new(raw).unwrap_or(NonZeroU64::MIN))
    }

    /// Rebuild an id from its raw value; `None` for 0, the reserved invalid id.
    pub fn from_raw(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).filter(|r| r.get() & 0xffff_ffff != 0).map(Self)
    }

    /// Opaque positive integer form of the id
    pub fn raw(self) -> u64 {
        self.0.get()
    }

    pub(crate) fn slot(self) -> usize {
        ((self.0.get() & 0xffff_ffff) - 1) as usize
    }

    pub(crate) fn generation(self) -> u32 {
        (self.0.get() >> 32) as u32
    }
}

impl fmt::Display for WatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw())
    }
}

impl Serialize for WatchId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.raw())
    }
}
