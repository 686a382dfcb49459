//! Cooperative scheduling between the poller and mutating callers
//!
//! Writers (watch, unwatch, subdir changes) announce their intent before
//! taking the table lock. The poller never blocks on that lock: when an
//! intent is pending or the lock is busy it backs off for a fixed interval,
//! so a writer waits at most one poller iteration.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

use crate::config::EngineConfig;

/// Count of writers currently waiting for, or holding, the table lock
#[derive(Debug, Default)]
pub(crate) struct MutationGate {
    pending: AtomicUsize,
}

impl MutationGate {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Raise the intent flag until the returned guard is dropped
    pub(crate) fn announce(&self) -> MutationIntent<'_> {
        self.pending.fetch_add(1, Ordering::AcqRel);
        MutationIntent { gate: self }
    }

    pub(crate) fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire) > 0
    }
}

/// RAII intent; lowering happens on drop so early returns cannot leak it
pub(crate) struct MutationIntent<'a> {
    gate: &'a MutationGate,
}

impl Drop for MutationIntent<'_> {
    fn drop(&mut self) {
        self.gate.pending.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Bounded waits used by the poller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SchedulePolicy {
    /// Longest readiness wait per iteration
    pub wait: Duration,
    /// Sleep when the poller yields
    pub backoff: Duration,
}

impl SchedulePolicy {
    pub(crate) fn from_config(config: &EngineConfig) -> Self {
        Self {
            wait: config.poll_timeout(),
            backoff: config.backoff(),
        }
    }

    pub(crate) fn back_off(&self) {
        thread::sleep(self.backoff);
    }
}

/// Poller-side lock acquisition: never waits, yields to announced writers
pub(crate) fn try_enter<'a, T>(
    gate: &MutationGate,
    lock: &'a ReentrantMutex<T>,
) -> Option<ReentrantMutexGuard<'a, T>> {
    if gate.is_pending() {
        return None;
    }
    lock.try_lock()
}
