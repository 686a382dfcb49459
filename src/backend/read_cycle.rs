//! Read-cycle bookkeeping for overlapped directory reads
//!
//! Each watch moves through: read in flight (waitable), completed and waiting
//! for re-arm (serviced), and back. A re-arm that fails parks the watch for
//! good (inert). The transitions and the wait-result decoding are plain data
//! so they run on every platform.

#![cfg_attr(not(windows), allow(dead_code))]

use std::io;

/// `WAIT_OBJECT_0`
pub(crate) const WAIT_OBJECT_0: u32 = 0x0;
/// `WAIT_TIMEOUT`
pub(crate) const WAIT_TIMEOUT: u32 = 0x102;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct ReadCycle {
    serviced: bool,
    inert: bool,
}

/// What a signalled read turned out to hold
#[derive(Debug)]
pub(crate) enum Completion {
    /// Still in flight; nothing to do yet
    Pending,
    /// The read itself failed
    Failed(io::Error),
    /// Zero bytes: the OS dropped the batch
    Dropped,
    /// This many bytes of records are ready to decode
    Records(usize),
}

impl ReadCycle {
    /// A read is in flight and the watch takes part in the next wait
    pub(crate) fn is_waitable(self) -> bool {
        !self.serviced && !self.inert
    }

    pub(crate) fn is_inert(self) -> bool {
        self.inert
    }

    /// Record the result of `GetOverlappedResult` for a signalled watch
    pub(crate) fn complete(&mut self, result: Option<io::Result<usize>>) -> Completion {
        let completion = match result {
            None => return Completion::Pending,
            Some(Err(err)) => Completion::Failed(err),
            Some(Ok(0)) => Completion::Dropped,
            Some(Ok(bytes)) => Completion::Records(bytes),
        };
        self.serviced = true;
        completion
    }

    /// True once per completed read: the caller must issue the next one
    pub(crate) fn take_rearm(&mut self) -> bool {
        if !self.serviced || self.inert {
            return false;
        }
        self.serviced = false;
        true
    }

    pub(crate) fn rearm_failed(&mut self) {
        self.inert = true;
    }
}

/// Keys of the watches whose read is still in flight
pub(crate) fn waitable<K: Copy>(cycles: impl IntoIterator<Item = (K, ReadCycle)>) -> Vec<K> {
    cycles
        .into_iter()
        .filter(|(_, cycle)| cycle.is_waitable())
        .map(|(key, _)| key)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitOutcome {
    /// Index into the handle slice that was waited on
    Signalled(usize),
    TimedOut,
    Failed,
}

/// Decode a `WaitForMultipleObjects` return value for `handles` handles
pub(crate) fn wait_outcome(result: u32, handles: usize) -> WaitOutcome {
    if result == WAIT_TIMEOUT {
        return WaitOutcome::TimedOut;
    }
    match result.checked_sub(WAIT_OBJECT_0) {
        Some(index) if (index as usize) < handles => WaitOutcome::Signalled(index as usize),
        _ => WaitOutcome::Failed,
    }
}

/// The poller must sleep out its timeout itself when no wait actually blocked
pub(crate) fn must_idle(waitable: usize, first: Option<WaitOutcome>) -> bool {
    waitable == 0 || first == Some(WaitOutcome::Failed)
}
