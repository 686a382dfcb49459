//! Batch repair of raw inotify event streams
//!
//! Raw kernel events are buffered for a debounce window and then rewritten
//! as a batch before anything reaches a callback:
//! - repeated MODIFY of a path collapses to the last one
//! - CREATE(tmp), MOVED_FROM(tmp), MOVED_TO(f) becomes MODIFY(f) (editor save)
//! - CREATE followed by MODIFY of the same path reports only CREATE
//! - MOVED_FROM without a matching MOVED_TO becomes DELETE (move to trash)
//! - MOVED_TO without a matching MOVED_FROM becomes CREATE (restore)
//!
//! A surviving MOVED_FROM/MOVED_TO pair is emitted as one MOVE. Events are
//! matched only within the same watch.

#![cfg_attr(not(target_os = "linux"), allow(dead_code))]

use std::mem;
use std::time::{Duration, Instant};

use super::event::{Notification, WatchAction};
use super::id::WatchId;

/// Kernel-level event kind, before normalization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RawKind {
    Create,
    Delete,
    Modify,
    MovedFrom,
    MovedTo,
}

/// One buffered kernel event
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RawEvent {
    /// Relative to the owning watch's root
    pub path: String,
    pub kind: RawKind,
    pub cookie: u32,
    pub watch_id: WatchId,
    pub suppressed: bool,
}

impl RawEvent {
    pub(crate) fn new(watch_id: WatchId, kind: RawKind, path: impl Into<String>, cookie: u32) -> Self {
        Self {
            path: path.into(),
            kind,
            cookie,
            watch_id,
            suppressed: false,
        }
    }

    fn same_subject(&self, other: &RawEvent) -> bool {
        self.watch_id == other.watch_id && self.path == other.path
    }

    fn same_move(&self, other: &RawEvent) -> bool {
        self.watch_id == other.watch_id && self.cookie == other.cookie
    }
}

/// Raw events collected across all watches during one debounce window
#[derive(Debug, Default)]
pub(crate) struct EventBatch {
    events: Vec<RawEvent>,
    opened_at: Option<Instant>,
}

impl EventBatch {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// The window opens with the first event pushed into an empty batch
    pub(crate) fn push(&mut self, event: RawEvent, now: Instant) {
        if self.events.is_empty() {
            self.opened_at = Some(now);
        }
        self.events.push(event);
    }

    pub(crate) fn len(&self) -> usize {
        self.events.len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub(crate) fn is_due(&self, now: Instant, window: Duration) -> bool {
        match self.opened_at {
            Some(opened) => !self.events.is_empty() && now.duration_since(opened) >= window,
            None => false,
        }
    }

    pub(crate) fn take(&mut self) -> Vec<RawEvent> {
        self.opened_at = None;
        mem::take(&mut self.events)
    }
}

/// Rewrite a batch and turn it into notifications, in arrival order
pub(crate) fn normalize(mut events: Vec<RawEvent>) -> Vec<Notification> {
    rewrite(&mut events);
    dispatch(&events)
}

fn rewrite(events: &mut [RawEvent]) {
    for i in 0..events.len() {
        if events[i].suppressed {
            continue;
        }

        match events[i].kind {
            RawKind::Modify => {
                let superseded = events[i + 1..]
                    .iter()
                    .any(|e| e.kind == RawKind::Modify && e.same_subject(&events[i]));
                if superseded {
                    events[i].suppressed = true;
                }
            }
            RawKind::Create => rewrite_after_create(events, i),
            RawKind::MovedFrom => {
                if find_moved_to(events, i).is_none() {
                    events[i].kind = RawKind::Delete;
                }
            }
            RawKind::MovedTo => {
                let has_origin = events[..i]
                    .iter()
                    .any(|e| e.kind == RawKind::MovedFrom && e.same_move(&events[i]));
                if !has_origin {
                    events[i].kind = RawKind::Create;
                }
            }
            RawKind::Delete => {}
        }
    }
}

fn rewrite_after_create(events: &mut [RawEvent], create: usize) {
    for j in create + 1..events.len() {
        if !events[j].same_subject(&events[create]) {
            continue;
        }
        match events[j].kind {
            RawKind::MovedFrom => {
                if let Some(k) = find_moved_to(events, j) {
                    // temp file written then renamed over the target
                    events[k].kind = RawKind::Modify;
                    events[create].suppressed = true;
                    events[j].suppressed = true;
                }
                // the path moved away; later events are about something else
                break;
            }
            RawKind::Modify => events[j].suppressed = true,
            _ => {}
        }
    }
}

fn find_moved_to(events: &[RawEvent], moved_from: usize) -> Option<usize> {
    let origin = &events[moved_from];
    events[moved_from + 1..]
        .iter()
        .position(|e| e.kind == RawKind::MovedTo && e.same_move(origin))
        .map(|offset| moved_from + 1 + offset)
}

fn dispatch(events: &[RawEvent]) -> Vec<Notification> {
    let mut out = Vec::with_capacity(events.len());

    for (i, ev) in events.iter().enumerate() {
        if ev.suppressed {
            continue;
        }
        let action = match ev.kind {
            RawKind::Create => WatchAction::Create,
            RawKind::Modify => WatchAction::Modify,
            RawKind::Delete => WatchAction::Delete,
            RawKind::MovedFrom => {
                if let Some(k) = find_moved_to(events, i) {
                    out.push(Notification::moved(
                        ev.watch_id,
                        ev.path.clone(),
                        events[k].path.clone(),
                    ));
                }
                continue;
            }
            // emitted together with its MOVED_FROM
            RawKind::MovedTo => continue,
        };
        out.push(Notification::new(ev.watch_id, action, ev.path.clone()));
    }

    out
}
