//! Directory watch engine
//!
//! - Watch table with generation-tagged ids
//! - Event normalization for inotify batches (100ms debounce)
//! - Background poller delivering unified events to callbacks
//! - Dynamic subdirectory management

mod engine;
pub(crate) mod event;
pub(crate) mod id;
pub(crate) mod normalizer;
pub(crate) mod schedule;
pub(crate) mod table;

pub use engine::Engine;
pub use event::{WatchAction, WatchEvent, WatchFlags};
pub use id::WatchId;
