//! # Watch events
//!
//! Events fired along the watcher lifecycle. They mirror the tracing
//! events, for callers that want to react to them (telemetry, UI).

use std::{ops::Range, sync::Arc};

use tracing::{debug, warn};

use crate::AnyResult;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum WatchEvent {
    /// The watcher started, the folder has been baselined to the
    /// given count.
    Started { folder: String, count: u32 },

    /// New messages have been detected in the given range.
    Triggered { range: Range<u32> },

    /// The given amount of descriptors has been fetched.
    Fetched { count: usize },

    /// A batch of the given size has been handled.
    Dispatched { count: usize },

    /// The given attempt failed, the session is being reconnected.
    Retrying { attempt: u8, max_attempts: u8 },

    /// The tracker has been rebased. Messages that arrived while
    /// local and remote states diverged may not have been
    /// dispatched.
    Resynchronized { from: u32, to: u32 },

    /// The watcher stopped.
    Stopped,
}

/// The watch event handler alias.
pub type WatchEventHandler = Arc<dyn Fn(WatchEvent) -> AnyResult<()> + Send + Sync>;

pub(crate) fn default_handler() -> WatchEventHandler {
    Arc::new(|_| Ok(()))
}

/// Fire the given event, a failing handler never stops the watcher.
pub(crate) fn fire(handler: &WatchEventHandler, event: WatchEvent) {
    if let Err(err) = handler(event.clone()) {
        warn!("cannot fire event {event:?}, skipping it: {err}");
        debug!("{err:?}");
    }
}
