//! # Folder monitor
//!
//! The [`FolderMonitor`] receives the folder changes pushed by the
//! server and turns them into tracker updates and wake signals. It is
//! called from the session read path, while the session is busy, so
//! it only touches its own lightweight state and never calls back
//! into the session.

use std::{
    ops::Range,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::{
    envelope::{Flags, Uid},
    tracker::ArrivalTracker,
};

/// A folder change pushed by the server.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FolderChange {
    /// The amount of messages in the folder changed.
    CountChanged { count: u32 },

    /// The message at the given 0-based position got expunged.
    MessageExpunged { index: u32 },

    /// The flags of the message at the given 0-based position
    /// changed.
    FlagsChanged { index: u32, flags: Flags },
}

/// A folder change and its sequence number.
///
/// Sequence numbers are assigned by the session in delivery order. A
/// change that is not newer than the last applied one is a replay.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FolderEvent {
    pub seq: u64,
    pub change: FolderChange,
}

impl FolderEvent {
    pub fn new(seq: u64, change: FolderChange) -> Self {
        Self { seq, change }
    }

    pub fn count_changed(seq: u64, count: u32) -> Self {
        Self::new(seq, FolderChange::CountChanged { count })
    }

    pub fn message_expunged(seq: u64, index: u32) -> Self {
        Self::new(seq, FolderChange::MessageExpunged { index })
    }

    pub fn flags_changed(seq: u64, index: u32, flags: impl Into<Flags>) -> Self {
        let flags = flags.into();
        Self::new(seq, FolderChange::FlagsChanged { index, flags })
    }
}

/// Receiver of folder changes, registered on the session.
pub trait FolderListener: Send + Sync {
    fn on_folder_event(&self, event: FolderEvent);
}

/// The outcome of a reconciliation between the tracker and a fresh
/// remote count.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Reconciliation {
    /// The tracker matches the remote count.
    InSync,

    /// The remote count is greater than the tracker: an arrival is
    /// now pending.
    Arrived,

    /// The remote count is lower than the tracker: the tracker got
    /// rebased from `from` to `to` messages.
    Resynchronized { from: u32, to: u32 },
}

#[derive(Debug, Default)]
struct MonitorState {
    tracker: ArrivalTracker,
    remote_count: u32,
    arrival_pending: bool,
    processing: bool,
    last_seq: Option<u64>,
    renew: Option<CancellationToken>,
}

impl MonitorState {
    fn mark_arrival(&mut self) {
        self.arrival_pending = true;

        // ends the current idle wait, the session cannot be used
        // from here to fetch the new messages
        if let Some(renew) = &self.renew {
            renew.cancel();
        }
    }
}

/// The folder monitor.
///
/// Cheap to clone: clones share the same state.
#[derive(Clone, Debug)]
pub struct FolderMonitor {
    folder: Arc<str>,
    state: Arc<Mutex<MonitorState>>,
}

impl FolderMonitor {
    pub fn new(folder: impl AsRef<str>) -> Self {
        Self {
            folder: Arc::from(folder.as_ref()),
            state: Default::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn folder(&self) -> &str {
        &self.folder
    }

    /// Apply the given folder event.
    ///
    /// Returns `false` if the event was a replay and got ignored.
    pub fn apply(&self, event: FolderEvent) -> bool {
        let folder = &*self.folder;
        let mut state = self.lock();

        if matches!(state.last_seq, Some(last) if event.seq <= last) {
            trace!(folder, seq = event.seq, "skipping replayed folder event");
            return false;
        }
        state.last_seq = Some(event.seq);

        match event.change {
            FolderChange::CountChanged { count } => {
                let tracked = state.tracker.len() as u32;
                state.remote_count = count;

                if count > tracked {
                    debug!(
                        folder,
                        count,
                        tracked,
                        "message count increased by {}",
                        count - tracked
                    );
                    state.mark_arrival();
                }
            }
            FolderChange::MessageExpunged { index } => {
                if state.tracker.remove_at(index as usize) {
                    trace!(folder, index, "message expunged");
                }
                state.remote_count = state.remote_count.saturating_sub(1);
            }
            FolderChange::FlagsChanged { index, flags } => {
                trace!(folder, index, "flags changed for message: {flags}");
            }
        }

        true
    }

    /// Rebase the tracker to the given remote count.
    ///
    /// Used at start time: messages already in the folder are never
    /// considered as new.
    pub fn baseline(&self, count: u32) {
        let mut state = self.lock();
        state.tracker.resynchronize(count);
        state.remote_count = count;
        state.arrival_pending = false;
    }

    /// Reconcile the tracker with a fresh remote count.
    pub fn reconcile(&self, count: u32) -> Reconciliation {
        let mut state = self.lock();
        let tracked = state.tracker.len() as u32;
        state.remote_count = count;

        if count > tracked {
            state.mark_arrival();
            Reconciliation::Arrived
        } else if count < tracked {
            state.tracker.resynchronize(count);
            Reconciliation::Resynchronized {
                from: tracked,
                to: count,
            }
        } else {
            Reconciliation::InSync
        }
    }

    /// Rebase the tracker to the last known remote count if both
    /// diverged while no arrival is pending.
    pub fn resynchronize_if_diverged(&self) -> Option<Reconciliation> {
        let mut state = self.lock();
        let tracked = state.tracker.len() as u32;
        let count = state.remote_count;

        if state.arrival_pending || state.processing || tracked == count {
            return None;
        }

        state.tracker.resynchronize(count);
        Some(Reconciliation::Resynchronized {
            from: tracked,
            to: count,
        })
    }

    /// Attach the renewal token of the current idle wait, so that an
    /// arrival can end it.
    ///
    /// If an arrival is already pending, the token is cancelled
    /// straight away.
    pub fn arm(&self, renew: &CancellationToken) {
        let mut state = self.lock();
        if state.arrival_pending {
            renew.cancel();
        }
        state.renew = Some(renew.clone());
    }

    pub fn disarm(&self) {
        self.lock().renew = None;
    }

    pub fn is_arrival_pending(&self) -> bool {
        self.lock().arrival_pending
    }

    pub fn is_processing(&self) -> bool {
        self.lock().processing
    }

    /// Switch from triggered to processing.
    ///
    /// Returns `false` if no arrival is pending or if a pass is
    /// already running. Arrivals signalled during a pass stay pending
    /// and are picked up by the next call once the pass ended.
    pub fn begin_processing(&self) -> bool {
        let mut state = self.lock();
        if !state.arrival_pending || state.processing {
            return false;
        }
        state.arrival_pending = false;
        state.processing = true;
        true
    }

    pub fn end_processing(&self) {
        self.lock().processing = false;
    }

    /// Return the range of positions to fetch.
    pub fn delta(&self) -> Range<u32> {
        let state = self.lock();
        state.tracker.delta(state.remote_count)
    }

    pub fn remote_count(&self) -> u32 {
        self.lock().remote_count
    }

    pub fn tracked(&self) -> usize {
        self.lock().tracker.len()
    }

    pub fn tracked_uids(&self) -> Vec<Uid> {
        self.lock().tracker.uids()
    }

    /// Add the given identifiers to the tracker, returning the ones
    /// actually added.
    pub fn track(&self, uids: impl IntoIterator<Item = Uid>) -> Vec<Uid> {
        self.lock().tracker.add(uids)
    }

    /// Remove the given identifiers from the tracker.
    pub fn untrack(&self, uids: &[Uid]) {
        if !uids.is_empty() {
            self.lock().tracker.remove(uids);
        }
    }

    /// Tear down the whole state.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.tracker.clear();
        state.remote_count = 0;
        state.arrival_pending = false;
        state.processing = false;
        state.last_seq = None;
        state.renew = None;
    }
}

impl FolderListener for FolderMonitor {
    fn on_folder_event(&self, event: FolderEvent) {
        self.apply(event);
    }
}
