//! # Arrival tracker
//!
//! The [`ArrivalTracker`] is the local, ordered view of the watched
//! folder. Its size is the amount of messages the watcher considers
//! as already known, which makes the delta with the remote count the
//! range of messages to fetch.

use std::ops::Range;

use crate::envelope::Uid;

/// A tracked message.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Slot {
    /// The message was in the folder before the tracker got
    /// (re)based, its identifier was never fetched.
    Baseline,

    /// The message arrived while watching.
    Arrived(Uid),
}

/// Ordered cache of known messages.
///
/// Positions follow the folder positions: slot `i` stands for the
/// message at position `i`, which is why expunges are absorbed by
/// position.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ArrivalTracker {
    slots: Vec<Slot>,
}

impl ArrivalTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn contains(&self, uid: &Uid) -> bool {
        self.slots.contains(&Slot::Arrived(*uid))
    }

    /// Return the identifiers of arrived messages, in order.
    pub fn uids(&self) -> Vec<Uid> {
        self.slots
            .iter()
            .filter_map(|slot| match slot {
                Slot::Arrived(uid) => Some(*uid),
                Slot::Baseline => None,
            })
            .collect()
    }

    /// Compute the range of positions that are not tracked yet.
    ///
    /// The start is clamped to the remote count, so the range is
    /// empty whenever the tracker is ahead of the remote.
    pub fn delta(&self, remote_count: u32) -> Range<u32> {
        let start = (self.slots.len() as u32).min(remote_count);
        start..remote_count
    }

    /// Append the given identifiers, preserving their order.
    ///
    /// Identifiers already tracked are skipped, so that a retried
    /// fetch does not add the same messages twice. Returns the
    /// identifiers actually added.
    pub fn add(&mut self, uids: impl IntoIterator<Item = Uid>) -> Vec<Uid> {
        let mut added = Vec::new();

        for uid in uids {
            if self.contains(&uid) {
                continue;
            }
            self.slots.push(Slot::Arrived(uid));
            added.push(uid);
        }

        added
    }

    /// Remove the given identifiers.
    ///
    /// Used to roll back the identifiers added by an aborted attempt.
    pub fn remove(&mut self, uids: &[Uid]) {
        self.slots.retain(|slot| match slot {
            Slot::Arrived(uid) => !uids.contains(uid),
            Slot::Baseline => true,
        });
    }

    /// Remove the slot at the given position.
    ///
    /// Mirrors the expunge semantics of the server. Returns `false` if
    /// the position is not tracked.
    pub fn remove_at(&mut self, index: usize) -> bool {
        if index < self.slots.len() {
            self.slots.remove(index);
            true
        } else {
            false
        }
    }

    /// Clear the tracker and rebase it to the given remote count.
    ///
    /// Every message currently in the folder is then considered as
    /// known, including the ones that may have arrived without being
    /// dispatched.
    pub fn resynchronize(&mut self, remote_count: u32) {
        self.slots.clear();
        self.slots.resize(remote_count as usize, Slot::Baseline);
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }
}
