//! Pending link work queues.

use serde::{Deserialize, Serialize};

use crate::id::{LinkableId, PartitionId};

/// A link waiting for one of its endpoints to become resident.
///
/// The partitions are cached when the entry is queued and corrected when
/// an endpoint changes partition.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PendingLink {
    pub from: LinkableId,
    pub from_partition: PartitionId,
    pub to: LinkableId,
    pub to_partition: PartitionId,
}

impl PendingLink {
    pub fn new(
        from: LinkableId,
        from_partition: PartitionId,
        to: LinkableId,
        to_partition: PartitionId,
    ) -> Self {
        Self {
            from,
            from_partition,
            to,
            to_partition,
        }
    }

    /// Both endpoints are cached in the same outer partition
    pub fn is_same_partition(&self) -> bool {
        self.from_partition == self.to_partition
    }

    /// Point every endpoint named `id` at `partition`
    pub(crate) fn relocate(&mut self, id: LinkableId, partition: &PartitionId) -> bool {
        let mut changed = false;
        if self.from == id && &self.from_partition != partition {
            self.from_partition = partition.clone();
            changed = true;
        }
        if self.to == id && &self.to_partition != partition {
            self.to_partition = partition.clone();
            changed = true;
        }
        changed
    }

    pub(crate) fn rename(&mut self, old: LinkableId, new: LinkableId) {
        if self.from == old {
            self.from = new;
        }
        if self.to == old {
            self.to = new;
        }
    }
}

/// Which of the four queues an entry sits in
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueueKind {
    /// Forward links whose target is not resident yet
    OutstandingLinks,
    /// Back links whose referrer is not resident yet
    OutstandingBackLinks,
    /// Forward links shown as a placeholder on the referrer
    BoundaryLinks,
    /// Back links shown as a placeholder on the target
    BoundaryBackLinks,
}

/// Ordered queue of pending links without duplicates
#[derive(Clone, Debug, Default)]
pub(crate) struct LinkQueue {
    entries: Vec<PendingLink>,
}

impl LinkQueue {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, entry: &PendingLink) -> bool {
        self.entries.contains(entry)
    }

    /// Append unless an identical entry is queued
    pub fn push_unique(&mut self, entry: PendingLink) -> bool {
        if self.contains(&entry) {
            false
        } else {
            self.entries.push(entry);
            true
        }
    }

    pub fn get(&self, index: usize) -> Option<&PendingLink> {
        self.entries.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut PendingLink> {
        self.entries.get_mut(index)
    }

    pub fn remove(&mut self, index: usize) -> PendingLink {
        self.entries.remove(index)
    }

    pub fn retain(&mut self, f: impl FnMut(&PendingLink) -> bool) {
        self.entries.retain(f);
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingLink> {
        self.entries.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut PendingLink> {
        self.entries.iter_mut()
    }

    pub fn to_vec(&self) -> Vec<PendingLink> {
        self.entries.clone()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Queue lengths at a point in time
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueCounts {
    pub outstanding_links: usize,
    pub outstanding_back_links: usize,
    pub boundary_links: usize,
    pub boundary_back_links: usize,
}

impl QueueCounts {
    pub fn total(&self) -> usize {
        self.outstanding_links
            + self.outstanding_back_links
            + self.boundary_links
            + self.boundary_back_links
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// Work that does not depend on an unloaded partition
    pub fn outstanding(&self) -> usize {
        self.outstanding_links + self.outstanding_back_links
    }
}
