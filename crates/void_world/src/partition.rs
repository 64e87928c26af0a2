//! Partitions
//!
//! A partition is a streamable load unit. Outer partitions may contain
//! nested shells, which stream separately but share the outer partition's
//! identity for linking and its lock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use void_link::{LinkableId, PartitionId};

/// Residency of a partition
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartitionState {
    #[default]
    Unloaded,
    /// Queued on a load worker, not yet bound
    Loading,
    Loaded,
    /// Saving and detaching its items
    Unloading,
    /// The last load could not be bound; may be requested again
    Failed,
}

impl PartitionState {
    /// Check if a load may be requested
    pub fn can_load(&self) -> bool {
        matches!(self, PartitionState::Unloaded | PartitionState::Failed)
    }
}

/// Edit lock shared by an outer partition and its shells
#[derive(Clone, Debug, Default)]
pub struct PartitionLock(Arc<AtomicBool>);

impl PartitionLock {
    pub fn is_locked(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn set_locked(&self, locked: bool) {
        self.0.store(locked, Ordering::Release);
    }
}

/// Bookkeeping for one load unit
#[derive(Debug)]
pub struct Partition {
    pub id: PartitionId,
    /// Enclosing partition, for shells
    pub outer: Option<PartitionId>,
    pub state: PartitionState,
    /// Resident items, in placement order
    pub items: Vec<LinkableId>,
    lock: PartitionLock,
}

impl Partition {
    /// An empty outer partition, ready for editing
    pub fn new(id: PartitionId) -> Self {
        Self {
            id,
            outer: None,
            state: PartitionState::Loaded,
            items: Vec::new(),
            lock: PartitionLock::default(),
        }
    }

    /// An empty shell nested in `outer`, sharing its lock
    pub fn shell(id: PartitionId, outer: &Partition) -> Self {
        Self {
            id,
            outer: Some(outer.outside().clone()),
            state: PartitionState::Loaded,
            items: Vec::new(),
            lock: outer.lock.clone(),
        }
    }

    /// Partition named by links to items placed here
    pub fn outside(&self) -> &PartitionId {
        self.outer.as_ref().unwrap_or(&self.id)
    }

    /// Check if this is a shell of `outer`
    pub fn is_shell_of(&self, outer: &PartitionId) -> bool {
        self.outer.as_ref() == Some(outer)
    }

    pub fn lock(&self) -> &PartitionLock {
        &self.lock
    }

    pub fn is_loaded(&self) -> bool {
        self.state == PartitionState::Loaded
    }

    /// Bind the items of a finished load
    pub fn bind(&mut self, items: Vec<LinkableId>) {
        self.state = PartitionState::Loaded;
        self.items = items;
    }

    pub fn fail(&mut self) {
        self.state = PartitionState::Failed;
        self.items.clear();
    }

    pub fn finish_unloading(&mut self) {
        self.state = PartitionState::Unloaded;
        self.items.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(name: &str) -> PartitionId {
        PartitionId::new(name).unwrap()
    }

    #[test]
    fn test_failed_load_can_be_retried() {
        let mut partition = Partition::new(id("cell"));
        assert!(!partition.state.can_load());

        partition.state = PartitionState::Loading;
        partition.fail();
        assert!(partition.state.can_load());
        assert!(!partition.is_loaded());

        partition.bind(vec![LinkableId::from_u128(1)]);
        assert!(partition.is_loaded());
        partition.state = PartitionState::Unloading;
        assert!(!partition.state.can_load());
        partition.finish_unloading();
        assert!(partition.items.is_empty());
        assert!(partition.state.can_load());
    }

    #[test]
    fn test_shell_shares_outer_lock() {
        let outer = Partition::new(id("cell"));
        let shell = Partition::shell(id("cell/house"), &outer);
        assert_eq!(shell.outside(), &id("cell"));
        assert!(shell.is_shell_of(&id("cell")));
        assert!(!outer.is_shell_of(&id("cell")));

        outer.lock().set_locked(true);
        assert!(shell.lock().is_locked());
    }
}
