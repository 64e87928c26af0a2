//! Link manager
//!
//! Coordinates links between linkables across streamed partitions. The
//! manager keeps a registry of resident linkables, a cache of their last
//! known partitions, and four work queues:
//!
//! - outstanding links: forward references whose target is not resident
//! - outstanding back links: back-links whose referrer is not resident
//! - boundary links: forward references shown as a placeholder
//! - boundary back links: back-links shown as a placeholder
//!
//! [`LinkManager::tick`] drains the queues within a time budget. Every
//! structural edit goes through the public API, which records exactly one
//! inverse operation with the undo sink.
//!
//! Each structure has its own lock. When more than one is needed they are
//! taken in this order: outstanding links, outstanding back links,
//! boundary links, boundary back links, registry, location cache. No lock
//! is held while calling into the loader.

mod edit;
mod queue;
mod residency;
mod tick;

pub use queue::{PendingLink, QueueCounts, QueueKind};
pub use tick::TickStats;

use std::collections::HashMap;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::config::LinkManagerConfig;
use crate::error::{LinkError, Result};
use crate::id::{LinkRef, LinkableId, PartitionId};
use crate::link::LinkDirection;
use crate::linkable::Linkable;
use crate::loader::{PartitionLoader, SynchronousGuard};
use crate::property;
use crate::undo::UndoSink;

use queue::LinkQueue;

/// Coordinator of every link between resident linkables.
pub struct LinkManager {
    config: LinkManagerConfig,
    loader: Arc<dyn PartitionLoader>,
    undo: Arc<dyn UndoSink>,
    registry: RwLock<HashMap<LinkableId, Arc<Linkable>>>,
    location_cache: Mutex<HashMap<LinkableId, PartitionId>>,
    outstanding_links: Mutex<LinkQueue>,
    outstanding_back_links: Mutex<LinkQueue>,
    boundary_links: Mutex<LinkQueue>,
    boundary_back_links: Mutex<LinkQueue>,
    synchronous_depth: AtomicUsize,
}

impl LinkManager {
    /// Create a manager streaming through `loader` and recording inverse
    /// operations with `undo`
    pub fn new(
        config: LinkManagerConfig,
        loader: Arc<dyn PartitionLoader>,
        undo: Arc<dyn UndoSink>,
    ) -> Self {
        Self {
            config,
            loader,
            undo,
            registry: RwLock::new(HashMap::new()),
            location_cache: Mutex::new(HashMap::new()),
            outstanding_links: Mutex::new(LinkQueue::default()),
            outstanding_back_links: Mutex::new(LinkQueue::default()),
            boundary_links: Mutex::new(LinkQueue::default()),
            boundary_back_links: Mutex::new(LinkQueue::default()),
            synchronous_depth: AtomicUsize::new(0),
        }
    }

    pub fn config(&self) -> &LinkManagerConfig {
        &self.config
    }

    pub fn loader(&self) -> &Arc<dyn PartitionLoader> {
        &self.loader
    }

    // ========================================================================
    // Registry
    // ========================================================================

    /// Check if a linkable with `id` is resident
    pub fn is_registered(&self, id: LinkableId) -> bool {
        self.registry.read().contains_key(&id)
    }

    /// The resident linkable with `id`
    pub fn get_registered(&self, id: LinkableId) -> Option<Arc<Linkable>> {
        self.registry.read().get(&id).cloned()
    }

    /// Number of resident linkables
    pub fn registered_count(&self) -> usize {
        self.registry.read().len()
    }

    /// Check that `linkable` itself (not another object with its id) is
    /// resident
    pub(crate) fn is_registered_as(&self, linkable: &Arc<Linkable>) -> bool {
        self.registry
            .read()
            .get(&linkable.identifier())
            .map_or(false, |existing| Arc::ptr_eq(existing, linkable))
    }

    pub(crate) fn ensure_registered(&self, linkable: &Arc<Linkable>) -> Result<()> {
        if self.is_registered_as(linkable) {
            Ok(())
        } else {
            let id = linkable.identifier();
            log::error!("Object {} is not registered with the link manager", id);
            Err(LinkError::NotRegistered(id))
        }
    }

    /// Last partition recorded for `id`
    pub fn cached_location(&self, id: LinkableId) -> Option<PartitionId> {
        self.location_cache.lock().get(&id).cloned()
    }

    /// Current outer partition of `linkable`, falling back to the cache
    pub(crate) fn location_of(&self, linkable: &Linkable) -> Option<PartitionId> {
        linkable
            .outside_partition()
            .or_else(|| self.cached_location(linkable.identifier()))
    }

    pub(crate) fn link_ref_of(&self, linkable: &Linkable) -> Result<LinkRef> {
        let id = linkable.identifier();
        self.location_of(linkable)
            .map(|partition| LinkRef::new(id, partition))
            .ok_or(LinkError::NotPlaced(id))
    }

    /// Forget every resident object and every pending link
    pub fn reset(&self) {
        self.outstanding_links.lock().clear();
        self.outstanding_back_links.lock().clear();
        self.boundary_links.lock().clear();
        self.boundary_back_links.lock().clear();
        self.registry.write().clear();
        self.location_cache.lock().clear();
    }

    // ========================================================================
    // Queues
    // ========================================================================

    fn queue(&self, kind: QueueKind) -> &Mutex<LinkQueue> {
        match kind {
            QueueKind::OutstandingLinks => &self.outstanding_links,
            QueueKind::OutstandingBackLinks => &self.outstanding_back_links,
            QueueKind::BoundaryLinks => &self.boundary_links,
            QueueKind::BoundaryBackLinks => &self.boundary_back_links,
        }
    }

    /// Snapshot of one queue
    pub fn pending(&self, kind: QueueKind) -> Vec<PendingLink> {
        self.queue(kind).lock().to_vec()
    }

    pub fn queue_counts(&self) -> QueueCounts {
        QueueCounts {
            outstanding_links: self.outstanding_links.lock().len(),
            outstanding_back_links: self.outstanding_back_links.lock().len(),
            boundary_links: self.boundary_links.lock().len(),
            boundary_back_links: self.boundary_back_links.lock().len(),
        }
    }

    /// Check if every queue is empty
    pub fn is_idle(&self) -> bool {
        self.queue_counts().is_empty()
    }

    /// Queue a forward link unless it is already pending
    pub(crate) fn add_pending_link(&self, entry: PendingLink) {
        if entry.from == entry.to {
            return;
        }
        let mut outstanding = self.outstanding_links.lock();
        let boundary = self.boundary_links.lock();
        if !boundary.contains(&entry) {
            outstanding.push_unique(entry);
        }
    }

    /// Queue a back link unless it is already pending
    pub(crate) fn add_pending_back_link(&self, entry: PendingLink) {
        if entry.from == entry.to {
            return;
        }
        let mut outstanding = self.outstanding_back_links.lock();
        let boundary = self.boundary_back_links.lock();
        if !boundary.contains(&entry) {
            outstanding.push_unique(entry);
        }
    }

    /// Drop every queued entry anchored at `linkable`
    pub fn remove_from_lists(&self, linkable: &Linkable) {
        let id = linkable.identifier();
        self.outstanding_links.lock().retain(|e| e.from != id);
        self.outstanding_back_links.lock().retain(|e| e.to != id);
        self.boundary_links.lock().retain(|e| e.from != id);
        self.boundary_back_links.lock().retain(|e| e.to != id);
    }

    // ========================================================================
    // Residency
    // ========================================================================

    /// Make the object `id` resident, loading `partition` synchronously
    /// if needed.
    ///
    /// Returns `None` (and logs) if the object never appears.
    pub fn force_load(&self, id: LinkableId, partition: &PartitionId) -> Option<Arc<Linkable>> {
        if id.is_nil() {
            return None;
        }
        if let Some(linkable) = self.get_registered(id) {
            return Some(linkable);
        }

        let _synchronous = SynchronousGuard::new(self.loader.as_ref(), &self.synchronous_depth);
        self.loader.load_partition_now(partition);
        loop {
            if let Some(linkable) = self.get_registered(id) {
                return Some(linkable);
            }
            if !self.loader.is_loading() {
                break;
            }
            self.loader.tick(self);
            std::thread::yield_now();
        }

        log::error!("Could not load linked object {} from partition {}", id, partition);
        None
    }

    /// Resolve a stored reference, loading it if needed
    pub(crate) fn resolve(&self, link: &LinkRef) -> Result<Arc<Linkable>> {
        self.force_load(link.id, &link.partition)
            .ok_or_else(|| LinkError::Unresolved {
                id: link.id,
                partition: link.partition.clone(),
            })
    }

    // ========================================================================
    // Relationships
    // ========================================================================

    /// Re-derive the rendered relationship and back links between two
    /// resident objects from their current properties.
    pub fn update_link(&self, a: &Arc<Linkable>, b: &Arc<Linkable>) {
        if Arc::ptr_eq(a, b) {
            log::error!("Object {} cannot link to itself", a.identifier());
            return;
        }

        let a_to_b = self.references(a, b);
        let b_to_a = self.references(b, a);

        let direction = match (a_to_b, b_to_a) {
            (true, true) => LinkDirection::Both,
            (true, false) => LinkDirection::StartToEnd,
            (false, true) => LinkDirection::EndToStart,
            (false, false) => LinkDirection::None,
        };
        a.create_link(direction, b);

        Self::sync_back_link(a, b, a_to_b, self.location_of(a));
        Self::sync_back_link(b, a, b_to_a, self.location_of(b));
    }

    /// Make `target`'s back-link set agree with whether `referrer`
    /// references it.
    fn sync_back_link(
        referrer: &Linkable,
        target: &Linkable,
        references: bool,
        referrer_location: Option<PartitionId>,
    ) {
        match (references, referrer_location) {
            (true, Some(location)) => {
                target.add_back_link(referrer.identifier(), location);
            }
            (true, None) => {}
            (false, _) => {
                target.remove_back_link(referrer.identifier());
            }
        }
    }

    /// Check whether `from` holds a valid reference to `to`.
    ///
    /// A reference is valid when its stored partition is `to`'s current
    /// outer partition.
    fn references(&self, from: &Linkable, to: &Linkable) -> bool {
        let Some(item) = from.item() else {
            return false;
        };
        let to_id = to.identifier();
        let slots = property::slots_referencing(item.properties(), to_id);
        if slots.is_empty() {
            return false;
        }

        let location = self.location_of(to);
        if slots
            .iter()
            .any(|slot| Some(&slot.target.partition) == location.as_ref())
        {
            return true;
        }

        if self.config.warn_on_partition_mismatch {
            log::error!(
                "Link from {} to {} names partition {} but the target is in {}",
                from.identifier(),
                to_id,
                slots[0].target.partition,
                location.map_or_else(|| "no partition".to_string(), |p| p.to_string()),
            );
        }
        false
    }
}

// ============================================================================
// Tests
// ============================================================================
