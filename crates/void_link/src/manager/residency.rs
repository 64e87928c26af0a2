//! Registration, unloading, deletion and relocation of linkables.

use std::collections::hash_map::Entry;
use std::sync::Arc;

use super::queue::{LinkQueue, PendingLink};
use super::LinkManager;
use crate::error::{LinkError, Result};
use crate::id::{LinkRef, LinkableId, PartitionId};
use crate::linkable::Linkable;
use crate::property;

impl LinkManager {
    /// Register a linkable whose item entered the world and queue its
    /// links in both directions.
    pub(crate) fn on_attached(&self, linkable: &Arc<Linkable>) -> Result<()> {
        let id = linkable.identifier();
        if id.is_nil() {
            log::error!("Cannot register an object without an identifier");
            return Err(LinkError::InvalidIdentifier(id.to_string()));
        }

        let newly_registered = match self.registry.write().entry(id) {
            Entry::Occupied(existing) => {
                if !Arc::ptr_eq(existing.get(), linkable) {
                    log::error!("Object identifier {} is already registered", id);
                    return Err(LinkError::DuplicateIdentifier(id));
                }
                false
            }
            Entry::Vacant(slot) => {
                slot.insert(linkable.clone());
                true
            }
        };

        self.check_location(linkable);
        if !newly_registered {
            return Ok(());
        }

        log::debug!("Registered linkable {}", id);
        let Some(location) = self.location_of(linkable) else {
            return Ok(());
        };

        for slot in linkable.link_slots() {
            self.add_pending_link(PendingLink::new(
                id,
                location.clone(),
                slot.target.id,
                slot.target.partition,
            ));
        }
        for referrer in linkable.back_links() {
            self.add_pending_back_link(PendingLink::new(
                referrer.id,
                referrer.partition,
                id,
                location.clone(),
            ));
        }
        Ok(())
    }

    /// Unregister a linkable whose item left the world.
    ///
    /// Resident objects on the other side of its links get their entries
    /// queued again so placeholders appear toward its partition.
    pub(crate) fn on_detached(&self, linkable: &Arc<Linkable>) {
        let id = linkable.identifier();
        if !self.is_registered_as(linkable) {
            log::warn!("Detaching unregistered linkable {}", id);
            return;
        }

        let location = self.location_of(linkable);
        linkable.unlink();
        linkable.remove_boundaries();
        let removed = self.take_anchored_boundaries(id);
        self.remove_from_lists(linkable);
        self.retire_placeholders(&removed);

        if let Some(location) = location {
            for referrer in linkable.back_links() {
                if let Some(resident) = self.get_registered(referrer.id) {
                    if let Some(from_partition) = self.location_of(&resident) {
                        self.add_pending_link(PendingLink::new(
                            referrer.id,
                            from_partition,
                            id,
                            location.clone(),
                        ));
                    }
                }
            }
            for slot in linkable.link_slots() {
                if let Some(target) = self.get_registered(slot.target.id) {
                    if let Some(to_partition) = self.location_of(&target) {
                        self.add_pending_back_link(PendingLink::new(
                            id,
                            location.clone(),
                            slot.target.id,
                            to_partition,
                        ));
                    }
                }
            }
        }

        let mut registry = self.registry.write();
        if registry
            .get(&id)
            .map_or(false, |existing| Arc::ptr_eq(existing, linkable))
        {
            registry.remove(&id);
        }
        log::debug!("Unregistered linkable {}", id);
    }

    /// Scrub every reference to and from a linkable whose item is being
    /// deleted.
    ///
    /// Referrers in unloaded partitions are loaded first. Nothing changes
    /// if any linked object sits in a locked partition.
    pub(crate) fn on_deleted(&self, linkable: &Arc<Linkable>) -> Result<()> {
        let id = linkable.identifier();
        if !self.is_registered_as(linkable) {
            self.on_attached(linkable)?;
        }

        if !self.linked_partitions_editable(linkable) {
            log::error!("Cannot delete {}: a linked object is in a locked partition", id);
            return Err(LinkError::NotEditable(id));
        }

        for referrer in linkable.back_links() {
            match self.force_load(referrer.id, &referrer.partition) {
                Some(resident) => self.remove_all_refs(&resident, Some(linkable))?,
                None => log::warn!(
                    "Referrer {} of deleted object {} could not be loaded",
                    referrer.id,
                    id
                ),
            }
        }
        self.remove_all_refs(linkable, None)?;
        linkable.clear_back_links();

        let removed = self.purge_entries_naming(id);
        self.retire_placeholders(&removed);
        self.location_cache.lock().remove(&id);
        linkable.mark_dirty();
        log::debug!("Removed every link of deleted object {}", id);
        Ok(())
    }

    /// Check that `linkable` and every object linked with it can be
    /// edited, loading them as needed
    pub fn linked_partitions_editable(&self, linkable: &Arc<Linkable>) -> bool {
        if !linkable.is_editable() {
            return false;
        }
        let id = linkable.identifier();
        let referrers = linkable.back_links();
        let targets = linkable.link_slots().into_iter().map(|slot| slot.target);

        referrers
            .into_iter()
            .chain(targets)
            .filter(|link| link.id != id)
            .all(|link| match self.force_load(link.id, &link.partition) {
                Some(other) => other.is_editable(),
                None => true,
            })
    }

    /// Record the current outer partition of `linkable` and correct every
    /// stored partition naming it.
    pub fn check_location(&self, linkable: &Arc<Linkable>) {
        let id = linkable.identifier();
        let Some(location) = linkable.outside_partition() else {
            return;
        };
        let previous = self.location_cache.lock().insert(id, location.clone());
        if previous.as_ref() == Some(&location) {
            return;
        }
        if let Some(previous) = &previous {
            log::debug!("Object {} moved from {} to {}", id, previous, location);
        }

        // Only a real move loads linked objects that are not resident
        let moved = previous.is_some();
        let resident = |link: &LinkRef| {
            if moved {
                self.force_load(link.id, &link.partition)
            } else {
                self.get_registered(link.id)
            }
        };

        for referrer in linkable.back_links() {
            let Some(resident) = resident(&referrer) else {
                continue;
            };
            self.rewrite_partition(&resident, id, &location);
            self.update_link(&resident, linkable);
        }

        // Runs after the referrers so their references back are current
        for slot in linkable.link_slots() {
            let Some(target) = resident(&slot.target) else {
                continue;
            };
            if Arc::ptr_eq(&target, linkable) {
                continue;
            }
            if moved {
                self.update_link(linkable, &target);
            } else if target.has_back_link(id) {
                target.add_back_link(id, location.clone());
            }
        }

        let retired = self.relocate_entries(id, &location);
        self.retire_placeholders(&retired);
        if previous.is_some() {
            linkable.refresh_boundaries();
        }
    }

    /// Give `linkable` a new identifier, carrying its registration and
    /// queued entries over.
    pub(crate) fn change_identifier(
        &self,
        linkable: &Arc<Linkable>,
        new_id: LinkableId,
    ) -> Result<()> {
        let old_id = linkable.identifier();
        if old_id == new_id {
            return Ok(());
        }
        if new_id.is_nil() {
            return Err(LinkError::InvalidIdentifier(new_id.to_string()));
        }

        let registered = {
            let mut registry = self.registry.write();
            if registry.contains_key(&new_id) {
                log::error!("Object identifier {} is already registered", new_id);
                return Err(LinkError::DuplicateIdentifier(new_id));
            }
            let registered = registry
                .get(&old_id)
                .map_or(false, |existing| Arc::ptr_eq(existing, linkable));
            if registered {
                registry.remove(&old_id);
                registry.insert(new_id, linkable.clone());
            }
            registered
        };

        self.location_cache.lock().remove(&old_id);
        linkable.store_identifier(new_id);

        if registered {
            for queue in [
                &self.outstanding_links,
                &self.outstanding_back_links,
                &self.boundary_links,
                &self.boundary_back_links,
            ] {
                for entry in queue.lock().iter_mut() {
                    entry.rename(old_id, new_id);
                }
            }
            self.check_location(linkable);
        }
        log::debug!("Object {} is now {}", old_id, new_id);
        Ok(())
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Point every reference `referrer` holds to `id` at `location`
    fn rewrite_partition(&self, referrer: &Linkable, id: LinkableId, location: &PartitionId) {
        let Some(item) = referrer.item() else {
            return;
        };
        let store = item.properties();
        let stale: Vec<_> = property::slots_referencing(store, id)
            .into_iter()
            .filter(|slot| &slot.target.partition != location)
            .collect();
        if stale.is_empty() {
            return;
        }
        if !store.is_editable() {
            log::warn!(
                "Cannot update the location of {} stored by {}: partition is locked",
                id,
                referrer.identifier()
            );
            return;
        }
        for slot in stale {
            store.set_link_value(slot.index, Some(LinkRef::new(id, location.clone())));
        }
        item.mark_dirty();
    }

    /// Correct queued partitions for `id`. Boundary entries whose far side
    /// moved go back to the outstanding queues; the old entries are
    /// returned so their placeholders can be retired.
    fn relocate_entries(&self, id: LinkableId, location: &PartitionId) -> Vec<PendingLink> {
        let mut outstanding = self.outstanding_links.lock();
        let mut outstanding_back = self.outstanding_back_links.lock();
        let mut boundary = self.boundary_links.lock();
        let mut boundary_back = self.boundary_back_links.lock();

        for entry in outstanding.iter_mut() {
            entry.relocate(id, location);
        }
        for entry in outstanding_back.iter_mut() {
            entry.relocate(id, location);
        }

        let mut retired = Vec::new();
        requeue_moved(&mut boundary, &mut outstanding, id, location, true, &mut retired);
        requeue_moved(&mut boundary_back, &mut outstanding_back, id, location, false, &mut retired);
        retired
    }

    /// Remove the boundary entries anchored at `id`
    fn take_anchored_boundaries(&self, id: LinkableId) -> Vec<PendingLink> {
        let mut removed = Vec::new();
        let mut links = self.boundary_links.lock();
        let mut back_links = self.boundary_back_links.lock();
        links.retain(|e| {
            let anchored = e.from == id;
            if anchored {
                removed.push(e.clone());
            }
            !anchored
        });
        back_links.retain(|e| {
            let anchored = e.to == id;
            if anchored {
                removed.push(e.clone());
            }
            !anchored
        });
        removed
    }

    /// Remove every queued entry naming `id` on either side, returning the
    /// boundary entries removed
    fn purge_entries_naming(&self, id: LinkableId) -> Vec<PendingLink> {
        let names = |e: &PendingLink| e.from == id || e.to == id;
        self.outstanding_links.lock().retain(|e| !names(e));
        self.outstanding_back_links.lock().retain(|e| !names(e));

        let mut removed = Vec::new();
        let mut links = self.boundary_links.lock();
        let mut back_links = self.boundary_back_links.lock();
        for queue in [&mut *links, &mut *back_links] {
            queue.retain(|e| {
                if names(e) {
                    removed.push(e.clone());
                    false
                } else {
                    true
                }
            });
        }
        removed
    }
}

/// Move boundary entries whose far side is `id` and changed partition back
/// to `outstanding`; relocate the rest in place.
fn requeue_moved(
    boundary: &mut LinkQueue,
    outstanding: &mut LinkQueue,
    id: LinkableId,
    location: &PartitionId,
    forward: bool,
    retired: &mut Vec<PendingLink>,
) {
    let mut i = 0;
    while let Some(entry) = boundary.get(i).cloned() {
        let far_side_moved = if forward {
            entry.to == id && &entry.to_partition != location
        } else {
            entry.from == id && &entry.from_partition != location
        };

        if far_side_moved {
            let mut moved = boundary.remove(i);
            retired.push(entry);
            moved.relocate(id, location);
            outstanding.push_unique(moved);
        } else {
            if let Some(entry) = boundary.get_mut(i) {
                entry.relocate(id, location);
            }
            i += 1;
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
