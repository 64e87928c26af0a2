//! Structural edits: adding, changing and deleting links.
//!
//! Public entry points validate, call an internal mutator, then record one
//! inverse operation. Internal mutators never touch the undo sink, so undo
//! and redo can reuse them.

use std::sync::Arc;

use super::LinkManager;
use crate::error::{LinkError, Result};
use crate::id::LinkRef;
use crate::linkable::Linkable;
use crate::property::{self, PropertyIndex, PropertyKind};
use crate::undo::LinkOperation;

impl LinkManager {
    /// Point `start`'s link property at `end`.
    ///
    /// A previous target keeps a consistent relationship with `start`.
    /// Nothing changes if the link would be a self link, if any touched
    /// object is locked, or if the previous target cannot be loaded.
    pub fn add_link(
        &self,
        start: &Arc<Linkable>,
        end: &Arc<Linkable>,
        index: PropertyIndex,
    ) -> Result<()> {
        let start_ref = self.link_ref_of(start)?;
        let end_ref = self.link_ref_of(end)?;

        let previous = self.add_link_internal(start, end, index, true)?;

        let inverse = match previous {
            Some(previous) => LinkOperation::RestorePreviousTarget {
                start: start_ref,
                previous,
                index,
            },
            None => LinkOperation::DeleteLink {
                start: start_ref,
                end: end_ref,
                index,
            },
        };
        self.undo.push_inverse(inverse);
        Ok(())
    }

    /// Append an element to the link array `property` and point it at `end`
    pub fn append_link(
        &self,
        start: &Arc<Linkable>,
        end: &Arc<Linkable>,
        property: usize,
    ) -> Result<PropertyIndex> {
        let item = start
            .item()
            .ok_or(LinkError::NotRegistered(start.identifier()))?;
        let store = item.properties();
        if property >= store.property_count() || !store.is_link_array_property(property) {
            log::error!("Property {} of {} is not a link array", property, start.identifier());
            return Err(LinkError::InvalidProperty(property));
        }

        let element = store.link_array(property).len();
        store.insert_array_element(property, element, None);
        let index = PropertyIndex::element(property, element);

        match self.add_link(start, end, index) {
            Ok(()) => Ok(index),
            Err(e) => {
                store.remove_array_element(property, element);
                Err(e)
            }
        }
    }

    /// Clear the link at `index` on `item`.
    ///
    /// `old_target` is the resident object the link pointed at, if any; its
    /// relationship with `item` is re-derived.
    pub fn delete_link(
        &self,
        item: &Arc<Linkable>,
        old_target: Option<&Arc<Linkable>>,
        index: PropertyIndex,
    ) -> Result<()> {
        let start_ref = self.link_ref_of(item)?;
        let cleared = item
            .item()
            .and_then(|owner| property::read_link(owner.properties(), index));

        self.delete_link_internal(item, old_target, index)?;

        if let Some(cleared) = cleared {
            self.undo.push_inverse(LinkOperation::ReAddLink {
                start: start_ref,
                end: cleared,
                index,
            });
        }
        Ok(())
    }

    /// Remove every reference between `a` and `b`, in both directions
    pub fn delete_all_links(&self, a: &Arc<Linkable>, b: &Arc<Linkable>) -> Result<()> {
        if Arc::ptr_eq(a, b) {
            log::error!("Object {} cannot link to itself", a.identifier());
            return Err(LinkError::SelfLink(a.identifier()));
        }
        Self::ensure_editable(a)?;
        Self::ensure_editable(b)?;

        self.remove_all_refs(a, Some(b))?;
        self.remove_all_refs(b, Some(a))?;

        self.update_link(a, b);
        self.update_link(b, a);
        Ok(())
    }

    /// Delete the links held by one property of `item`.
    ///
    /// Links whose target sits in a locked partition are left alone.
    /// Returns the number of links deleted.
    pub fn clear_property_links(&self, item: &Arc<Linkable>, property: usize) -> Result<usize> {
        let owner = item
            .item()
            .ok_or(LinkError::NotRegistered(item.identifier()))?;
        let store = owner.properties();
        if property >= store.property_count() {
            return Err(LinkError::InvalidProperty(property));
        }
        Self::ensure_editable(item)?;

        let indices: Vec<(PropertyIndex, Option<LinkRef>)> = match store.property_kind(property) {
            PropertyKind::Link => {
                vec![(PropertyIndex::single(property), store.link_value(property))]
            }
            PropertyKind::LinkArray => store
                .link_array(property)
                .into_iter()
                .enumerate()
                .rev()
                .map(|(element, value)| (PropertyIndex::element(property, element), value))
                .collect(),
            PropertyKind::Other => return Err(LinkError::InvalidProperty(property)),
        };

        let mut deleted = 0;
        for (index, value) in indices {
            let target = value
                .filter(|v| !v.id.is_nil())
                .and_then(|v| self.force_load(v.id, &v.partition));
            if let Some(target) = &target {
                if !target.is_editable() {
                    log::error!(
                        "Keeping link from {} to {}: target partition is locked",
                        item.identifier(),
                        target.identifier()
                    );
                    continue;
                }
            }
            self.delete_link(item, target.as_ref(), index)?;
            deleted += 1;
        }
        Ok(deleted)
    }

    /// Replace the back link `old` of `target` with `new`, recording the
    /// inverse
    pub fn remap_back_link(
        &self,
        target: &Arc<Linkable>,
        old: Option<LinkRef>,
        new: Option<LinkRef>,
    ) -> Result<()> {
        let target_ref = self.link_ref_of(target)?;
        Self::ensure_editable(target)?;
        self.remap_back_link_internal(target, old.as_ref(), new.as_ref());
        self.undo.push_inverse(LinkOperation::UpdateBackLinkMapping {
            target: target_ref,
            removed: new,
            added: old,
        });
        Ok(())
    }

    // ========================================================================
    // Internal mutators
    // ========================================================================

    /// Write `end` into `start`'s property at `index` and re-derive the
    /// relationships. Returns the reference that was replaced.
    pub(crate) fn add_link_internal(
        &self,
        start: &Arc<Linkable>,
        end: &Arc<Linkable>,
        index: PropertyIndex,
        update_previous: bool,
    ) -> Result<Option<LinkRef>> {
        let start_id = start.identifier();
        let end_id = end.identifier();
        if Arc::ptr_eq(start, end) || start_id == end_id {
            log::error!("Object {} cannot link to itself", start_id);
            return Err(LinkError::SelfLink(start_id));
        }
        self.ensure_registered(start)?;
        self.ensure_registered(end)?;

        let owner = start.item().ok_or(LinkError::NotRegistered(start_id))?;
        let store = owner.properties();
        if !property::is_link_index(store, index) || !Self::index_exists(store, index) {
            log::error!("Property {} of {} is not a link slot", index, start_id);
            return Err(LinkError::InvalidProperty(index.property));
        }
        let end_partition = self.location_of(end).ok_or(LinkError::NotPlaced(end_id))?;
        Self::ensure_editable(start)?;
        Self::ensure_editable(end)?;

        let current = property::read_link(store, index);
        let previous = match &current {
            Some(link) if update_previous && link.id != end_id && !link.id.is_nil() => {
                let previous = self.resolve(link)?;
                Self::ensure_editable(&previous)?;
                Some(previous)
            }
            _ => None,
        };

        store.set_link_value(index, Some(LinkRef::new(end_id, end_partition)));
        owner.mark_dirty();

        self.update_link(start, end);
        end.mark_dirty();

        if let Some(previous) = previous {
            if !Arc::ptr_eq(&previous, start) {
                self.update_link(start, &previous);
                previous.mark_dirty();
            }
        }

        Ok(current)
    }

    /// Clear the value at `index` and re-derive the relationship with
    /// `old_target`
    pub(crate) fn delete_link_internal(
        &self,
        item: &Arc<Linkable>,
        old_target: Option<&Arc<Linkable>>,
        index: PropertyIndex,
    ) -> Result<()> {
        let id = item.identifier();
        let owner = item.item().ok_or(LinkError::NotRegistered(id))?;
        let store = owner.properties();
        if !property::is_link_index(store, index) || !Self::index_exists(store, index) {
            log::error!("Property {} of {} is not a link slot", index, id);
            return Err(LinkError::InvalidProperty(index.property));
        }
        Self::ensure_editable(item)?;
        if let Some(old) = old_target {
            Self::ensure_editable(old)?;
        }

        match index.element {
            None => store.reset_to_default(index.property),
            Some(element) => store.remove_array_element(index.property, element),
        }
        owner.mark_dirty();

        if let Some(old) = old_target {
            if !Arc::ptr_eq(old, item) {
                self.update_link(item, old);
                old.mark_dirty();
            }
        }
        Ok(())
    }

    /// Put `link` back at `index` (re-inserting array elements) and
    /// re-derive the relationship with its target
    pub(crate) fn write_link_internal(
        &self,
        item: &Arc<Linkable>,
        link: &LinkRef,
        index: PropertyIndex,
    ) -> Result<()> {
        let id = item.identifier();
        let owner = item.item().ok_or(LinkError::NotRegistered(id))?;
        let store = owner.properties();
        if !property::is_link_index(store, index) {
            return Err(LinkError::InvalidProperty(index.property));
        }
        Self::ensure_editable(item)?;

        let target = self.force_load(link.id, &link.partition);
        if let Some(target) = &target {
            Self::ensure_editable(target)?;
        }

        match index.element {
            None => store.set_link_value(index, Some(link.clone())),
            Some(element) => {
                store.insert_array_element(index.property, element, Some(link.clone()))
            }
        }
        owner.mark_dirty();

        if let Some(target) = target {
            self.update_link(item, &target);
            target.mark_dirty();
        }
        Ok(())
    }

    pub(crate) fn remap_back_link_internal(
        &self,
        target: &Linkable,
        old: Option<&LinkRef>,
        new: Option<&LinkRef>,
    ) {
        if let Some(old) = old {
            target.remove_back_link(old.id);
        }
        if let Some(new) = new {
            target.add_back_link(new.id, new.partition.clone());
        }
    }

    /// Delete every link from `from`, or only those pointing at
    /// `pointing_to`
    pub(crate) fn remove_all_refs(
        &self,
        from: &Arc<Linkable>,
        pointing_to: Option<&Arc<Linkable>>,
    ) -> Result<()> {
        // Highest index first so removing array elements keeps the rest valid
        for slot in from.link_slots().into_iter().rev() {
            match pointing_to {
                Some(target) => {
                    if slot.target.id == target.identifier() {
                        self.delete_link(from, Some(target), slot.index)?;
                    }
                }
                None => {
                    let target = self.force_load(slot.target.id, &slot.target.partition);
                    self.delete_link(from, target.as_ref(), slot.index)?;
                }
            }
        }
        Ok(())
    }

    pub(crate) fn ensure_editable(linkable: &Linkable) -> Result<()> {
        if linkable.is_editable() {
            Ok(())
        } else {
            let id = linkable.identifier();
            log::error!("Object {} is in a locked partition", id);
            Err(LinkError::NotEditable(id))
        }
    }

    fn index_exists(store: &dyn property::PropertyStore, index: PropertyIndex) -> bool {
        match index.element {
            None => true,
            Some(element) => element < store.link_array(index.property).len(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
