//! Per-object link facade
//!
//! A [`Linkable`] is composed into every link-capable item. It holds the
//! rendered links to other resident objects, the boundary placeholders
//! toward unloaded partitions, and the back-link set naming every object
//! that references it.
//!
//! Structural changes go through [`LinkManager`]; the methods here only
//! maintain this object's own rendered state.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use crate::error::Result;
use crate::id::{LinkRef, LinkableId, PartitionId};
use crate::item::{ItemKind, LinkableItem};
use crate::link::{owns_link, BoundaryLink, LinkDirection, RenderedLink, SceneObject};
use crate::manager::LinkManager;
use crate::persist::{BackLinksRecord, LinkRecord};
use crate::property::{self, LinkSlot};

#[derive(Default)]
struct LinkState {
    links: Vec<Arc<RenderedLink>>,
    boundaries: BTreeMap<PartitionId, Arc<BoundaryLink>>,
    back_links: BTreeMap<LinkableId, PartitionId>,
}

/// Link facade of a single item.
pub struct Linkable {
    id: RwLock<LinkableId>,
    kind: ItemKind,
    item: Weak<dyn LinkableItem>,
    state: Mutex<LinkState>,
}

impl Linkable {
    /// Create the facade for `item`. The item owns the returned value.
    pub fn new(id: LinkableId, kind: ItemKind, item: Weak<dyn LinkableItem>) -> Self {
        Self {
            id: RwLock::new(id),
            kind,
            item,
            state: Mutex::new(LinkState::default()),
        }
    }

    /// Current identifier
    pub fn identifier(&self) -> LinkableId {
        *self.id.read()
    }

    /// Change the identifier. The manager drops cached data for the old
    /// identifier first and rejects identifiers already in use.
    pub fn set_identifier(self: &Arc<Self>, manager: &LinkManager, id: LinkableId) -> Result<()> {
        manager.change_identifier(self, id)
    }

    pub(crate) fn store_identifier(&self, id: LinkableId) {
        *self.id.write() = id;
    }

    pub fn kind(&self) -> ItemKind {
        self.kind
    }

    /// The owning item, if it is still alive
    pub fn item(&self) -> Option<Arc<dyn LinkableItem>> {
        self.item.upgrade()
    }

    /// Load unit the item sits in
    pub fn partition(&self) -> Option<PartitionId> {
        self.item().and_then(|item| item.partition())
    }

    /// Outer partition containing the item
    pub fn outside_partition(&self) -> Option<PartitionId> {
        self.item().and_then(|item| item.outside_partition())
    }

    /// Stored-reference form of this object, when placed
    pub fn link_ref(&self) -> Option<LinkRef> {
        self.outside_partition()
            .map(|partition| LinkRef::new(self.identifier(), partition))
    }

    /// Check if the item's partition is unlocked for editing
    pub fn is_editable(&self) -> bool {
        self.item()
            .map_or(false, |item| item.properties().is_editable())
    }

    pub fn mark_dirty(&self) {
        if let Some(item) = self.item() {
            item.mark_dirty();
        }
    }

    /// Every non-empty reference in the item's link properties
    pub fn link_slots(&self) -> Vec<LinkSlot> {
        self.item()
            .map(|item| property::link_slots(item.properties()))
            .unwrap_or_default()
    }

    /// Check if any link property references `id` in `partition`
    pub fn has_links_to(&self, id: LinkableId, partition: &PartitionId) -> bool {
        self.link_slots()
            .iter()
            .any(|slot| slot.target.id == id && &slot.target.partition == partition)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// The owning item was placed in or loaded into the world
    pub fn attach(self: &Arc<Self>, manager: &LinkManager) -> Result<()> {
        manager.on_attached(self)
    }

    /// The owning item was removed from the world (unloaded or deleted)
    pub fn detach(self: &Arc<Self>, manager: &LinkManager) {
        manager.on_detached(self)
    }

    /// The owning item is being deleted; scrub every reference to it
    pub fn deleted(self: &Arc<Self>, manager: &LinkManager) -> Result<()> {
        manager.on_deleted(self)
    }

    // ========================================================================
    // Rendered links
    // ========================================================================

    /// Set the rendered relationship with `other`.
    ///
    /// `direction` is relative to this object: `StartToEnd` means this
    /// object references `other`.
    pub fn create_link(
        self: &Arc<Self>,
        direction: LinkDirection,
        other: &Arc<Linkable>,
    ) -> Option<Arc<RenderedLink>> {
        if Arc::ptr_eq(self, other) {
            log::error!("Object {} cannot link to itself", self.identifier());
            return None;
        }

        match direction {
            LinkDirection::None => {
                self.remove_link_to(other);
                return None;
            }
            LinkDirection::StartToEnd => {
                self.set_link(other, true);
                other.set_link(self, false);
            }
            LinkDirection::EndToStart => {
                other.set_link(self, true);
                self.set_link(other, false);
            }
            LinkDirection::Both => {
                self.set_link(other, true);
                other.set_link(self, true);
            }
        }

        self.link_to(other)
    }

    /// Set or clear this side's traversal bit on the link with `other`.
    pub(crate) fn set_link(
        self: &Arc<Self>,
        other: &Arc<Linkable>,
        can_traverse: bool,
    ) -> Option<Arc<RenderedLink>> {
        let link = match self.link_to(other) {
            Some(link) => link,
            None if can_traverse => self.new_link(other),
            None => return None,
        };

        let bit = if link.is_owned_by(self) {
            LinkDirection::StartToEnd
        } else {
            LinkDirection::EndToStart
        };
        let direction = if can_traverse {
            link.direction() | bit
        } else {
            link.direction() & !bit
        };
        link.set_direction(direction);

        if direction.is_none() {
            discard_link(&link);
            None
        } else {
            Some(link)
        }
    }

    fn new_link(self: &Arc<Self>, other: &Arc<Linkable>) -> Arc<RenderedLink> {
        let self_owns = owns_link(self.kind, self.identifier(), other.kind, other.identifier());
        let (owner, end) = if self_owns { (self, other) } else { (other, self) };

        let link = Arc::new(RenderedLink::new(owner, end, owner.partition()));
        self.state.lock().links.push(link.clone());
        other.state.lock().links.push(link.clone());

        if let Some(item) = owner.item() {
            item.attach_object(SceneObject::Link(link.clone()));
        }
        link
    }

    /// Discard the rendered link with `other`, if any
    pub fn remove_link_to(&self, other: &Linkable) {
        if let Some(link) = self.link_to(other) {
            discard_link(&link);
        }
    }

    /// Remove every rendered link touching this object
    pub fn unlink(&self) {
        let links = std::mem::take(&mut self.state.lock().links);
        for link in &links {
            if let Some(other) = link.other(self) {
                other
                    .state
                    .lock()
                    .links
                    .retain(|l| !Arc::ptr_eq(l, link));
            }
            detach_from_owner(link);
        }
    }

    /// The rendered link with `other`
    pub fn link_to(&self, other: &Linkable) -> Option<Arc<RenderedLink>> {
        self.state
            .lock()
            .links
            .iter()
            .find(|link| link.connects(other))
            .cloned()
    }

    /// Check if a rendered link to the object `id` exists
    pub fn is_linked_to(&self, id: LinkableId) -> bool {
        self.links()
            .iter()
            .filter_map(|link| link.other(self))
            .any(|other| other.identifier() == id)
    }

    /// Snapshot of the rendered links touching this object
    pub fn links(&self) -> Vec<Arc<RenderedLink>> {
        self.state.lock().links.clone()
    }

    // ========================================================================
    // Back links
    // ========================================================================

    /// Record that `id` in `partition` references this object.
    ///
    /// Returns true if the set changed.
    pub fn add_back_link(&self, id: LinkableId, partition: PartitionId) -> bool {
        if id == self.identifier() {
            log::error!("Object {} cannot hold a back link to itself", id);
            return false;
        }

        let changed = {
            let mut state = self.state.lock();
            state.back_links.insert(id, partition.clone()).as_ref() != Some(&partition)
        };
        if changed {
            self.mark_dirty();
        }
        changed
    }

    /// Forget that `id` references this object
    pub fn remove_back_link(&self, id: LinkableId) -> bool {
        let removed = self.state.lock().back_links.remove(&id).is_some();
        if removed {
            self.mark_dirty();
        }
        removed
    }

    pub fn has_back_link(&self, id: LinkableId) -> bool {
        self.state.lock().back_links.contains_key(&id)
    }

    /// Objects referencing this one, ordered by identifier
    pub fn back_links(&self) -> Vec<LinkRef> {
        self.state
            .lock()
            .back_links
            .iter()
            .map(|(id, partition)| LinkRef::new(*id, partition.clone()))
            .collect()
    }

    pub fn back_link_count(&self) -> usize {
        self.state.lock().back_links.len()
    }

    pub fn clear_back_links(&self) {
        let had_any = {
            let mut state = self.state.lock();
            let had_any = !state.back_links.is_empty();
            state.back_links.clear();
            had_any
        };
        if had_any {
            self.mark_dirty();
        }
    }

    /// Saved form of the back-link set
    pub fn save_back_links(&self) -> BackLinksRecord {
        BackLinksRecord {
            links: self
                .back_links()
                .iter()
                .map(LinkRecord::from)
                .collect(),
        }
    }

    /// Replace the back-link set from its saved form.
    ///
    /// Nothing changes if any record is malformed.
    pub fn load_back_links(&self, record: &BackLinksRecord) -> Result<()> {
        let own_id = self.identifier();
        let mut back_links = BTreeMap::new();
        for link in &record.links {
            if let Some(link) = link.to_link()? {
                if link.id != own_id {
                    back_links.insert(link.id, link.partition);
                }
            }
        }
        self.state.lock().back_links = back_links;
        Ok(())
    }

    // ========================================================================
    // Boundary placeholders
    // ========================================================================

    /// Show a placeholder toward `target`. At most one exists per partition;
    /// nothing is created while the item is not placed.
    pub fn create_boundary(self: &Arc<Self>, target: PartitionId) -> Option<Arc<BoundaryLink>> {
        let item = self.item()?;
        let host = item.partition()?;

        let boundary = {
            let mut state = self.state.lock();
            if let Some(existing) = state.boundaries.get(&target) {
                return Some(existing.clone());
            }
            let boundary = Arc::new(BoundaryLink::new(self, target.clone(), Some(host)));
            state.boundaries.insert(target, boundary.clone());
            boundary
        };

        item.attach_object(SceneObject::Boundary(boundary.clone()));
        Some(boundary)
    }

    /// Remove the placeholder toward `target`
    pub fn remove_boundary(&self, target: &PartitionId) -> bool {
        let removed = self.state.lock().boundaries.remove(target);
        match removed {
            Some(boundary) => {
                if let Some(item) = self.item() {
                    item.detach_object(&SceneObject::Boundary(boundary));
                }
                true
            }
            None => false,
        }
    }

    /// Remove every placeholder
    pub fn remove_boundaries(&self) {
        let boundaries = std::mem::take(&mut self.state.lock().boundaries);
        if let Some(item) = self.item() {
            for boundary in boundaries.into_values() {
                item.detach_object(&SceneObject::Boundary(boundary));
            }
        }
    }

    /// Re-create every placeholder in the item's current load unit
    pub fn refresh_boundaries(self: &Arc<Self>) {
        let targets = self.boundaries();
        self.remove_boundaries();
        for target in targets {
            self.create_boundary(target);
        }
    }

    /// Partitions this object shows placeholders toward
    pub fn boundaries(&self) -> Vec<PartitionId> {
        self.state.lock().boundaries.keys().cloned().collect()
    }

    pub fn boundary(&self, target: &PartitionId) -> Option<Arc<BoundaryLink>> {
        self.state.lock().boundaries.get(target).cloned()
    }
}

impl fmt::Debug for Linkable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Linkable")
            .field("id", &self.identifier())
            .field("kind", &self.kind)
            .finish()
    }
}

/// Remove `link` from both endpoints and from the owner's scene.
fn discard_link(link: &Arc<RenderedLink>) {
    for endpoint in [link.start(), link.end()].into_iter().flatten() {
        endpoint
            .state
            .lock()
            .links
            .retain(|l| !Arc::ptr_eq(l, link));
    }
    detach_from_owner(link);
}

fn detach_from_owner(link: &Arc<RenderedLink>) {
    if let Some(item) = link.start().and_then(|owner| owner.item()) {
        item.detach_object(&SceneObject::Link(link.clone()));
    }
}

// ============================================================================
// Tests
// ============================================================================
