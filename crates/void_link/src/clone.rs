//! Remapping links of freshly duplicated objects.
//!
//! A duplicated object starts with a verbatim copy of its original's link
//! properties and back links. [`LinkManager::update_mapped_linkers`] points
//! references inside the duplicated set at the copies and drops references
//! leaving it.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::id::LinkableId;
use crate::linkable::Linkable;
use crate::manager::LinkManager;

/// Original identifier to clone identifier
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdMapping {
    map: BTreeMap<LinkableId, LinkableId>,
}

impl IdMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, original: LinkableId, clone: LinkableId) -> Option<LinkableId> {
        self.map.insert(original, clone)
    }

    /// Generate and record a fresh identifier for a copy of `original`
    pub fn assign_fresh(&mut self, original: LinkableId) -> LinkableId {
        let mut fresh = LinkableId::generate();
        while self.is_clone(fresh) || self.map.contains_key(&fresh) {
            fresh = LinkableId::generate();
        }
        self.map.insert(original, fresh);
        fresh
    }

    /// Clone identifier of `original`
    pub fn get(&self, original: LinkableId) -> Option<LinkableId> {
        self.map.get(&original).copied()
    }

    /// Check if `id` is one of the clone identifiers
    pub fn is_clone(&self, id: LinkableId) -> bool {
        self.map.values().any(|clone| *clone == id)
    }

    pub fn remove(&mut self, original: LinkableId) -> Option<LinkableId> {
        self.map.remove(&original)
    }

    pub fn retain(&mut self, mut f: impl FnMut(LinkableId, LinkableId) -> bool) {
        self.map.retain(|original, clone| f(*original, *clone));
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (LinkableId, LinkableId)> + '_ {
        self.map.iter().map(|(original, clone)| (*original, *clone))
    }
}

impl FromIterator<(LinkableId, LinkableId)> for IdMapping {
    fn from_iter<I: IntoIterator<Item = (LinkableId, LinkableId)>>(iter: I) -> Self {
        Self {
            map: iter.into_iter().collect(),
        }
    }
}

impl LinkManager {
    /// Rewire the links of a just-duplicated set of objects.
    ///
    /// Entries whose clone is not resident are removed from `mapping`.
    /// Nothing is recorded for undo; duplication is undone as a unit by
    /// deleting the clones.
    pub fn update_mapped_linkers(&self, mapping: &mut IdMapping) {
        if mapping.is_empty() {
            log::error!("Clone remapping called with an empty mapping");
            return;
        }

        mapping.retain(|original, clone| {
            let resident = self.is_registered(clone);
            if !resident {
                log::warn!("Clone {} of {} is not registered; skipping", clone, original);
            }
            resident
        });

        let clones: Vec<Arc<Linkable>> = mapping
            .iter()
            .filter_map(|(_, clone)| self.get_registered(clone))
            .collect();
        let clone_ids: BTreeSet<LinkableId> = mapping.iter().map(|(_, clone)| clone).collect();

        for clone in &clones {
            self.remove_from_lists(clone);
            clone.remove_boundaries();
        }

        for clone in &clones {
            self.remap_properties(clone, mapping, &clone_ids);
        }
        for clone in &clones {
            self.remap_back_links(clone, mapping, &clone_ids);
            clone.mark_dirty();
        }
        log::debug!("Remapped links of {} duplicated objects", clones.len());
    }

    fn remap_properties(
        &self,
        clone: &Arc<Linkable>,
        mapping: &IdMapping,
        clone_ids: &BTreeSet<LinkableId>,
    ) {
        let Some(item) = clone.item() else {
            return;
        };
        let store = item.properties();

        // Highest index first so removing array elements keeps the rest valid
        for slot in clone.link_slots().into_iter().rev() {
            let original_id = slot.target.id;
            if clone_ids.contains(&original_id) {
                continue;
            }

            match mapping.get(original_id).and_then(|id| self.get_registered(id)) {
                Some(copy) => {
                    if let Err(e) = self.add_link_internal(clone, &copy, slot.index, false) {
                        log::error!(
                            "Could not point {} of {} at clone {}: {}",
                            slot.index,
                            clone.identifier(),
                            copy.identifier(),
                            e
                        );
                    }
                }
                None => {
                    match slot.index.element {
                        None => store.reset_to_default(slot.index.property),
                        Some(element) => store.remove_array_element(slot.index.property, element),
                    }
                    item.mark_dirty();
                }
            }

            if let Some(original) = self.get_registered(original_id) {
                self.update_link(clone, &original);
            }
        }
    }

    /// Keep back links from other clones, move those from cloned referrers
    /// to their copies and drop the rest
    fn remap_back_links(
        &self,
        clone: &Arc<Linkable>,
        mapping: &IdMapping,
        clone_ids: &BTreeSet<LinkableId>,
    ) {
        for referrer in clone.back_links() {
            if clone_ids.contains(&referrer.id) {
                continue;
            }
            clone.remove_back_link(referrer.id);

            let copied_referrer = mapping
                .get(referrer.id)
                .and_then(|id| self.get_registered(id));
            if let Some(copied_referrer) = copied_referrer {
                self.update_link(&copied_referrer, clone);
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::{PropertyIndex, PropertyStore};
    use crate::testing::{drain, id, link, manager_with, PropertyValue, TestItem, TestLoader};

    #[test]
    fn test_assign_fresh() {
        let mut mapping = IdMapping::new();
        let fresh = mapping.assign_fresh(id(1));
        assert!(!fresh.is_nil());
        assert_ne!(fresh, id(1));
        assert_eq!(mapping.get(id(1)), Some(fresh));
        assert!(mapping.is_clone(fresh));
        assert!(!mapping.is_clone(id(1)));
    }

    #[test]
    fn test_remap_duplicated_subgraph() {
        let loader = TestLoader::new();
        let (manager, history) = manager_with(&loader);
        let values = || {
            vec![
                PropertyValue::Link(link(2, "cell")),
                PropertyValue::Array(vec![link(3, "cell")]),
            ]
        };
        let a = TestItem::data_object(id(1), "cell", values());
        let b = TestItem::data_object(id(2), "cell", vec![]);
        let c = TestItem::data_object(id(3), "cell", vec![]);
        for item in [&a, &b, &c] {
            item.linkable().attach(&manager).unwrap();
        }
        drain(&manager, 10);
        let undo_before = history.undo_count();

        // Copies start with the originals' references
        let a2 = TestItem::data_object(id(11), "cell", values());
        let b2 = TestItem::data_object(id(12), "cell", vec![]);
        b2.linkable().add_back_link(id(1), crate::testing::partition("cell"));
        a2.linkable().attach(&manager).unwrap();
        b2.linkable().attach(&manager).unwrap();
        manager.tick();

        let mut mapping: IdMapping = [(id(1), id(11)), (id(2), id(12)), (id(4), id(14))]
            .into_iter()
            .collect();
        manager.update_mapped_linkers(&mut mapping);

        assert_eq!(mapping.len(), 2);
        assert_eq!(a2.value(PropertyIndex::single(0)), link(12, "cell"));
        assert!(a2.store().link_array(1).is_empty());
        assert_eq!(b2.linkable().back_links(), vec![link(11, "cell").unwrap()]);
        assert!(a2.linkable().is_linked_to(id(12)));
        assert!(!a2.linkable().is_linked_to(id(2)));
        assert!(!a2.linkable().is_linked_to(id(3)));

        assert_eq!(b.linkable().back_links(), vec![link(1, "cell").unwrap()]);
        assert_eq!(c.linkable().back_links(), vec![link(1, "cell").unwrap()]);
        assert_eq!(a.value(PropertyIndex::single(0)), link(2, "cell"));
        assert_eq!(history.undo_count(), undo_before);

        drain(&manager, 10);
        assert!(manager.is_idle());
    }

    #[test]
    fn test_empty_mapping_is_ignored() {
        let loader = TestLoader::new();
        let (manager, _) = manager_with(&loader);
        let mut mapping = IdMapping::new();
        manager.update_mapped_linkers(&mut mapping);
        assert!(mapping.is_empty());
    }
}
