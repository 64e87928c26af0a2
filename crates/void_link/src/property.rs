//! Property store interface
//!
//! Each linkable object exposes its properties through [`PropertyStore`].
//! The linking system only reads and writes link values; every other
//! property is opaque to it.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::id::{LinkRef, LinkableId};

/// Kind of a property as far as linking is concerned
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PropertyKind {
    /// Editable single reference
    Link,
    /// Editable array of references
    LinkArray,
    /// Anything else, including read-only link properties
    Other,
}

/// Location of a link value: a property, and an element for arrays
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PropertyIndex {
    pub property: usize,
    pub element: Option<usize>,
}

impl PropertyIndex {
    /// Index of a single-reference property
    pub const fn single(property: usize) -> Self {
        Self {
            property,
            element: None,
        }
    }

    /// Index of an element within a link array
    pub const fn element(property: usize, element: usize) -> Self {
        Self {
            property,
            element: Some(element),
        }
    }
}

impl fmt::Display for PropertyIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.element {
            Some(element) => write!(f, "{}[{}]", self.property, element),
            None => write!(f, "{}", self.property),
        }
    }
}

/// Per-object property storage.
///
/// Implementations use interior mutability: the linking system writes
/// through shared references from the editing thread while streaming
/// threads may be reading other objects.
pub trait PropertyStore: Send + Sync {
    /// Number of properties
    fn property_count(&self) -> usize;

    /// Kind of the property at `property`
    fn property_kind(&self, property: usize) -> PropertyKind;

    /// Check if the property is an editable single reference
    fn is_link_property(&self, property: usize) -> bool {
        self.property_kind(property) == PropertyKind::Link
    }

    /// Check if the property is an editable array of references
    fn is_link_array_property(&self, property: usize) -> bool {
        self.property_kind(property) == PropertyKind::LinkArray
    }

    /// Value of a single-reference property
    fn link_value(&self, property: usize) -> Option<LinkRef>;

    /// Elements of a link array; empty elements are `None`
    fn link_array(&self, property: usize) -> Vec<Option<LinkRef>>;

    /// Write a single reference or an existing array element
    fn set_link_value(&self, index: PropertyIndex, value: Option<LinkRef>);

    /// Reset a property to its default value
    fn reset_to_default(&self, property: usize);

    /// Remove one element of a link array
    fn remove_array_element(&self, property: usize, element: usize);

    /// Insert an element into a link array, appending when past the end
    fn insert_array_element(&self, property: usize, element: usize, value: Option<LinkRef>);

    /// Check if the owning partition is unlocked for editing
    fn is_editable(&self) -> bool;
}

/// A non-empty reference found in a property store
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkSlot {
    pub index: PropertyIndex,
    pub target: LinkRef,
}

/// Read the value at `index`.
pub fn read_link(store: &dyn PropertyStore, index: PropertyIndex) -> Option<LinkRef> {
    match index.element {
        None => store.link_value(index.property),
        Some(element) => store
            .link_array(index.property)
            .into_iter()
            .nth(element)
            .flatten(),
    }
}

/// Check that `index` addresses a link value of the right shape
pub fn is_link_index(store: &dyn PropertyStore, index: PropertyIndex) -> bool {
    if index.property >= store.property_count() {
        return false;
    }
    match index.element {
        None => store.is_link_property(index.property),
        Some(_) => store.is_link_array_property(index.property),
    }
}

/// Every non-empty reference held by `store`, in property order.
pub fn link_slots(store: &dyn PropertyStore) -> Vec<LinkSlot> {
    let mut slots = Vec::new();
    for property in 0..store.property_count() {
        match store.property_kind(property) {
            PropertyKind::Link => {
                if let Some(target) = store.link_value(property).filter(|t| !t.id.is_nil()) {
                    slots.push(LinkSlot {
                        index: PropertyIndex::single(property),
                        target,
                    });
                }
            }
            PropertyKind::LinkArray => {
                for (element, value) in store.link_array(property).into_iter().enumerate() {
                    if let Some(target) = value.filter(|t| !t.id.is_nil()) {
                        slots.push(LinkSlot {
                            index: PropertyIndex::element(property, element),
                            target,
                        });
                    }
                }
            }
            PropertyKind::Other => {}
        }
    }
    slots
}

/// Every reference from `store` to `target`.
pub fn slots_referencing(store: &dyn PropertyStore, target: LinkableId) -> Vec<LinkSlot> {
    link_slots(store)
        .into_iter()
        .filter(|slot| slot.target.id == target)
        .collect()
}


#[cfg(test)]
mod tests {
    use super::testing::{MemoryStore, Value};
    use super::*;
    use crate::id::PartitionId;

    fn link(word: u32) -> LinkRef {
        LinkRef::new(
            LinkableId::from_words(0, 0, 0, word),
            PartitionId::new("p").unwrap(),
        )
    }

    #[test]
    fn test_link_slots_skip_empty_values() {
        let store = MemoryStore::new(vec![
            Value::Link(Some(link(1))),
            Value::Link(None),
            Value::Array(vec![None, Some(link(2)), Some(link(1))]),
        ]);

        let slots = link_slots(&store);
        assert_eq!(slots.len(), 3);
        assert_eq!(slots[0].index, PropertyIndex::single(0));
        assert_eq!(slots[1].index, PropertyIndex::element(2, 1));
        assert_eq!(slots[2].index, PropertyIndex::element(2, 2));

        let to_one = slots_referencing(&store, link(1).id);
        assert_eq!(to_one.len(), 2);
    }

    #[test]
    fn test_read_link_and_index_shape() {
        let store = MemoryStore::new(vec![
            Value::Link(Some(link(1))),
            Value::Array(vec![Some(link(2))]),
        ]);

        assert_eq!(read_link(&store, PropertyIndex::single(0)), Some(link(1)));
        assert_eq!(read_link(&store, PropertyIndex::element(1, 0)), Some(link(2)));
        assert_eq!(read_link(&store, PropertyIndex::element(1, 5)), None);

        assert!(is_link_index(&store, PropertyIndex::single(0)));
        assert!(!is_link_index(&store, PropertyIndex::element(0, 0)));
        assert!(is_link_index(&store, PropertyIndex::element(1, 3)));
        assert!(!is_link_index(&store, PropertyIndex::single(7)));
    }

    #[test]
    fn test_property_index_display() {
        assert_eq!(PropertyIndex::single(3).to_string(), "3");
        assert_eq!(PropertyIndex::element(3, 1).to_string(), "3[1]");
    }
}
