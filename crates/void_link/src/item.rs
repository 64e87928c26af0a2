//! Owning item interface
//!
//! A [`LinkableItem`] is the placed world object that a
//! [`Linkable`](crate::Linkable) belongs to. It supplies the property
//! store, placement, and the scene into which rendered links and
//! boundary placeholders are attached.

use serde::{Deserialize, Serialize};

use crate::id::PartitionId;
use crate::link::SceneObject;
use crate::property::PropertyStore;

/// Type of a linkable item
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemKind {
    /// A placed entity
    Entity,
    /// A generic data object
    DataObject,
}

/// Services of the item that owns a linkable.
pub trait LinkableItem: Send + Sync {
    /// Type of the item
    fn kind(&self) -> ItemKind;

    /// Property storage of the item
    fn properties(&self) -> &dyn PropertyStore;

    /// Load unit the item currently sits in (may be a nested container)
    fn partition(&self) -> Option<PartitionId>;

    /// Outer spatial partition containing the item
    fn outside_partition(&self) -> Option<PartitionId>;

    /// Attach a rendered object to the item's current load unit
    fn attach_object(&self, object: SceneObject);

    /// Detach a previously attached rendered object
    fn detach_object(&self, object: &SceneObject);

    /// The item's persisted data changed
    fn mark_dirty(&self);
}
