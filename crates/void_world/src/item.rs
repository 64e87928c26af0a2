//! Placed world items

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use void_link::{
    BackLinksRecord, ItemKind, LinkRef, Linkable, LinkableId, LinkableItem, PartitionId,
    PropertyIndex, PropertyStore, SceneObject,
};

use crate::error::Result;
use crate::partition::PartitionLock;
use crate::property::{PropertyRecord, PropertySchema, PropertyTable};

/// Saved form of an item
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ItemRecord {
    pub id: LinkableId,
    pub kind: ItemKind,
    pub schema: String,
    pub properties: Vec<PropertyRecord>,
    #[serde(default, skip_serializing_if = "BackLinksRecord::is_empty")]
    pub back_links: BackLinksRecord,
}

/// Saved contents of one load unit
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PartitionRecord {
    pub items: Vec<ItemRecord>,
}

#[derive(Clone, Debug)]
struct Placement {
    partition: PartitionId,
    outside: PartitionId,
}

/// An item placed in a partition of the world.
pub struct SceneItem {
    kind: ItemKind,
    table: PropertyTable,
    placement: RwLock<Placement>,
    objects: Mutex<Vec<SceneObject>>,
    dirty: AtomicBool,
    linkable: Arc<Linkable>,
}

impl SceneItem {
    pub(crate) fn new(
        id: LinkableId,
        kind: ItemKind,
        table: PropertyTable,
        partition: PartitionId,
        outside: PartitionId,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<SceneItem>| {
            let item: Weak<dyn LinkableItem> = weak.clone();
            SceneItem {
                kind,
                table,
                placement: RwLock::new(Placement { partition, outside }),
                objects: Mutex::new(Vec::new()),
                dirty: AtomicBool::new(false),
                linkable: Arc::new(Linkable::new(id, kind, item)),
            }
        })
    }

    /// Rebuild an item from its saved form
    pub(crate) fn from_record(
        record: &ItemRecord,
        schema: Arc<PropertySchema>,
        partition: PartitionId,
        outside: PartitionId,
        lock: PartitionLock,
    ) -> Result<Arc<Self>> {
        let table = PropertyTable::from_records(schema, &record.properties, lock)?;
        let item = Self::new(record.id, record.kind, table, partition, outside);
        item.linkable.load_back_links(&record.back_links)?;
        Ok(item)
    }

    /// Saved form of the item
    pub fn to_record(&self) -> ItemRecord {
        ItemRecord {
            id: self.id(),
            kind: self.kind,
            schema: self.table.schema().name.clone(),
            properties: self.table.to_records(),
            back_links: self.linkable.save_back_links(),
        }
    }

    pub fn id(&self) -> LinkableId {
        self.linkable.identifier()
    }

    pub fn linkable(&self) -> &Arc<Linkable> {
        &self.linkable
    }

    pub fn table(&self) -> &PropertyTable {
        &self.table
    }

    /// Index of the property called `name`
    pub fn property(&self, name: &str) -> Option<usize> {
        self.table.schema().index_of(name)
    }

    /// Current value of the link property called `name`
    pub fn link(&self, name: &str) -> Option<LinkRef> {
        self.property(name).and_then(|p| self.table.link_value(p))
    }

    /// Current values of the link array called `name`
    pub fn links(&self, name: &str) -> Vec<Option<LinkRef>> {
        self.property(name)
            .map(|p| self.table.link_array(p))
            .unwrap_or_default()
    }

    /// Index of the single link property called `name`
    pub fn link_index(&self, name: &str) -> Option<PropertyIndex> {
        self.property(name).map(PropertyIndex::single)
    }

    /// Rendered objects attached to this item
    pub fn objects(&self) -> Vec<SceneObject> {
        self.objects.lock().clone()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub fn clear_dirty(&self) {
        self.dirty.store(false, Ordering::Release);
    }

    pub(crate) fn place(&self, partition: PartitionId, outside: PartitionId, lock: PartitionLock) {
        *self.placement.write() = Placement { partition, outside };
        self.table.set_lock(lock);
    }
}

impl LinkableItem for SceneItem {
    fn kind(&self) -> ItemKind {
        self.kind
    }

    fn properties(&self) -> &dyn PropertyStore {
        &self.table
    }

    fn partition(&self) -> Option<PartitionId> {
        Some(self.placement.read().partition.clone())
    }

    fn outside_partition(&self) -> Option<PartitionId> {
        Some(self.placement.read().outside.clone())
    }

    fn attach_object(&self, object: SceneObject) {
        self.objects.lock().push(object);
    }

    fn detach_object(&self, object: &SceneObject) {
        self.objects.lock().retain(|o| !o.same_as(object));
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }
}
