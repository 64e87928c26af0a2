//! Fakes shared by the unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use crate::config::LinkManagerConfig;
use crate::id::{LinkRef, LinkableId, PartitionId};
use crate::item::{ItemKind, LinkableItem};
use crate::link::SceneObject;
use crate::linkable::Linkable;
use crate::loader::PartitionLoader;
use crate::manager::LinkManager;
use crate::property::testing::{MemoryStore, Value};
use crate::property::{PropertyIndex, PropertyStore};
use crate::undo::LinkHistory;

pub fn id(word: u32) -> LinkableId {
    LinkableId::from_words(0, 0, 0, word)
}

pub fn partition(name: &str) -> PartitionId {
    PartitionId::new(name).unwrap()
}

pub fn link(word: u32, name: &str) -> Option<LinkRef> {
    Some(LinkRef::new(id(word), partition(name)))
}

pub struct TestItem {
    kind: ItemKind,
    store: MemoryStore,
    partition: RwLock<Option<PartitionId>>,
    outside: RwLock<Option<PartitionId>>,
    objects: Mutex<Vec<SceneObject>>,
    dirty: AtomicUsize,
    linkable: Arc<Linkable>,
}

impl TestItem {
    pub fn new(kind: ItemKind, id: LinkableId, name: &str, values: Vec<Value>) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<TestItem>| {
            let item: Weak<dyn LinkableItem> = weak.clone();
            TestItem {
                kind,
                store: MemoryStore::new(values),
                partition: RwLock::new(PartitionId::new(name)),
                outside: RwLock::new(PartitionId::new(name)),
                objects: Mutex::new(Vec::new()),
                dirty: AtomicUsize::new(0),
                linkable: Arc::new(Linkable::new(id, kind, item)),
            }
        })
    }

    pub fn data_object(id: LinkableId, name: &str, values: Vec<Value>) -> Arc<Self> {
        Self::new(ItemKind::DataObject, id, name, values)
    }

    pub fn entity(id: LinkableId, name: &str, values: Vec<Value>) -> Arc<Self> {
        Self::new(ItemKind::Entity, id, name, values)
    }

    pub fn linkable(&self) -> &Arc<Linkable> {
        &self.linkable
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    pub fn value(&self, index: PropertyIndex) -> Option<LinkRef> {
        crate::property::read_link(&self.store, index)
    }

    /// Place directly in an outer partition
    pub fn place(&self, partition: Option<PartitionId>) {
        *self.partition.write() = partition.clone();
        *self.outside.write() = partition;
    }

    /// Place in a nested load unit of an outer partition
    pub fn place_in_shell(&self, shell: &str, outside: &str) {
        *self.partition.write() = PartitionId::new(shell);
        *self.outside.write() = PartitionId::new(outside);
    }

    pub fn attached_links(&self) -> usize {
        self.objects
            .lock()
            .iter()
            .filter(|o| matches!(o, SceneObject::Link(_)))
            .count()
    }

    pub fn attached_boundaries(&self) -> usize {
        self.objects
            .lock()
            .iter()
            .filter(|o| matches!(o, SceneObject::Boundary(_)))
            .count()
    }

    pub fn dirty_count(&self) -> usize {
        self.dirty.load(Ordering::SeqCst)
    }
}

impl LinkableItem for TestItem {
    fn kind(&self) -> ItemKind {
        self.kind
    }

    fn properties(&self) -> &dyn PropertyStore {
        &self.store
    }

    fn partition(&self) -> Option<PartitionId> {
        self.partition.read().clone()
    }

    fn outside_partition(&self) -> Option<PartitionId> {
        self.outside.read().clone()
    }

    fn attach_object(&self, object: SceneObject) {
        self.objects.lock().push(object);
    }

    fn detach_object(&self, object: &SceneObject) {
        self.objects.lock().retain(|o| !o.same_as(object));
    }

    fn mark_dirty(&self) {
        self.dirty.fetch_add(1, Ordering::SeqCst);
    }
}

/// Loader keeping unloaded items in memory, keyed by outer partition.
#[derive(Default)]
pub struct TestLoader {
    stash: Mutex<HashMap<PartitionId, Vec<Arc<TestItem>>>>,
    pending: Mutex<Vec<PartitionId>>,
    synchronous: AtomicBool,
    mode_changes: Mutex<Vec<bool>>,
}

impl TestLoader {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Detach `item` and keep it until its partition is loaded again
    pub fn unload(&self, manager: &LinkManager, item: &Arc<TestItem>) {
        item.linkable().detach(manager);
        if let Some(partition) = item.outside_partition() {
            self.stash.lock().entry(partition).or_default().push(item.clone());
        }
    }

    /// Keep `item` as if it had been saved into an unloaded partition
    pub fn stash(&self, item: &Arc<TestItem>) {
        if let Some(partition) = item.outside_partition() {
            self.stash.lock().entry(partition).or_default().push(item.clone());
        }
    }

    /// Drop the stashed contents of a partition
    pub fn forget(&self, name: &str) {
        self.stash.lock().remove(&partition(name));
    }

    pub fn is_synchronous(&self) -> bool {
        self.synchronous.load(Ordering::SeqCst)
    }

    pub fn mode_changes(&self) -> Vec<bool> {
        self.mode_changes.lock().clone()
    }
}

impl PartitionLoader for TestLoader {
    fn load_partition_now(&self, partition: &PartitionId) {
        self.pending.lock().push(partition.clone());
    }

    fn is_loading(&self) -> bool {
        !self.pending.lock().is_empty()
    }

    fn set_synchronous_mode(&self, synchronous: bool) {
        self.synchronous.store(synchronous, Ordering::SeqCst);
        self.mode_changes.lock().push(synchronous);
    }

    fn tick(&self, manager: &LinkManager) {
        let batch = std::mem::take(&mut *self.pending.lock());
        for partition in batch {
            let items = self.stash.lock().remove(&partition).unwrap_or_default();
            for item in items {
                let _ = item.linkable().attach(manager);
            }
        }
    }
}

pub fn manager_with(loader: &Arc<TestLoader>) -> (LinkManager, Arc<LinkHistory>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let history = Arc::new(LinkHistory::new());
    let config = LinkManagerConfig::default().with_budget(std::time::Duration::from_secs(5));
    let manager = LinkManager::new(config, loader.clone(), history.clone());
    (manager, history)
}

/// Tick until every queue is empty or `limit` ticks ran
pub fn drain(manager: &LinkManager, limit: usize) {
    for _ in 0..limit {
        if manager.is_idle() {
            return;
        }
        manager.tick();
    }
}

pub use crate::property::testing::Value as PropertyValue;
