//! Streaming world
//!
//! Holds the partition table, the saved contents of every unloaded
//! partition, and the resident items. Loads are decoded on background
//! workers and bound on the editing thread by [`World::tick`], which
//! attaches the loaded items to the link manager.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::{Mutex, RwLock};
use void_link::{
    IdMapping, ItemKind, LinkError, LinkManager, LinkableId, LinkableItem, PartitionId,
    PartitionLoader, SceneObject,
};

use crate::config::StreamingConfig;
use crate::error::{Result, WorldError};
use crate::item::{PartitionRecord, SceneItem};
use crate::partition::{Partition, PartitionLock, PartitionState};
use crate::property::{PropertySchema, PropertyTable};

type Storage = Arc<RwLock<HashMap<PartitionId, String>>>;

/// A decoded load, waiting to be bound
struct LoadOutcome {
    partition: PartitionId,
    result: Result<PartitionRecord>,
}

/// In-memory streaming world.
pub struct World {
    config: StreamingConfig,
    schemas: RwLock<HashMap<String, Arc<PropertySchema>>>,
    partitions: RwLock<HashMap<PartitionId, Partition>>,
    items: RwLock<HashMap<LinkableId, Arc<SceneItem>>>,
    storage: Storage,
    requests: Option<Sender<PartitionId>>,
    results: Receiver<LoadOutcome>,
    in_flight: Mutex<HashSet<PartitionId>>,
    synchronous: AtomicBool,
    workers: Vec<JoinHandle<()>>,
}

impl World {
    /// Create a world and start its load workers
    pub fn new(config: StreamingConfig) -> Result<Arc<Self>> {
        let (request_tx, request_rx) = crossbeam_channel::unbounded::<PartitionId>();
        let (result_tx, result_rx) = crossbeam_channel::unbounded::<LoadOutcome>();
        let storage: Storage = Arc::new(RwLock::new(HashMap::new()));

        let mut workers = Vec::with_capacity(config.load_workers.max(1));
        for index in 0..config.load_workers.max(1) {
            let requests = request_rx.clone();
            let results = result_tx.clone();
            let storage = Arc::clone(&storage);
            let handle = thread::Builder::new()
                .name(format!("partition-loader-{}", index))
                .spawn(move || load_worker(requests, results, storage))?;
            workers.push(handle);
        }
        log::debug!("Started {} partition load workers", workers.len());

        Ok(Arc::new(Self {
            config,
            schemas: RwLock::new(HashMap::new()),
            partitions: RwLock::new(HashMap::new()),
            items: RwLock::new(HashMap::new()),
            storage,
            requests: Some(request_tx),
            results: result_rx,
            in_flight: Mutex::new(HashSet::new()),
            synchronous: AtomicBool::new(false),
            workers,
        }))
    }

    pub fn config(&self) -> &StreamingConfig {
        &self.config
    }

    // ========================================================================
    // Schemas
    // ========================================================================

    /// Register a property schema, replacing one with the same name
    pub fn register_schema(&self, schema: PropertySchema) -> Arc<PropertySchema> {
        let schema = Arc::new(schema);
        self.schemas
            .write()
            .insert(schema.name.clone(), Arc::clone(&schema));
        schema
    }

    pub fn schema(&self, name: &str) -> Result<Arc<PropertySchema>> {
        self.schemas
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| WorldError::UnknownSchema(name.to_string()))
    }

    // ========================================================================
    // Partitions
    // ========================================================================

    /// Add an empty, loaded outer partition
    pub fn add_partition(&self, name: &str) -> Result<PartitionId> {
        let id = partition_id(name)?;
        let mut partitions = self.partitions.write();
        if partitions.contains_key(&id) {
            return Err(WorldError::DuplicatePartition(id));
        }
        partitions.insert(id.clone(), Partition::new(id.clone()));
        Ok(id)
    }

    /// Add an empty, loaded shell nested in `outer`
    pub fn add_shell(&self, name: &str, outer: &PartitionId) -> Result<PartitionId> {
        let id = partition_id(name)?;
        let mut partitions = self.partitions.write();
        if partitions.contains_key(&id) {
            return Err(WorldError::DuplicatePartition(id));
        }
        let outer = partitions
            .get(outer)
            .ok_or_else(|| WorldError::UnknownPartition(outer.clone()))?;
        let shell = Partition::shell(id.clone(), outer);
        partitions.insert(id.clone(), shell);
        Ok(id)
    }

    /// Lock or unlock a partition (and its shells) for editing
    pub fn lock_partition(&self, id: &PartitionId, locked: bool) -> Result<()> {
        let partitions = self.partitions.read();
        let partition = partitions
            .get(id)
            .ok_or_else(|| WorldError::UnknownPartition(id.clone()))?;
        partition.lock().set_locked(locked);
        log::debug!("Partition {} {}", id, if locked { "locked" } else { "unlocked" });
        Ok(())
    }

    pub fn partition_state(&self, id: &PartitionId) -> Option<PartitionState> {
        self.partitions.read().get(id).map(|p| p.state)
    }

    /// Outer partition and lock of a load unit
    fn placement_of(&self, id: &PartitionId) -> Result<(PartitionId, PartitionLock)> {
        let partitions = self.partitions.read();
        let partition = partitions
            .get(id)
            .ok_or_else(|| WorldError::UnknownPartition(id.clone()))?;
        if !partition.is_loaded() {
            return Err(WorldError::NotLoaded(id.clone()));
        }
        Ok((partition.outside().clone(), partition.lock().clone()))
    }

    /// Ask the workers to load a partition. Returns false if it is already
    /// loaded or loading.
    pub fn request_load(&self, id: &PartitionId) -> Result<bool> {
        {
            let mut partitions = self.partitions.write();
            let partition = partitions
                .get_mut(id)
                .ok_or_else(|| WorldError::UnknownPartition(id.clone()))?;
            if !partition.state.can_load() {
                return Ok(false);
            }
            partition.state = PartitionState::Loading;
        }
        self.in_flight.lock().insert(id.clone());

        let sent = self
            .requests
            .as_ref()
            .map_or(false, |requests| requests.send(id.clone()).is_ok());
        if !sent {
            log::error!("Partition load workers are gone; cannot load {}", id);
            self.fail_load(id);
        }
        Ok(sent)
    }

    /// Save and detach every item of a loaded partition
    pub fn unload_partition(&self, manager: &LinkManager, id: &PartitionId) -> Result<()> {
        let ids = {
            let mut partitions = self.partitions.write();
            let partition = partitions
                .get_mut(id)
                .ok_or_else(|| WorldError::UnknownPartition(id.clone()))?;
            if !partition.is_loaded() {
                return Err(WorldError::NotLoaded(id.clone()));
            }
            partition.state = PartitionState::Unloading;
            partition.items.clone()
        };

        let items: Vec<Arc<SceneItem>> = {
            let items = self.items.read();
            ids.iter().filter_map(|i| items.get(i).cloned()).collect()
        };

        let record = PartitionRecord {
            items: items.iter().map(|item| item.to_record()).collect(),
        };
        let text = serde_json::to_string(&record)?;
        self.storage.write().insert(id.clone(), text);

        for item in &items {
            item.linkable().detach(manager);
            item.clear_dirty();
        }
        {
            let mut resident = self.items.write();
            for item in &items {
                resident.remove(&item.id());
            }
        }
        if let Some(partition) = self.partitions.write().get_mut(id) {
            partition.finish_unloading();
        }
        log::debug!("Unloaded partition {} ({} items)", id, items.len());
        Ok(())
    }

    /// Saved contents of an unloaded partition
    pub fn saved_record(&self, id: &PartitionId) -> Result<Option<PartitionRecord>> {
        match self.storage.read().get(id) {
            Some(text) => Ok(Some(serde_json::from_str(text)?)),
            None => Ok(None),
        }
    }

    // ========================================================================
    // Items
    // ========================================================================

    /// Place a new item with a fresh identifier
    pub fn create_item(
        &self,
        manager: &LinkManager,
        schema: &str,
        kind: ItemKind,
        partition: &PartitionId,
    ) -> Result<Arc<SceneItem>> {
        self.create_item_with_id(manager, LinkableId::generate(), schema, kind, partition)
    }

    /// Place a new item
    pub fn create_item_with_id(
        &self,
        manager: &LinkManager,
        id: LinkableId,
        schema: &str,
        kind: ItemKind,
        partition: &PartitionId,
    ) -> Result<Arc<SceneItem>> {
        let schema = self.schema(schema)?;
        let (outside, lock) = self.placement_of(partition)?;
        let table = PropertyTable::new(schema, lock);
        let item = SceneItem::new(id, kind, table, partition.clone(), outside);
        self.insert_item(manager, &item)?;
        item.mark_dirty();
        Ok(item)
    }

    /// The resident item `id`
    pub fn item(&self, id: LinkableId) -> Option<Arc<SceneItem>> {
        self.items.read().get(&id).cloned()
    }

    pub fn resident_count(&self) -> usize {
        self.items.read().len()
    }

    /// Move an item into another loaded partition
    pub fn move_item(&self, manager: &LinkManager, id: LinkableId, to: &PartitionId) -> Result<()> {
        let item = self.item(id).ok_or(WorldError::UnknownItem(id))?;
        let (outside, lock) = self.placement_of(to)?;
        let from = item.partition().ok_or(WorldError::UnknownItem(id))?;
        if !item.linkable().is_editable() {
            return Err(WorldError::Locked(from));
        }
        if lock.is_locked() {
            return Err(WorldError::Locked(to.clone()));
        }

        {
            let mut partitions = self.partitions.write();
            if let Some(partition) = partitions.get_mut(&from) {
                partition.items.retain(|i| *i != id);
            }
            if let Some(partition) = partitions.get_mut(to) {
                partition.items.push(id);
            }
        }
        item.place(to.clone(), outside, lock);
        item.mark_dirty();
        manager.check_location(item.linkable());
        log::debug!("Moved {} from {} to {}", id, from, to);
        Ok(())
    }

    /// Delete an item, scrubbing every link to and from it
    pub fn delete_item(&self, manager: &LinkManager, id: LinkableId) -> Result<()> {
        let item = self.item(id).ok_or(WorldError::UnknownItem(id))?;
        item.linkable().deleted(manager)?;
        item.linkable().detach(manager);
        self.remove_item(&item);
        log::debug!("Deleted item {}", id);
        Ok(())
    }

    /// Duplicate a set of items into `target`, rewiring links between the
    /// copies. Returns the original to copy mapping.
    pub fn duplicate_items(
        &self,
        manager: &LinkManager,
        ids: &[LinkableId],
        target: &PartitionId,
    ) -> Result<IdMapping> {
        let (outside, lock) = self.placement_of(target)?;
        let originals = ids
            .iter()
            .map(|id| self.item(*id).ok_or(WorldError::UnknownItem(*id)))
            .collect::<Result<Vec<_>>>()?;

        let mut mapping = IdMapping::new();
        for original in &originals {
            let mut record = original.to_record();
            record.id = mapping.assign_fresh(original.id());
            let schema = self.schema(&record.schema)?;
            let (target, outside, lock) = (target.clone(), outside.clone(), lock.clone());
            let copy = SceneItem::from_record(&record, schema, target, outside, lock)?;
            self.insert_item(manager, &copy)?;
            copy.mark_dirty();
        }

        manager.update_mapped_linkers(&mut mapping);
        Ok(mapping)
    }

    /// Rendered objects hosted by a load unit
    pub fn partition_objects(&self, id: &PartitionId) -> Vec<SceneObject> {
        let ids = match self.partitions.read().get(id) {
            Some(partition) => partition.items.clone(),
            None => return Vec::new(),
        };
        let items = self.items.read();
        ids.iter()
            .filter_map(|i| items.get(i))
            .flat_map(|item| item.objects())
            .collect()
    }

    fn insert_item(&self, manager: &LinkManager, item: &Arc<SceneItem>) -> Result<()> {
        let id = item.id();
        let partition = item.partition().ok_or(WorldError::UnknownItem(id))?;
        {
            let mut items = self.items.write();
            if items.contains_key(&id) {
                log::error!("Item {} is already resident", id);
                return Err(LinkError::DuplicateIdentifier(id).into());
            }
            items.insert(id, Arc::clone(item));
        }
        if let Some(p) = self.partitions.write().get_mut(&partition) {
            p.items.push(id);
        }

        if let Err(e) = item.linkable().attach(manager) {
            self.remove_item(item);
            return Err(e.into());
        }
        Ok(())
    }

    fn remove_item(&self, item: &SceneItem) {
        let id = item.id();
        {
            let mut items = self.items.write();
            if items.get(&id).map_or(false, |resident| std::ptr::eq(resident.as_ref(), item)) {
                items.remove(&id);
            }
        }
        if let Some(partition) = item.partition() {
            if let Some(p) = self.partitions.write().get_mut(&partition) {
                p.items.retain(|i| *i != id);
            }
        }
    }

    // ========================================================================
    // Loading
    // ========================================================================

    /// Bind completed loads. In synchronous mode, waits for every
    /// outstanding load.
    pub fn tick(&self, manager: &LinkManager) -> usize {
        let synchronous = self.synchronous.load(Ordering::Acquire);
        let mut bound = 0;

        loop {
            let outcome = match self.results.try_recv() {
                Ok(outcome) => outcome,
                Err(_) if synchronous && self.is_loading() => {
                    match self.results.recv_timeout(self.config.synchronous_wait()) {
                        Ok(outcome) => outcome,
                        Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                            self.fail_outstanding();
                            break;
                        }
                    }
                }
                Err(_) => break,
            };

            self.bind(manager, outcome);
            bound += 1;
            if !synchronous && bound >= self.config.max_binds_per_tick {
                break;
            }
        }
        bound
    }

    fn bind(&self, manager: &LinkManager, outcome: LoadOutcome) {
        let LoadOutcome { partition, result } = outcome;
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                log::error!("Failed to load partition {}: {}", partition, e);
                self.fail_load(&partition);
                return;
            }
        };

        let (outside, lock) = {
            let partitions = self.partitions.read();
            match partitions.get(&partition) {
                Some(p) if p.state == PartitionState::Loading => {
                    (p.outside().clone(), p.lock().clone())
                }
                _ => {
                    log::warn!(
                        "Discarding load of partition {} that is no longer loading",
                        partition
                    );
                    self.in_flight.lock().remove(&partition);
                    return;
                }
            }
        };

        let mut loaded = Vec::with_capacity(record.items.len());
        for item in &record.items {
            let built = self.schema(&item.schema).and_then(|schema| {
                let (partition, outside) = (partition.clone(), outside.clone());
                SceneItem::from_record(item, schema, partition, outside, lock.clone())
            });
            match built {
                Ok(built) => loaded.push(built),
                Err(e) => {
                    log::error!("Skipping item {} of partition {}: {}", item.id, partition, e)
                }
            }
        }

        {
            let mut items = self.items.write();
            loaded.retain(|item| {
                let id = item.id();
                if items.contains_key(&id) {
                    log::error!("Item {} of partition {} is already resident", id, partition);
                    return false;
                }
                items.insert(id, Arc::clone(item));
                true
            });
        }
        if let Some(p) = self.partitions.write().get_mut(&partition) {
            p.bind(loaded.iter().map(|item| item.id()).collect());
        }

        for item in &loaded {
            if let Err(e) = item.linkable().attach(manager) {
                log::error!("Could not register item {}: {}", item.id(), e);
            }
        }
        self.in_flight.lock().remove(&partition);
        log::debug!("Bound partition {} ({} items)", partition, loaded.len());
    }

    fn fail_load(&self, id: &PartitionId) {
        if let Some(partition) = self.partitions.write().get_mut(id) {
            partition.fail();
        }
        self.in_flight.lock().remove(id);
    }

    fn fail_outstanding(&self) {
        let outstanding: Vec<PartitionId> = self.in_flight.lock().drain().collect();
        for id in outstanding {
            log::error!("Timed out waiting for partition {}", id);
            self.fail_load(&id);
        }
    }
}

impl PartitionLoader for World {
    fn load_partition_now(&self, partition: &PartitionId) {
        let shells: Vec<PartitionId> = self
            .partitions
            .read()
            .values()
            .filter(|p| p.is_shell_of(partition))
            .map(|p| p.id.clone())
            .collect();

        for id in std::iter::once(partition.clone()).chain(shells) {
            if let Err(e) = self.request_load(&id) {
                log::error!("Cannot load partition {}: {}", id, e);
            }
        }
    }

    fn is_loading(&self) -> bool {
        !self.in_flight.lock().is_empty()
    }

    fn set_synchronous_mode(&self, synchronous: bool) {
        self.synchronous.store(synchronous, Ordering::Release);
    }

    fn tick(&self, manager: &LinkManager) {
        World::tick(self, manager);
    }
}

impl Drop for World {
    fn drop(&mut self) {
        // Closing the request channel stops the workers
        self.requests.take();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

fn partition_id(name: &str) -> Result<PartitionId> {
    PartitionId::new(name)
        .ok_or_else(|| WorldError::Link(LinkError::InvalidIdentifier(name.to_string())))
}

/// Decode saved partitions until the request channel closes
fn load_worker(requests: Receiver<PartitionId>, results: Sender<LoadOutcome>, storage: Storage) {
    for partition in requests.iter() {
        let text = storage.read().get(&partition).cloned();
        let result = match text {
            Some(text) => {
                serde_json::from_str::<PartitionRecord>(&text).map_err(WorldError::from)
            }
            None => Ok(PartitionRecord::default()),
        };
        log::trace!("Decoded partition {}", partition);
        if results.send(LoadOutcome { partition, result }).is_err() {
            break;
        }
    }
}
