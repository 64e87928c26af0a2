//! Shared setup for the streaming world tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use void_link::{LinkHistory, LinkManager, LinkManagerConfig, PartitionLoader};
use void_world::{PartitionState, PropertySchema, StreamingConfig, World};

pub struct Harness {
    pub world: Arc<World>,
    pub manager: LinkManager,
    pub history: Arc<LinkHistory>,
}

/// A world with a `switch` schema (link + link array) and a `marker`
/// schema (no links), wired to a link manager and undo history.
pub fn harness() -> Harness {
    let _ = env_logger::builder().is_test(true).try_init();

    let world = World::new(StreamingConfig::default()).unwrap();
    world.register_schema(PropertySchema::new("switch").link("target").link_array("extra"));
    world.register_schema(PropertySchema::new("marker").text("label"));

    let history = Arc::new(LinkHistory::new());
    let config = LinkManagerConfig::default().with_budget(Duration::from_millis(50));
    let manager = LinkManager::new(config, world.clone(), history.clone());
    Harness { world, manager, history }
}

impl Harness {
    /// Tick the world and the manager until no load is in flight and no
    /// outstanding entry is left
    pub fn settle(&self) {
        for _ in 0..500 {
            self.world.tick(&self.manager);
            self.manager.tick();
            if !self.world.is_loading() && self.manager.queue_counts().outstanding() == 0 {
                return;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    /// Tick until `partition` is loaded and the queues have settled
    pub fn load(&self, partition: &void_link::PartitionId) {
        self.world.request_load(partition).unwrap();
        for _ in 0..500 {
            self.settle();
            if self.world.partition_state(partition) == Some(PartitionState::Loaded) {
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        self.settle();
    }
}
