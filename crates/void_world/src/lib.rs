//! # void_world - In-memory streaming world
//!
//! A small editor world that streams partitions through background load
//! workers and drives a [`void_link::LinkManager`]:
//! - Outer partitions with nested shells and edit locks
//! - Typed item properties saved as JSON records
//! - Load, unload, move, delete and duplicate operations
//!
//! ## Example
//!
//! ```ignore
//! use void_world::prelude::*;
//!
//! let world = World::new(StreamingConfig::default())?;
//! let manager = LinkManager::new(LinkManagerConfig::default(), world.clone(), history);
//!
//! world.register_schema(PropertySchema::new("switch").link("target"));
//! let cell = world.add_partition("cell_0_0")?;
//! let switch = world.create_item(&manager, "switch", ItemKind::Entity, &cell)?;
//!
//! // Once per frame
//! world.tick(&manager);
//! manager.tick();
//! ```

pub mod config;
pub mod error;
pub mod item;
pub mod partition;
pub mod property;
pub mod world;

pub use config::StreamingConfig;
pub use error::{Result, WorldError};
pub use item::{ItemRecord, PartitionRecord, SceneItem};
pub use partition::{Partition, PartitionLock, PartitionState};
pub use property::{
    PropertyDef, PropertyRecord, PropertySchema, PropertyTable, PropertyType, PropertyValue,
};
pub use world::World;

/// Prelude - commonly used types
pub mod prelude {
    pub use crate::config::StreamingConfig;
    pub use crate::error::{Result, WorldError};
    pub use crate::item::SceneItem;
    pub use crate::property::{PropertySchema, PropertyType};
    pub use crate::world::World;
    pub use void_link::prelude::*;
}
