//! # void_link - Streaming-aware object linking
//!
//! Directed references between world objects that keep working while the
//! world streams partitions in and out:
//! - Per-object link facade with rendered links and back links
//! - Link manager with a registry, location cache and budgeted work queues
//! - Placeholders toward partitions that are not loaded
//! - Undo integration and link remapping for duplicated objects
//!
//! ## Example
//!
//! ```ignore
//! use void_link::prelude::*;
//!
//! let manager = LinkManager::new(LinkManagerConfig::default(), loader, history.clone());
//!
//! // Items register their facade when they enter the world
//! door.linkable().attach(&manager)?;
//! switch.linkable().attach(&manager)?;
//!
//! manager.add_link(switch.linkable(), door.linkable(), PropertyIndex::single(0))?;
//!
//! // Once per frame
//! manager.tick();
//!
//! history.undo(&manager)?;
//! ```

pub mod clone;
pub mod config;
pub mod error;
pub mod id;
pub mod item;
pub mod link;
pub mod linkable;
pub mod loader;
pub mod manager;
pub mod persist;
pub mod property;
pub mod undo;

#[cfg(test)]
mod testing;

pub use clone::IdMapping;
pub use config::LinkManagerConfig;
pub use error::{LinkError, Result};
pub use id::{LinkRef, LinkableId, PartitionId};
pub use item::{ItemKind, LinkableItem};
pub use link::{BoundaryLink, LinkDirection, RenderedLink, SceneObject};
pub use linkable::Linkable;
pub use loader::{PartitionLoader, ResidentLoader};
pub use manager::{LinkManager, PendingLink, QueueCounts, QueueKind, TickStats};
pub use persist::{BackLinksRecord, LinkRecord};
pub use property::{LinkSlot, PropertyIndex, PropertyKind, PropertyStore};
pub use undo::{LinkHistory, LinkOperation, NullUndo, UndoSink};

/// Prelude - commonly used types
pub mod prelude {
    pub use crate::clone::IdMapping;
    pub use crate::config::LinkManagerConfig;
    pub use crate::error::{LinkError, Result};
    pub use crate::id::{LinkRef, LinkableId, PartitionId};
    pub use crate::item::{ItemKind, LinkableItem};
    pub use crate::linkable::Linkable;
    pub use crate::loader::PartitionLoader;
    pub use crate::manager::LinkManager;
    pub use crate::property::{PropertyIndex, PropertyStore};
    pub use crate::undo::{LinkHistory, UndoSink};
}
