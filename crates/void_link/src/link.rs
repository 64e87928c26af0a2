//! Rendered links and boundary placeholders
//!
//! A [`RenderedLink`] is the edge shown between two resident objects. It
//! is shared by both endpoints and owned by exactly one of them, chosen by
//! [`owns_link`]. A [`BoundaryLink`] stands in for a link whose far side
//! lives in a partition that is not loaded.

use core::fmt;
use core::ops::{BitAnd, BitOr, Not};
use core::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};

use crate::id::{LinkableId, PartitionId};
use crate::item::ItemKind;
use crate::linkable::Linkable;

/// Traversal direction of a rendered link, relative to its start and end
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkDirection {
    #[default]
    None,
    StartToEnd,
    EndToStart,
    Both,
}

impl LinkDirection {
    const START_TO_END: u8 = 0b01;
    const END_TO_START: u8 = 0b10;

    /// Raw flag bits
    pub const fn bits(self) -> u8 {
        match self {
            LinkDirection::None => 0,
            LinkDirection::StartToEnd => Self::START_TO_END,
            LinkDirection::EndToStart => Self::END_TO_START,
            LinkDirection::Both => Self::START_TO_END | Self::END_TO_START,
        }
    }

    /// Build from flag bits, ignoring unknown bits
    pub const fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0 => LinkDirection::None,
            Self::START_TO_END => LinkDirection::StartToEnd,
            Self::END_TO_START => LinkDirection::EndToStart,
            _ => LinkDirection::Both,
        }
    }

    /// Check whether every bit of `other` is set
    pub const fn contains(self, other: LinkDirection) -> bool {
        self.bits() & other.bits() == other.bits()
    }

    /// Swap start and end
    pub const fn reversed(self) -> Self {
        match self {
            LinkDirection::StartToEnd => LinkDirection::EndToStart,
            LinkDirection::EndToStart => LinkDirection::StartToEnd,
            other => other,
        }
    }

    pub const fn is_none(self) -> bool {
        matches!(self, LinkDirection::None)
    }
}

impl BitOr for LinkDirection {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self::from_bits(self.bits() | rhs.bits())
    }
}

impl BitAnd for LinkDirection {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self::from_bits(self.bits() & rhs.bits())
    }
}

impl Not for LinkDirection {
    type Output = Self;

    fn not(self) -> Self {
        Self::from_bits(!self.bits())
    }
}

/// Decide whether `a` owns the link between `a` and `b`.
///
/// An entity outranks a data object; between items of the same kind the
/// smaller identifier owns the link.
pub fn owns_link(a_kind: ItemKind, a_id: LinkableId, b_kind: ItemKind, b_id: LinkableId) -> bool {
    match (a_kind, b_kind) {
        (ItemKind::Entity, ItemKind::DataObject) => true,
        (ItemKind::DataObject, ItemKind::Entity) => false,
        _ => a_id < b_id,
    }
}

/// The edge rendered between two resident linkables.
pub struct RenderedLink {
    start: Weak<Linkable>,
    end: Weak<Linkable>,
    direction: AtomicU8,
    host: Option<PartitionId>,
}

impl RenderedLink {
    pub(crate) fn new(
        start: &Arc<Linkable>,
        end: &Arc<Linkable>,
        host: Option<PartitionId>,
    ) -> Self {
        Self {
            start: Arc::downgrade(start),
            end: Arc::downgrade(end),
            direction: AtomicU8::new(LinkDirection::None.bits()),
            host,
        }
    }

    /// The owning endpoint
    pub fn start(&self) -> Option<Arc<Linkable>> {
        self.start.upgrade()
    }

    pub fn end(&self) -> Option<Arc<Linkable>> {
        self.end.upgrade()
    }

    /// Current direction flag
    pub fn direction(&self) -> LinkDirection {
        LinkDirection::from_bits(self.direction.load(Ordering::Acquire))
    }

    pub(crate) fn set_direction(&self, direction: LinkDirection) {
        self.direction.store(direction.bits(), Ordering::Release);
    }

    /// Load unit the link was attached to
    pub fn host(&self) -> Option<&PartitionId> {
        self.host.as_ref()
    }

    /// Check whether `linkable` is the owning endpoint
    pub fn is_owned_by(&self, linkable: &Linkable) -> bool {
        core::ptr::eq(self.start.as_ptr(), linkable)
    }

    /// Check whether `linkable` is either endpoint
    pub fn connects(&self, linkable: &Linkable) -> bool {
        core::ptr::eq(self.start.as_ptr(), linkable) || core::ptr::eq(self.end.as_ptr(), linkable)
    }

    /// The endpoint that is not `linkable`
    pub fn other(&self, linkable: &Linkable) -> Option<Arc<Linkable>> {
        if core::ptr::eq(self.start.as_ptr(), linkable) {
            self.end.upgrade()
        } else if core::ptr::eq(self.end.as_ptr(), linkable) {
            self.start.upgrade()
        } else {
            None
        }
    }

    /// Direction seen from `linkable`: `StartToEnd` means it traverses
    /// toward the other endpoint.
    pub fn direction_from(&self, linkable: &Linkable) -> LinkDirection {
        if self.is_owned_by(linkable) {
            self.direction()
        } else {
            self.direction().reversed()
        }
    }
}

impl fmt::Debug for RenderedLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let start = self.start().map(|l| l.identifier());
        let end = self.end().map(|l| l.identifier());
        f.debug_struct("RenderedLink")
            .field("start", &start)
            .field("end", &end)
            .field("direction", &self.direction())
            .field("host", &self.host)
            .finish()
    }
}

/// One-sided placeholder from a resident linkable toward an unloaded
/// partition.
#[derive(Debug)]
pub struct BoundaryLink {
    source: Weak<Linkable>,
    target: PartitionId,
    host: Option<PartitionId>,
}

impl BoundaryLink {
    pub(crate) fn new(
        source: &Arc<Linkable>,
        target: PartitionId,
        host: Option<PartitionId>,
    ) -> Self {
        Self {
            source: Arc::downgrade(source),
            target,
            host,
        }
    }

    pub fn source(&self) -> Option<Arc<Linkable>> {
        self.source.upgrade()
    }

    /// Partition the placeholder points toward
    pub fn target(&self) -> &PartitionId {
        &self.target
    }

    /// Load unit the placeholder was attached to
    pub fn host(&self) -> Option<&PartitionId> {
        self.host.as_ref()
    }
}

/// A rendered object attached to an item's load unit
#[derive(Clone, Debug)]
pub enum SceneObject {
    Link(Arc<RenderedLink>),
    Boundary(Arc<BoundaryLink>),
}

impl SceneObject {
    /// Load unit the object belongs to
    pub fn host(&self) -> Option<&PartitionId> {
        match self {
            SceneObject::Link(link) => link.host(),
            SceneObject::Boundary(boundary) => boundary.host(),
        }
    }

    /// Check whether two handles refer to the same object
    pub fn same_as(&self, other: &SceneObject) -> bool {
        match (self, other) {
            (SceneObject::Link(a), SceneObject::Link(b)) => Arc::ptr_eq(a, b),
            (SceneObject::Boundary(a), SceneObject::Boundary(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}
