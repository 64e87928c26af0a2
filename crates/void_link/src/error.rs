//! Error types for the linking system

use thiserror::Error;

use crate::id::{LinkableId, PartitionId};

/// Linking system errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    /// Another resident object already uses this identifier
    #[error("Identifier {0} is already registered to another object")]
    DuplicateIdentifier(LinkableId),

    /// An object may not link to itself
    #[error("Object {0} cannot link to itself")]
    SelfLink(LinkableId),

    /// The object is not registered with the manager
    #[error("Object {0} is not registered")]
    NotRegistered(LinkableId),

    /// The object lives in a partition that is locked for editing
    #[error("Object {0} is in a partition that is not editable")]
    NotEditable(LinkableId),

    /// A referenced object could not be loaded
    #[error("Could not load object {id} from partition {partition}")]
    Unresolved {
        id: LinkableId,
        partition: PartitionId,
    },

    /// The object is not placed in any partition
    #[error("Object {0} is not placed in a partition")]
    NotPlaced(LinkableId),

    /// Property index does not name a link property
    #[error("Property {0} is not a link property")]
    InvalidProperty(usize),

    /// Malformed identifier text
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// Invalid configuration
    #[error("Invalid link configuration: {0}")]
    Config(String),
}

/// Result type for linking operations
pub type Result<T> = std::result::Result<T, LinkError>;
