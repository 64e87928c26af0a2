//! Error types for the streaming world

use thiserror::Error;

use void_link::{LinkError, LinkableId, PartitionId};

/// Streaming world errors
#[derive(Debug, Error)]
pub enum WorldError {
    #[error(transparent)]
    Link(#[from] LinkError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unknown partition: {0}")]
    UnknownPartition(PartitionId),

    #[error("Partition {0} already exists")]
    DuplicatePartition(PartitionId),

    #[error("Partition {0} is not loaded")]
    NotLoaded(PartitionId),

    #[error("Partition {0} is locked")]
    Locked(PartitionId),

    #[error("Unknown item: {0}")]
    UnknownItem(LinkableId),

    #[error("Unknown property schema: {0}")]
    UnknownSchema(String),

    #[error("Property record does not match schema {schema}: {reason}")]
    SchemaMismatch { schema: String, reason: String },
}

/// Result type for world operations
pub type Result<T> = std::result::Result<T, WorldError>;
