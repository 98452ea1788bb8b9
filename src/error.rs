//! Error types for the node log.

use crate::types::{NodeId, Sequence};
use thiserror::Error;

/// Main error type for log operations.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Revision conflict on {key}: expected {expected}, found {found}")]
    RevisionConflict { key: String, expected: u64, found: u64 },

    #[error("Key too long: {len} bytes (limit {limit})")]
    KeyTooLong { len: usize, limit: usize },

    #[error("Invalid node identity: {0:?}")]
    InvalidNode(String),

    #[error("Invalid sequence: {0}")]
    InvalidSequence(String),

    #[error("Node {0} has been closed")]
    NodeClosed(NodeId),

    #[error("Payload too large: {size} bytes (limit {limit})")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Invalid store format: {0}")]
    InvalidFormat(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },

    /// A sequence was claimed but its record could not be stored.
    #[error("Durable-consistency fault on node {node} at {sequence}: {reason}")]
    Consistency {
        node: NodeId,
        sequence: Sequence,
        reason: String,
    },

    #[error("Notification bus unavailable: {0}")]
    BusUnavailable(String),

    #[error("Subscription closed: {0}")]
    SubscriptionClosed(String),

    #[error("Stream cancelled")]
    Cancelled,

    #[error("End of stream")]
    EndOfStream,

    #[error("Store is locked by another process")]
    Locked,

    #[error("Store not initialized")]
    NotInitialized,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl StreamError {
    /// Whether this error means another writer won a race and the operation
    /// can simply be retried against fresh state.
    pub fn is_contention(&self) -> bool {
        matches!(
            self,
            StreamError::RevisionConflict { .. }
                | StreamError::AlreadyExists(_)
                | StreamError::NotFound(_)
        )
    }
}

impl From<serde_json::Error> for StreamError {
    fn from(e: serde_json::Error) -> Self {
        StreamError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for StreamError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        StreamError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for StreamError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        StreamError::Deserialization(e.to_string())
    }
}

/// Result type for log operations.
pub type Result<T> = std::result::Result<T, StreamError>;
