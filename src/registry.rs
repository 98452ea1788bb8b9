//! Node registry: which nodes are open.
//!
//! A node is open while its sequence counter key exists. Closing deletes the
//! counter and leaves the node's records in place.

use crate::error::{Result, StreamError};
use crate::keys;
use crate::kv::KvStore;
use crate::types::{NodeId, Sequence};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

/// Creates and destroys per-node sequence counters.
pub struct NodeRegistry {
    kv: Arc<dyn KvStore>,
}

impl NodeRegistry {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Open a node under a random identity.
    ///
    /// A collision with an open node fails with `AlreadyExists`; pick again.
    pub fn open(&self) -> Result<NodeId> {
        self.open_as(NodeId::random())
    }

    /// Open a node under a caller-chosen identity.
    ///
    /// Identities whose history is still stored are refused as well, so a
    /// reopened identity can never collide with its old records.
    pub fn open_as(&self, node: NodeId) -> Result<NodeId> {
        if self.kv.get(&keys::data_key(&node, Sequence(1)))?.is_some() {
            return Err(StreamError::AlreadyExists(node.to_string()));
        }

        match self
            .kv
            .create(&keys::seq_key(&node), &keys::encode_counter(Sequence::ZERO))
        {
            Ok(_) => {
                debug!(%node, "Opened node");
                Ok(node)
            }
            Err(StreamError::AlreadyExists(_)) => Err(StreamError::AlreadyExists(node.to_string())),
            Err(e) => Err(e),
        }
    }

    /// Delete the node's counter. `NotFound` if it is not open.
    pub fn close(&self, node: &NodeId) -> Result<()> {
        match self.kv.delete(&keys::seq_key(node)) {
            Ok(()) => {
                debug!(%node, "Closed node");
                Ok(())
            }
            Err(StreamError::NotFound(_)) => Err(StreamError::NotFound(node.to_string())),
            Err(e) => Err(e),
        }
    }

    /// Every node with a live counter.
    pub fn list_open(&self) -> Result<BTreeSet<NodeId>> {
        Ok(self
            .kv
            .keys(keys::SEQ_PREFIX)?
            .iter()
            .filter_map(|key| keys::node_from_seq_key(key))
            .collect())
    }

    pub fn is_open(&self, node: &NodeId) -> Result<bool> {
        Ok(self.kv.get(&keys::seq_key(node))?.is_some())
    }
}
