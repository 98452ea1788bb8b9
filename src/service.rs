//! Log service tying the registry, append engine and reader together.

use crate::append::AppendEngine;
use crate::bus::{LocalBus, NotificationBus};
use crate::cache::RecordCache;
use crate::config::ServiceConfig;
use crate::error::{Result, StreamError};
use crate::keys;
use crate::kv::{FileKv, FileKvConfig, KvStore, MemoryKv};
use crate::reader::{ReaderOptions, ReplayTailReader, TailStream};
use crate::registry::NodeRegistry;
use crate::session::StreamSession;
use crate::types::{EventRecord, NodeId, Sequence};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

/// The node log.
///
/// Provides a unified interface for:
/// - Opening, closing and listing nodes
/// - Appending data and close records
/// - Replay-then-tail streams, inline or on a session thread
///
/// All state lives in the key-value store and the bus; a service holds no
/// per-node state of its own, so any number of services (or threads sharing
/// one) may serve the same nodes.
pub struct LogService {
    config: ServiceConfig,
    kv: Arc<dyn KvStore>,
    registry: NodeRegistry,
    appender: AppendEngine,
    reader: ReplayTailReader,
    cache: Arc<RecordCache>,
}

impl LogService {
    pub fn new(
        kv: Arc<dyn KvStore>,
        bus: Arc<dyn NotificationBus>,
        config: ServiceConfig,
    ) -> Result<Self> {
        config.validate()?;

        let cache = Arc::new(RecordCache::new(Arc::clone(&kv), config.record_cache_size));
        let registry = NodeRegistry::new(Arc::clone(&kv));
        let appender = AppendEngine::new(Arc::clone(&kv), Arc::clone(&bus), &config);
        let reader = ReplayTailReader::new(
            Arc::clone(&kv),
            bus,
            Arc::clone(&cache),
            config.gap_timeout,
        );

        Ok(Self {
            config,
            kv,
            registry,
            appender,
            reader,
            cache,
        })
    }

    /// Service over a fresh in-memory store and bus.
    pub fn in_memory(config: ServiceConfig) -> Result<Self> {
        Self::new(
            Arc::new(MemoryKv::new()),
            Arc::new(LocalBus::default()),
            config,
        )
    }

    /// Service over an on-disk store and an in-process bus.
    pub fn open_local(kv_config: FileKvConfig, config: ServiceConfig) -> Result<Self> {
        let kv = FileKv::open_or_create(kv_config)?;
        Self::new(Arc::new(kv), Arc::new(LocalBus::default()), config)
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// The underlying store, for inspection and tooling.
    pub fn kv(&self) -> &Arc<dyn KvStore> {
        &self.kv
    }

    // --- Nodes ---

    /// Open a node under a fresh random identity, retrying collisions.
    pub fn open_node(&self) -> Result<NodeId> {
        let mut last = None;
        for attempt in 1..=self.config.open_attempts {
            match self.registry.open() {
                Ok(node) => return Ok(node),
                Err(StreamError::AlreadyExists(id)) => {
                    debug!(attempt, node = %id, "Identity collision, retrying");
                    last = Some(id);
                }
                Err(e) => return Err(e),
            }
        }
        Err(StreamError::AlreadyExists(last.unwrap_or_default()))
    }

    /// Open a node under `node`; `AlreadyExists` if taken.
    pub fn open_node_as(&self, node: NodeId) -> Result<NodeId> {
        self.registry.open_as(node)
    }

    /// Forget the node's counter; records stay readable.
    pub fn close_node(&self, node: &NodeId) -> Result<()> {
        self.registry.close(node)
    }

    pub fn list_open(&self) -> Result<BTreeSet<NodeId>> {
        self.registry.list_open()
    }

    pub fn is_open(&self, node: &NodeId) -> Result<bool> {
        self.registry.is_open(node)
    }

    // --- Appends ---

    pub fn append(&self, node: &NodeId, content_type: Option<&str>, payload: &[u8]) -> Result<Sequence> {
        self.appender.append(node, content_type, payload)
    }

    pub fn append_close(&self, node: &NodeId, reason: Option<&str>) -> Result<Sequence> {
        self.appender.append_close(node, reason)
    }

    // --- Reads ---

    /// Counter value, or `None` if the node is not open.
    pub fn current_sequence(&self, node: &NodeId) -> Result<Option<Sequence>> {
        match self.kv.get(&keys::seq_key(node))? {
            Some(entry) => keys::decode_counter(&entry.value)
                .map(Some)
                .ok_or_else(|| StreamError::Corruption(format!("unreadable counter for node {node}"))),
            None => Ok(None),
        }
    }

    /// Record at `(node, sequence)`, if stored.
    pub fn get_record(&self, node: &NodeId, sequence: Sequence) -> Result<Option<Arc<EventRecord>>> {
        self.cache.get(node, sequence)
    }

    /// Replay-then-tail stream driven by the caller.
    pub fn stream(&self, node: &NodeId, options: ReaderOptions) -> Result<TailStream> {
        self.reader.open(node, options)
    }

    /// Replay-then-tail stream on its own thread.
    pub fn spawn_stream(&self, node: &NodeId, options: ReaderOptions) -> Result<StreamSession> {
        let stream = self.reader.open(node, options)?;
        StreamSession::spawn(stream, self.config.session_buffer_size)
    }
}
