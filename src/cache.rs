//! LRU cache of decoded records.
//!
//! Records never change once written, so a cached record stays valid for as
//! long as it is cached. Absent records are not cached.

use crate::error::Result;
use crate::keys;
use crate::kv::KvStore;
use crate::types::{EventRecord, NodeId, Sequence};
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Read-through cache in front of the record keys.
pub struct RecordCache {
    kv: Arc<dyn KvStore>,
    cache: Mutex<LruCache<(NodeId, Sequence), Arc<EventRecord>>>,
}

impl RecordCache {
    pub fn new(kv: Arc<dyn KvStore>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            kv,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Record at `(node, sequence)`, or `None` if nothing is stored there.
    pub fn get(&self, node: &NodeId, sequence: Sequence) -> Result<Option<Arc<EventRecord>>> {
        let cache_key = (node.clone(), sequence);
        if let Some(record) = self.cache.lock().get(&cache_key) {
            return Ok(Some(Arc::clone(record)));
        }

        let Some(entry) = self.kv.get(&keys::data_key(node, sequence))? else {
            return Ok(None);
        };
        let record = Arc::new(EventRecord::from_json(&entry.value)?);
        self.cache.lock().put(cache_key, Arc::clone(&record));
        Ok(Some(record))
    }

    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
