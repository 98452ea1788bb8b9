//! In-memory key-value backend.

use super::{KvEntry, KvStore, Revision};
use crate::error::{Result, StreamError};
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// Ordered in-memory map. Revisions come from one counter shared by all keys.
#[derive(Debug, Default)]
pub struct MemoryKv {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    entries: BTreeMap<String, (Vec<u8>, Revision)>,
    last_revision: Revision,
}

impl Inner {
    fn write(&mut self, key: &str, value: &[u8]) -> Revision {
        self.last_revision += 1;
        self.entries
            .insert(key.to_string(), (value.to_vec(), self.last_revision));
        self.last_revision
    }
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KvStore for MemoryKv {
    fn create(&self, key: &str, value: &[u8]) -> Result<Revision> {
        let mut inner = self.inner.write();
        if inner.entries.contains_key(key) {
            return Err(StreamError::AlreadyExists(key.to_string()));
        }
        Ok(inner.write(key, value))
    }

    fn get(&self, key: &str) -> Result<Option<KvEntry>> {
        Ok(self
            .inner
            .read()
            .entries
            .get(key)
            .map(|(value, revision)| KvEntry {
                key: key.to_string(),
                value: value.clone(),
                revision: *revision,
            }))
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<Revision> {
        Ok(self.inner.write().write(key, value))
    }

    fn update(&self, key: &str, value: &[u8], expected: Revision) -> Result<Revision> {
        let mut inner = self.inner.write();
        match inner.entries.get(key) {
            None => Err(StreamError::NotFound(key.to_string())),
            Some((_, found)) if *found != expected => Err(StreamError::RevisionConflict {
                key: key.to_string(),
                expected,
                found: *found,
            }),
            Some(_) => Ok(inner.write(key, value)),
        }
    }

    fn delete(&self, key: &str) -> Result<()> {
        match self.inner.write().entries.remove(key) {
            Some(_) => Ok(()),
            None => Err(StreamError::NotFound(key.to_string())),
        }
    }

    fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let inner = self.inner.read();
        Ok(inner
            .entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}
