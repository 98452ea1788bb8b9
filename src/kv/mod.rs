//! Key-value capability the log is built on.
//!
//! Two backends ship with the crate:
//! - [`MemoryKv`]: ordered in-memory map, for tests and embedding.
//! - [`FileKv`]: one checksummed file per key, sharded into directories by
//!   the low byte of the key's CRC32.
//!
//! Every stored value carries a revision. [`KvStore::update`] is the
//! compare-and-swap primitive the append engine claims sequences with.

mod file;
mod memory;

pub use file::{FileKv, FileKvConfig, MAX_KEY_LEN};
pub use memory::MemoryKv;

use crate::error::Result;

/// Monotonic per-store write version.
pub type Revision = u64;

/// A stored value and the revision that wrote it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KvEntry {
    pub key: String,
    pub value: Vec<u8>,
    pub revision: Revision,
}

/// Storage capability consumed by the registry, the append engine and the reader.
pub trait KvStore: Send + Sync {
    /// Store `value` only if `key` is absent; `AlreadyExists` otherwise.
    fn create(&self, key: &str, value: &[u8]) -> Result<Revision>;

    /// Current value, or `None`.
    fn get(&self, key: &str) -> Result<Option<KvEntry>>;

    /// Unconditional write.
    fn put(&self, key: &str, value: &[u8]) -> Result<Revision>;

    /// Write only if the stored revision equals `expected`.
    ///
    /// Fails with `RevisionConflict` when another write got there first and
    /// `NotFound` when the key is gone.
    fn update(&self, key: &str, value: &[u8], expected: Revision) -> Result<Revision>;

    /// Remove `key`; `NotFound` if absent.
    fn delete(&self, key: &str) -> Result<()>;

    /// All keys starting with `prefix`, sorted.
    fn keys(&self, prefix: &str) -> Result<Vec<String>>;
}
