//! File-backed key-value backend.

use super::{KvEntry, KvStore, Revision};
use crate::error::{Result, StreamError};
use fs2::FileExt;
use parking_lot::Mutex;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Magic bytes for the store manifest.
const STORE_MAGIC: &[u8; 4] = b"TLK\0";

/// Current store format version.
const STORE_VERSION: u8 = 1;

/// Magic bytes for entry files.
const ENTRY_MAGIC: &[u8; 4] = b"KVE\0";

/// Current entry format version.
const ENTRY_VERSION: u8 = 1;

/// magic + version + revision + value length
const ENTRY_HEADER_SIZE: usize = 4 + 1 + 8 + 8;

/// Suffix of in-flight writes, renamed into place once synced.
const TMP_SUFFIX: &str = ".tmp";

/// Longest key, in bytes. File names are the hex of the key plus
/// [`TMP_SUFFIX`] and must stay under the common 255-byte name limit.
pub const MAX_KEY_LEN: usize = 120;

/// File store configuration.
#[derive(Clone, Debug)]
pub struct FileKvConfig {
    /// Base directory.
    pub path: PathBuf,

    /// Whether to create the store if it doesn't exist.
    pub create_if_missing: bool,
}

impl Default for FileKvConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./taillog"),
            create_if_missing: true,
        }
    }
}

/// Durable key-value store keeping one file per key.
///
/// Writes go to a temp file that is synced and renamed over the entry, so
/// readers never observe a half-written value and need no lock. Mutations
/// serialize on `last_revision`, which makes `create` and `update` atomic
/// within the process; the `LOCK` file keeps other processes out.
pub struct FileKv {
    path: PathBuf,

    /// Lock file for exclusive access.
    _lock_file: File,

    /// Last revision handed out; held for the duration of every mutation.
    last_revision: Mutex<Revision>,
}

impl FileKv {
    /// Open an existing store or create a new one.
    pub fn open_or_create(config: FileKvConfig) -> Result<Self> {
        if config.path.join("MANIFEST").exists() {
            Self::open(config)
        } else if config.create_if_missing {
            Self::create(config)
        } else {
            Err(StreamError::NotInitialized)
        }
    }

    /// Create a new store.
    pub fn create(config: FileKvConfig) -> Result<Self> {
        fs::create_dir_all(config.path.join("keys"))?;
        Self::write_manifest(&config.path)?;
        let lock_file = Self::acquire_lock(&config.path)?;

        Ok(Self {
            path: config.path,
            _lock_file: lock_file,
            last_revision: Mutex::new(0),
        })
    }

    /// Open an existing store, resuming revisions after the highest stored one.
    pub fn open(config: FileKvConfig) -> Result<Self> {
        Self::verify_manifest(&config.path)?;
        let lock_file = Self::acquire_lock(&config.path)?;
        fs::create_dir_all(config.path.join("keys"))?;

        let store = Self {
            path: config.path,
            _lock_file: lock_file,
            last_revision: Mutex::new(0),
        };

        let last = store.recover()?;
        *store.last_revision.lock() = last;
        debug!(path = %store.path.display(), last_revision = last, "Opened file store");

        Ok(store)
    }

    /// Base directory of the store.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Drop leftover temp files and find the highest revision on disk.
    fn recover(&self) -> Result<Revision> {
        let mut last = 0;
        for shard in fs::read_dir(self.path.join("keys"))? {
            let shard = shard?;
            if !shard.file_type()?.is_dir() {
                continue;
            }
            for entry in fs::read_dir(shard.path())? {
                let entry = entry?;
                let name = entry.file_name();
                if name.to_string_lossy().ends_with(TMP_SUFFIX) {
                    warn!(file = %entry.path().display(), "Removing interrupted write");
                    fs::remove_file(entry.path())?;
                    continue;
                }
                if let Some((_, revision)) = Self::read_entry_file(&entry.path())? {
                    last = last.max(revision);
                }
            }
        }
        Ok(last)
    }

    // --- Paths ---

    fn shard_path(&self, key: &str) -> PathBuf {
        let shard = crc32fast::hash(key.as_bytes()) & 0xff;
        self.path.join("keys").join(format!("{shard:02x}"))
    }

    fn entry_path(&self, key: &str) -> Result<PathBuf> {
        Self::check_key(key)?;
        Ok(self.shard_path(key).join(hex::encode(key)))
    }

    fn check_key(key: &str) -> Result<()> {
        if key.len() > MAX_KEY_LEN {
            return Err(StreamError::KeyTooLong {
                len: key.len(),
                limit: MAX_KEY_LEN,
            });
        }
        Ok(())
    }

    // --- Entry files ---

    fn write_entry_file(&self, key: &str, revision: Revision, value: &[u8]) -> Result<()> {
        Self::check_key(key)?;
        let shard_dir = self.shard_path(key);
        fs::create_dir_all(&shard_dir)?;

        let final_path = shard_dir.join(hex::encode(key));
        let tmp_path = shard_dir.join(format!("{}{TMP_SUFFIX}", hex::encode(key)));

        let mut buf = Vec::with_capacity(ENTRY_HEADER_SIZE + value.len() + 4);
        buf.extend_from_slice(ENTRY_MAGIC);
        buf.push(ENTRY_VERSION);
        buf.extend_from_slice(&revision.to_le_bytes());
        buf.extend_from_slice(&(value.len() as u64).to_le_bytes());
        buf.extend_from_slice(value);
        buf.extend_from_slice(&Self::checksum(revision, value).to_le_bytes());

        let mut file = File::create(&tmp_path)?;
        file.write_all(&buf)?;
        file.sync_all()?;
        fs::rename(&tmp_path, &final_path)?;

        Ok(())
    }

    fn read_entry_file(path: &Path) -> Result<Option<(Vec<u8>, Revision)>> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if bytes.len() < ENTRY_HEADER_SIZE + 4 {
            return Err(StreamError::Corruption(format!(
                "truncated entry {}",
                path.display()
            )));
        }
        if &bytes[0..4] != ENTRY_MAGIC {
            return Err(StreamError::InvalidFormat("Invalid entry magic".into()));
        }
        if bytes[4] != ENTRY_VERSION {
            return Err(StreamError::InvalidFormat(format!(
                "Unsupported entry version: {}",
                bytes[4]
            )));
        }

        let revision = u64::from_le_bytes(Self::array8(&bytes[5..13]));
        let value_len = u64::from_le_bytes(Self::array8(&bytes[13..21]));
        // The length comes from disk: overflow is corruption, not a panic.
        let Some(value_end) = usize::try_from(value_len)
            .ok()
            .and_then(|len| ENTRY_HEADER_SIZE.checked_add(len))
            .filter(|end| end.checked_add(4) == Some(bytes.len()))
        else {
            return Err(StreamError::Corruption(format!(
                "entry length mismatch in {}",
                path.display()
            )));
        };

        let value = bytes[ENTRY_HEADER_SIZE..value_end].to_vec();
        let mut stored = [0u8; 4];
        stored.copy_from_slice(&bytes[value_end..]);
        let stored = u32::from_le_bytes(stored);
        let computed = Self::checksum(revision, &value);
        if stored != computed {
            return Err(StreamError::ChecksumMismatch {
                expected: stored,
                got: computed,
            });
        }

        Ok(Some((value, revision)))
    }

    fn array8(slice: &[u8]) -> [u8; 8] {
        let mut arr = [0u8; 8];
        arr.copy_from_slice(slice);
        arr
    }

    fn checksum(revision: Revision, value: &[u8]) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&revision.to_le_bytes());
        hasher.update(value);
        hasher.finalize()
    }

    // --- Manifest & lock ---

    fn write_manifest(path: &Path) -> Result<()> {
        let mut file = File::create(path.join("MANIFEST"))?;
        file.write_all(STORE_MAGIC)?;
        file.write_all(&[STORE_VERSION])?;
        file.sync_all()?;
        Ok(())
    }

    fn verify_manifest(path: &Path) -> Result<()> {
        let bytes = match fs::read(path.join("MANIFEST")) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(StreamError::NotInitialized),
            Err(e) => return Err(e.into()),
        };

        if bytes.len() < 5 || &bytes[0..4] != STORE_MAGIC {
            return Err(StreamError::InvalidFormat("Invalid store magic".into()));
        }
        if bytes[4] != STORE_VERSION {
            return Err(StreamError::InvalidFormat(format!(
                "Unsupported store version: {}",
                bytes[4]
            )));
        }
        Ok(())
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_file = File::create(path.join("LOCK"))?;
        lock_file
            .try_lock_exclusive()
            .map_err(|_| StreamError::Locked)?;
        Ok(lock_file)
    }
}

impl KvStore for FileKv {
    fn create(&self, key: &str, value: &[u8]) -> Result<Revision> {
        let mut last = self.last_revision.lock();
        if self.entry_path(key)?.exists() {
            return Err(StreamError::AlreadyExists(key.to_string()));
        }
        let revision = *last + 1;
        self.write_entry_file(key, revision, value)?;
        *last = revision;
        Ok(revision)
    }

    fn get(&self, key: &str) -> Result<Option<KvEntry>> {
        Ok(Self::read_entry_file(&self.entry_path(key)?)?.map(|(value, revision)| KvEntry {
            key: key.to_string(),
            value,
            revision,
        }))
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<Revision> {
        let mut last = self.last_revision.lock();
        let revision = *last + 1;
        self.write_entry_file(key, revision, value)?;
        *last = revision;
        Ok(revision)
    }

    fn update(&self, key: &str, value: &[u8], expected: Revision) -> Result<Revision> {
        let mut last = self.last_revision.lock();
        match Self::read_entry_file(&self.entry_path(key)?)? {
            None => Err(StreamError::NotFound(key.to_string())),
            Some((_, found)) if found != expected => Err(StreamError::RevisionConflict {
                key: key.to_string(),
                expected,
                found,
            }),
            Some(_) => {
                let revision = *last + 1;
                self.write_entry_file(key, revision, value)?;
                *last = revision;
                Ok(revision)
            }
        }
    }

    fn delete(&self, key: &str) -> Result<()> {
        let path = self.entry_path(key)?;
        let _last = self.last_revision.lock();
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StreamError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();

        for shard in fs::read_dir(self.path.join("keys"))? {
            let shard = shard?;
            if !shard.file_type()?.is_dir() {
                continue;
            }
            for entry in fs::read_dir(shard.path())? {
                let entry = entry?;
                let name = entry.file_name();
                let name = name.to_string_lossy();
                if name.ends_with(TMP_SUFFIX) {
                    continue;
                }
                let Some(key) = hex::decode(name.as_bytes())
                    .ok()
                    .and_then(|raw| String::from_utf8(raw).ok())
                else {
                    continue;
                };
                if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }

        keys.sort();
        Ok(keys)
    }
}
