use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::container::SealedContainer;
use crate::error::{Result, StrataError};
use strata_types::ContainerId;

/// The persistent fingerprint-index store. Only get and insert-if-absent;
/// the engine never updates or deletes entries.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Insert `value` unless `key` is already present. Returns `false` when
    /// the existing entry won, leaving it untouched.
    fn put(&self, key: &[u8], value: &[u8]) -> Result<bool>;
}

/// In-memory `KvStore`. The data plane only needs get/put semantics, so
/// this is the shipped default; a persistent engine can replace it behind
/// the trait.
#[derive(Clone, Default)]
pub struct MemoryKvStore {
    map: Arc<Mutex<HashMap<Vec<u8>, Vec<u8>>>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock_map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_map().is_empty()
    }

    fn lock_map(&self) -> std::sync::MutexGuard<'_, HashMap<Vec<u8>, Vec<u8>>> {
        self.map.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl KvStore for MemoryKvStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.lock_map().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<bool> {
        let mut map = self.lock_map();
        if map.contains_key(key) {
            return Ok(false);
        }
        map.insert(key.to_vec(), value.to_vec());
        Ok(true)
    }
}

/// On-disk container store: one immutable file per sealed container, named
/// by the identifier's hex form.
#[derive(Clone)]
pub struct ContainerStore {
    root: PathBuf,
}

impl ContainerStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    pub fn open(root: &Path) -> Result<Self> {
        fs::create_dir_all(root)?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    fn container_path(&self, id: &ContainerId) -> PathBuf {
        self.root.join(id.to_hex())
    }

    /// Write a sealed container to a temp file in the store directory, then
    /// atomically rename into place so readers never see a partial file.
    pub fn write(&self, container: &SealedContainer) -> Result<()> {
        let path = self.container_path(&container.id);
        let mut tmp = tempfile::NamedTempFile::new_in(&self.root)?;
        tmp.write_all(&container.bytes)?;
        tmp.persist(&path).map_err(|e| StrataError::Io(e.error))?;
        Ok(())
    }

    /// Read a container's full byte layout.
    pub fn read(&self, id: &ContainerId) -> Result<Vec<u8>> {
        match fs::read(self.container_path(id)) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StrataError::ContainerMissing(*id))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn exists(&self, id: &ContainerId) -> Result<bool> {
        match fs::metadata(self.container_path(id)) {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
