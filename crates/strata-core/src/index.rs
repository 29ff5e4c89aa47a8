use std::io::Write;
use std::path::Path;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;

use crate::error::{Result, StrataError};
use crate::storage::KvStore;
use strata_types::{ContainerId, Fingerprint, CONTAINER_ID_SIZE};

/// Five `u64` little-endian counters.
pub const STATS_FILE_SIZE: usize = 40;

/// Running dedup counters, persisted across restarts. Monitoring only;
/// nothing in the data plane depends on them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexStats {
    /// Bytes announced by clients (pre-dedup).
    pub logical_bytes: u64,
    pub logical_chunks: u64,
    /// Bytes of chunks that were actually new.
    pub unique_bytes: u64,
    pub unique_chunks: u64,
    /// Container body bytes handed to the write queue.
    pub stored_bytes: u64,
}

impl IndexStats {
    pub fn encode(&self) -> [u8; STATS_FILE_SIZE] {
        let mut out = [0u8; STATS_FILE_SIZE];
        for (i, value) in [
            self.logical_bytes,
            self.logical_chunks,
            self.unique_bytes,
            self.unique_chunks,
            self.stored_bytes,
        ]
        .iter()
        .enumerate()
        {
            out[i * 8..i * 8 + 8].copy_from_slice(&value.to_le_bytes());
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != STATS_FILE_SIZE {
            return Err(StrataError::InvalidFormat(format!(
                "stats record needs {STATS_FILE_SIZE} bytes, got {}",
                bytes.len()
            )));
        }
        let field = |i: usize| {
            u64::from_le_bytes(bytes[i * 8..i * 8 + 8].try_into().expect("8-byte slice"))
        };
        Ok(Self {
            logical_bytes: field(0),
            logical_chunks: field(1),
            unique_bytes: field(2),
            unique_chunks: field(3),
            stored_bytes: field(4),
        })
    }

    /// Load persisted counters. A missing file is a fresh start (all
    /// zeros); a file of the wrong length is an error naming the path.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };
        Self::decode(&bytes).map_err(|_| {
            StrataError::InvalidFormat(format!(
                "stats file '{}' has {} bytes, expected {STATS_FILE_SIZE}",
                path.display(),
                bytes.len()
            ))
        })
    }

    /// Persist counters atomically (temp file, then rename).
    pub fn save(&self, path: &Path) -> Result<()> {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&self.encode())?;
        tmp.persist(path).map_err(|e| StrataError::Io(e.error))?;
        Ok(())
    }

    pub fn dedup_ratio(&self) -> f64 {
        if self.unique_bytes == 0 {
            return 0.0;
        }
        self.logical_bytes as f64 / self.unique_bytes as f64
    }
}

/// Outcome of an index insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// The fingerprint was already mapped; the first writer wins and the
    /// existing container reference is untouched.
    AlreadyPresent(ContainerId),
}

struct IndexInner {
    store: Arc<dyn KvStore>,
    stats: IndexStats,
}

impl IndexInner {
    fn lookup(&self, fingerprint: &Fingerprint) -> Result<Option<ContainerId>> {
        match self.store.get(fingerprint.as_bytes())? {
            Some(value) => {
                let id = ContainerId::from_bytes(&value).ok_or_else(|| {
                    StrataError::InvalidFormat(format!(
                        "index value for {fingerprint} has {} bytes, expected {CONTAINER_ID_SIZE}",
                        value.len()
                    ))
                })?;
                Ok(Some(id))
            }
            None => Ok(None),
        }
    }
}

/// Shared fingerprint-to-container mapping plus the persisted counters.
///
/// All sessions share one instance. The read/write lock is what keeps the
/// check-then-insert sequence atomic across concurrent upload threads: a
/// batch processor holds the write guard for the whole unique-decision of
/// one chunk, so two sessions can never both treat the same fingerprint as
/// new.
pub struct FingerprintIndex {
    inner: RwLock<IndexInner>,
}

impl FingerprintIndex {
    pub fn new(store: Arc<dyn KvStore>, stats: IndexStats) -> Self {
        Self {
            inner: RwLock::new(IndexInner { store, stats }),
        }
    }

    /// Read-only lookup; takes the lock shared.
    pub fn lookup(&self, fingerprint: &Fingerprint) -> Result<Option<ContainerId>> {
        read_unpoisoned(&self.inner).lookup(fingerprint)
    }

    /// Take the write lock for a check-then-insert sequence.
    pub fn begin_write(&self) -> IndexWriteGuard<'_> {
        IndexWriteGuard {
            inner: write_unpoisoned(&self.inner),
        }
    }

    /// Credit a file announcement (login or new-file) to the logical
    /// counters.
    pub fn add_logical(&self, file_size: u64, chunk_count: u64) {
        let mut inner = write_unpoisoned(&self.inner);
        inner.stats.logical_bytes += file_size;
        inner.stats.logical_chunks += chunk_count;
    }

    pub fn stats(&self) -> IndexStats {
        read_unpoisoned(&self.inner).stats
    }

    pub fn save_stats(&self, path: &Path) -> Result<()> {
        self.stats().save(path)
    }
}

/// Write access to the index for the duration of one unique-decision.
pub struct IndexWriteGuard<'a> {
    inner: RwLockWriteGuard<'a, IndexInner>,
}

impl IndexWriteGuard<'_> {
    pub fn lookup(&self, fingerprint: &Fingerprint) -> Result<Option<ContainerId>> {
        self.inner.lookup(fingerprint)
    }

    /// Record `fingerprint -> container`. A concurrent winner is reported,
    /// not overwritten.
    pub fn insert(
        &mut self,
        fingerprint: &Fingerprint,
        container: ContainerId,
    ) -> Result<InsertOutcome> {
        if self
            .inner
            .store
            .put(fingerprint.as_bytes(), container.as_bytes())?
        {
            return Ok(InsertOutcome::Inserted);
        }
        let existing = self.inner.lookup(fingerprint)?.ok_or_else(|| {
            StrataError::Other(format!(
                "index store reported {fingerprint} present but returned no value"
            ))
        })?;
        debug!(
            fingerprint = %fingerprint,
            existing = %existing,
            attempted = %container,
            "fingerprint insert lost to an earlier writer"
        );
        Ok(InsertOutcome::AlreadyPresent(existing))
    }

    /// Credit one newly stored chunk to the unique and stored counters.
    pub fn add_unique(&mut self, payload_len: u64) {
        self.inner.stats.unique_chunks += 1;
        self.inner.stats.unique_bytes += payload_len;
        self.inner.stats.stored_bytes += payload_len;
    }
}

fn read_unpoisoned<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write_unpoisoned<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}
