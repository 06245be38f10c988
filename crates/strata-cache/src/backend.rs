//! Backend stores: the narrow get/set contract caches need.
//!
//! Records are addressed by an entity kind and an opaque key. Calls are
//! synchronous; caches run them on the blocking pool.

use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use ahash::AHashMap;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::{BackendError, BackendResult};

/// A `(key, bytes)` pair handed to [`Backend::set_all`].
pub type RecordBytes = (Vec<u8>, Vec<u8>);

/// Persistent record store consumed by the caches.
pub trait Backend: Send + Sync + 'static {
    /// Prepares storage for `kind`. Called once when a cache starts.
    fn prepare(&self, _kind: &str) -> BackendResult<()> {
        Ok(())
    }

    /// Reads a record, `None` if absent.
    fn get(&self, kind: &str, key: &[u8]) -> BackendResult<Option<Vec<u8>>>;

    /// Writes a record.
    fn set(&self, kind: &str, key: &[u8], bytes: &[u8]) -> BackendResult<()>;

    /// Writes a batch of records.
    fn set_all(&self, kind: &str, records: &[RecordBytes]) -> BackendResult<()> {
        for (key, bytes) in records {
            self.set(kind, key, bytes)?;
        }
        Ok(())
    }
}

/// In-process backend with call counters.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    records: Mutex<AHashMap<(String, Vec<u8>), Vec<u8>>>,
    gets: AtomicUsize,
    sets: AtomicUsize,
    batches: AtomicUsize,
    offline: AtomicBool,
}

impl MemoryBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a record directly, bypassing the counters.
    pub fn insert(&self, kind: &str, key: &[u8], bytes: &[u8]) {
        self.records
            .lock()
            .insert((kind.to_string(), key.to_vec()), bytes.to_vec());
    }

    /// Reads a record directly, bypassing the counters.
    #[must_use]
    pub fn peek(&self, kind: &str, key: &[u8]) -> Option<Vec<u8>> {
        self.records.lock().get(&(kind.to_string(), key.to_vec())).cloned()
    }

    /// Makes every call fail with [`BackendError::Unavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of `get` calls served.
    #[must_use]
    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    /// Number of records written, single or batched.
    #[must_use]
    pub fn sets(&self) -> usize {
        self.sets.load(Ordering::SeqCst)
    }

    /// Number of `set_all` calls.
    #[must_use]
    pub fn batches(&self) -> usize {
        self.batches.load(Ordering::SeqCst)
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    fn check_online(&self) -> BackendResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("memory backend is offline".into()));
        }
        Ok(())
    }
}

impl Backend for MemoryBackend {
    fn prepare(&self, _kind: &str) -> BackendResult<()> {
        self.check_online()
    }

    fn get(&self, kind: &str, key: &[u8]) -> BackendResult<Option<Vec<u8>>> {
        self.check_online()?;
        self.gets.fetch_add(1, Ordering::SeqCst);
        Ok(self.peek(kind, key))
    }

    fn set(&self, kind: &str, key: &[u8], bytes: &[u8]) -> BackendResult<()> {
        self.check_online()?;
        self.sets.fetch_add(1, Ordering::SeqCst);
        self.insert(kind, key, bytes);
        Ok(())
    }

    fn set_all(&self, kind: &str, records: &[RecordBytes]) -> BackendResult<()> {
        self.check_online()?;
        self.batches.fetch_add(1, Ordering::SeqCst);
        self.sets.fetch_add(records.len(), Ordering::SeqCst);
        let mut map = self.records.lock();
        for (key, bytes) in records {
            map.insert((kind.to_string(), key.clone()), bytes.clone());
        }
        Ok(())
    }
}

/// Directory-backed store: one lz4-compressed file per record at
/// `<root>/<kind>/<hex key>.bin`.
#[derive(Debug, Clone)]
pub struct DirBackend {
    root: PathBuf,
}

impl DirBackend {
    /// Opens (creating if needed) a store rooted at `root`.
    pub fn open<P: AsRef<Path>>(root: P) -> BackendResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        info!("Opened record store at {}", root.display());
        Ok(Self { root })
    }

    /// Root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File path of a record.
    #[must_use]
    pub fn record_path(&self, kind: &str, key: &[u8]) -> PathBuf {
        let mut name = String::with_capacity(key.len() * 2 + 4);
        for byte in key {
            let _ = write!(name, "{byte:02x}");
        }
        name.push_str(".bin");
        self.root.join(kind).join(name)
    }
}

/// Largest record the directory store will decompress.
pub const MAX_RECORD_LEN: usize = 256 << 20;

/// lz4 expands a block by at most this factor.
const MAX_LZ4_RATIO: usize = 255;

/// Rejects a stored size prefix that cannot belong to a valid record, before
/// anything is allocated for it.
fn check_size_prefix(compressed: &[u8]) -> Result<(), String> {
    let Some(prefix) = compressed.get(..4) else {
        return Err(format!("record of {} bytes has no size prefix", compressed.len()));
    };
    let mut raw = [0u8; 4];
    raw.copy_from_slice(prefix);
    let claimed = u32::from_le_bytes(raw) as usize;
    let ceiling = (compressed.len() - 4)
        .saturating_mul(MAX_LZ4_RATIO)
        .saturating_add(16)
        .min(MAX_RECORD_LEN);
    if claimed > ceiling {
        return Err(format!("size prefix {claimed} exceeds {ceiling}"));
    }
    Ok(())
}

impl Backend for DirBackend {
    fn prepare(&self, kind: &str) -> BackendResult<()> {
        fs::create_dir_all(self.root.join(kind))?;
        Ok(())
    }

    fn get(&self, kind: &str, key: &[u8]) -> BackendResult<Option<Vec<u8>>> {
        let path = self.record_path(kind, key);
        let compressed = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        check_size_prefix(&compressed)
            .map_err(|e| BackendError::Serialization(format!("{}: {e}", path.display())))?;
        let bytes = lz4_flex::decompress_size_prepended(&compressed)
            .map_err(|e| BackendError::Serialization(format!("{}: {e}", path.display())))?;
        Ok(Some(bytes))
    }

    fn set(&self, kind: &str, key: &[u8], bytes: &[u8]) -> BackendResult<()> {
        let path = self.record_path(kind, key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, lz4_flex::compress_prepend_size(bytes))?;
        debug!("Wrote {} ({} bytes)", path.display(), bytes.len());
        Ok(())
    }
}
