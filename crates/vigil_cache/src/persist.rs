//! On-disk persistence of the entry store.
//!
//! The store is saved as `<cache_dir>/index.json`. Small payloads are
//! embedded verbatim in the index; payloads above the inline limit are
//! written as blobs (see [`BlobStore`]) and referenced by hash. Every write
//! goes to a temporary file in the cache directory that is synced and then
//! renamed over the destination, so a crash leaves either the old or the new
//! index, never a torn one.
//!
//! Loading is fail-safe: a missing, unparseable or incompatible index yields
//! an empty store, and an entry whose blob is gone or damaged is dropped.

use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use tracing::{debug, warn};
use vigil_common::ContentHash;

use crate::artifact::BlobStore;
use crate::entry::{CacheEntry, CacheKey, DependencySet};
use crate::error::CacheError;
use crate::store::CacheStore;

/// Version of the index format. An index with any other version is ignored.
pub const SCHEMA_VERSION: u32 = 1;

/// Name of the index file within the cache directory.
const INDEX_FILE: &str = "index.json";

/// Serialized form of the whole store.
#[derive(Debug, Serialize, Deserialize)]
pub struct PersistedIndex {
    /// Format version, checked before anything else is read.
    pub schema_version: u32,
    /// When the index was written.
    pub saved_at: DateTime<Utc>,
    /// Entries from least to most recently used.
    pub entries: Vec<PersistedEntry>,
}

/// Serialized form of one [`CacheEntry`].
#[derive(Debug, Serialize, Deserialize)]
pub struct PersistedEntry {
    /// Cache key.
    pub key: CacheKey,
    /// Target hash at storage time.
    pub target_hash: ContentHash,
    /// Dependency hashes at storage time, in discovery order.
    pub dependency_hashes: DependencySet,
    /// Combined hash.
    pub combined_hash: ContentHash,
    /// Whether the closure was incomplete.
    pub unresolved: bool,
    /// Where the payload lives.
    pub payload_ref: PayloadRef,
    /// Payload length in bytes.
    pub size_bytes: u64,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last hit time.
    pub last_accessed_at: DateTime<Utc>,
    /// Number of hits served.
    pub access_count: u64,
}

/// Location of a persisted payload.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadRef {
    /// The payload JSON embedded as-is.
    Inline(Box<RawValue>),
    /// The payload is in the blob with this hash.
    Blob(ContentHash),
}

/// Only the version field, parsed first so an incompatible index is rejected
/// without decoding its entries.
#[derive(Deserialize)]
struct SchemaHeader {
    schema_version: u32,
}

/// Saves and loads the entry store for one cache directory.
#[derive(Debug, Clone)]
pub struct PersistenceManager {
    cache_dir: PathBuf,
    inline_limit: u64,
    blobs: BlobStore,
}

impl PersistenceManager {
    /// Creates a manager for `cache_dir`. Payloads larger than
    /// `inline_limit` bytes are stored as blobs.
    pub fn new(cache_dir: &Path, inline_limit: u64) -> Self {
        Self {
            cache_dir: cache_dir.to_path_buf(),
            inline_limit,
            blobs: BlobStore::new(cache_dir),
        }
    }

    /// The cache directory.
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Path of the index file.
    pub fn index_path(&self) -> PathBuf {
        self.cache_dir.join(INDEX_FILE)
    }

    /// Writes `entries` (least recently used first) as the new index, then
    /// removes blobs the new index no longer references.
    pub fn save(&self, entries: &[CacheEntry]) -> Result<(), CacheError> {
        std::fs::create_dir_all(&self.cache_dir).map_err(|e| CacheError::DiskWriteFailure {
            path: self.cache_dir.clone(),
            source: e,
        })?;

        let mut live = HashSet::new();
        let mut persisted = Vec::with_capacity(entries.len());
        for entry in entries {
            let payload_ref = if entry.size_bytes > self.inline_limit {
                let hash = self.blobs.write(&entry.payload)?;
                live.insert(hash);
                PayloadRef::Blob(hash)
            } else {
                PayloadRef::Inline(inline_payload(entry)?)
            };
            persisted.push(PersistedEntry {
                key: entry.key.clone(),
                target_hash: entry.target_hash,
                dependency_hashes: entry.dependency_hashes.clone(),
                combined_hash: entry.combined_hash,
                unresolved: entry.unresolved,
                payload_ref,
                size_bytes: entry.size_bytes,
                created_at: entry.created_at,
                last_accessed_at: entry.last_accessed_at,
                access_count: entry.access_count,
            });
        }

        let index = PersistedIndex {
            schema_version: SCHEMA_VERSION,
            saved_at: Utc::now(),
            entries: persisted,
        };
        let json = serde_json::to_vec_pretty(&index).map_err(|e| CacheError::Serialization {
            reason: e.to_string(),
        })?;
        self.write_atomic(&self.index_path(), &json)?;
        debug!(entries = entries.len(), path = %self.index_path().display(), "saved cache index");

        if let Err(e) = self.blobs.gc(&live) {
            warn!(error = %e, "failed to remove unreferenced blobs");
        }
        Ok(())
    }

    /// Reads the index. A missing index is `Ok(None)`; a corrupt or
    /// incompatible one is an error. Entries whose payload cannot be
    /// recovered are dropped with a warning.
    pub fn try_load(&self) -> Result<Option<Vec<CacheEntry>>, CacheError> {
        let path = self.index_path();
        let raw = match std::fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::Io { path, source: e }),
        };

        let corrupt = |e: serde_json::Error| CacheError::CorruptPersistedCache {
            path: path.clone(),
            reason: e.to_string(),
        };
        let header: SchemaHeader = serde_json::from_slice(&raw).map_err(corrupt)?;
        if header.schema_version != SCHEMA_VERSION {
            return Err(CacheError::SchemaMismatch {
                path: path.clone(),
                expected: SCHEMA_VERSION,
                actual: header.schema_version,
            });
        }
        let index: PersistedIndex = serde_json::from_slice(&raw).map_err(corrupt)?;

        let mut entries = Vec::with_capacity(index.entries.len());
        for persisted in index.entries {
            let payload = match &persisted.payload_ref {
                PayloadRef::Inline(json) => json.get().as_bytes().to_vec(),
                PayloadRef::Blob(hash) => match self.blobs.read(*hash) {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!(
                            key = %persisted.key,
                            error = %e,
                            "dropping entry with unreadable payload"
                        );
                        continue;
                    }
                },
            };
            entries.push(CacheEntry {
                key: persisted.key,
                target_hash: persisted.target_hash,
                dependency_hashes: persisted.dependency_hashes,
                combined_hash: persisted.combined_hash,
                unresolved: persisted.unresolved,
                size_bytes: payload.len() as u64,
                payload: payload.into(),
                created_at: persisted.created_at,
                last_accessed_at: persisted.last_accessed_at,
                access_count: persisted.access_count,
            });
        }
        Ok(Some(entries))
    }

    /// Loads the persisted store into a fresh [`CacheStore`] with the given
    /// budget. Never fails: any problem is logged and yields an empty store.
    pub fn load(&self, max_bytes: u64) -> CacheStore {
        let entries = match self.try_load() {
            Ok(entries) => entries.unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "ignoring persisted cache");
                Vec::new()
            }
        };
        build_store(entries, max_bytes)
    }

    /// Like [`load`](Self::load), but gives up after `timeout` and starts
    /// with an empty store. The abandoned read finishes in the background
    /// and its result is discarded.
    pub fn load_with_timeout(&self, max_bytes: u64, timeout: Duration) -> CacheStore {
        let (tx, rx) = mpsc::channel();
        let this = self.clone();
        let spawned = std::thread::Builder::new()
            .name("vigil-cache-load".to_string())
            .spawn(move || {
                let _ = tx.send(this.try_load());
            });
        if let Err(e) = spawned {
            warn!(error = %e, "could not spawn loader thread, loading inline");
            return self.load(max_bytes);
        }

        let entries = match rx.recv_timeout(timeout) {
            Ok(Ok(entries)) => entries.unwrap_or_default(),
            Ok(Err(e)) => {
                warn!(error = %e, "ignoring persisted cache");
                Vec::new()
            }
            Err(_) => {
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "loading persisted cache timed out, starting empty"
                );
                Vec::new()
            }
        };
        build_store(entries, max_bytes)
    }

    fn write_atomic(&self, path: &Path, data: &[u8]) -> Result<(), CacheError> {
        let write_err = |source| CacheError::DiskWriteFailure {
            path: path.to_path_buf(),
            source,
        };
        let mut tmp = tempfile::NamedTempFile::new_in(&self.cache_dir).map_err(write_err)?;
        tmp.write_all(data).map_err(write_err)?;
        tmp.as_file().sync_all().map_err(write_err)?;
        tmp.persist(path).map_err(|e| write_err(e.error))?;
        Ok(())
    }
}

fn inline_payload(entry: &CacheEntry) -> Result<Box<RawValue>, CacheError> {
    let text = std::str::from_utf8(&entry.payload).map_err(|e| CacheError::Serialization {
        reason: format!("payload of {} is not UTF-8: {e}", entry.key),
    })?;
    RawValue::from_string(text.to_string()).map_err(|e| CacheError::Serialization {
        reason: format!("payload of {} is not JSON: {e}", entry.key),
    })
}

fn build_store(entries: Vec<CacheEntry>, max_bytes: u64) -> CacheStore {
    let mut store = CacheStore::new(max_bytes);
    for entry in entries {
        store.put(entry);
    }
    if !store.is_empty() {
        debug!(entries = store.len(), bytes = store.total_bytes(), "loaded persisted cache");
    }
    store
}
