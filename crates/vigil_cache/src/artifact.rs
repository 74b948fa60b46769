//! Content-addressed payload blobs.
//!
//! Payloads too large to inline in `index.json` live in
//! `<cache_dir>/blobs/<hash>.blob`. Each blob starts with a length-prefixed
//! bincode header carrying magic bytes, a format version and a checksum of
//! the payload, so a truncated or foreign file reads as absent rather than as
//! a wrong payload.

use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;
use vigil_common::ContentHash;

use crate::error::CacheError;

/// Magic bytes identifying a vigil payload blob.
const BLOB_MAGIC: [u8; 4] = *b"VGIL";

/// Blob format version. Increment on breaking changes to the header.
const BLOB_FORMAT_VERSION: u32 = 1;

/// Subdirectory of the cache directory holding blobs.
const BLOB_DIR: &str = "blobs";

/// File extension of blob files.
const BLOB_EXT: &str = "blob";

/// Header prepended to every blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobHeader {
    /// Must be `b"VGIL"`.
    pub magic: [u8; 4],
    /// Blob format version.
    pub format_version: u32,
    /// Hash of the payload bytes that follow the header.
    pub checksum: ContentHash,
}

/// Reads and writes payload blobs under one cache directory.
#[derive(Debug, Clone)]
pub struct BlobStore {
    dir: PathBuf,
}

impl BlobStore {
    /// Creates a blob store for `cache_dir`. Nothing is touched on disk
    /// until the first write.
    pub fn new(cache_dir: &Path) -> Self {
        Self {
            dir: cache_dir.join(BLOB_DIR),
        }
    }

    /// Path of the blob holding the payload with this hash.
    pub fn blob_path(&self, hash: ContentHash) -> PathBuf {
        self.dir.join(format!("{hash}.{BLOB_EXT}"))
    }

    /// Writes `payload` and returns its content hash.
    ///
    /// Blobs are content-addressed, so an existing blob with the same hash is
    /// left alone. New blobs are written to a temporary file and renamed into
    /// place.
    pub fn write(&self, payload: &[u8]) -> Result<ContentHash, CacheError> {
        let hash = ContentHash::from_bytes(payload);
        let path = self.blob_path(hash);
        if path.exists() {
            return Ok(hash);
        }

        std::fs::create_dir_all(&self.dir).map_err(|e| CacheError::DiskWriteFailure {
            path: self.dir.clone(),
            source: e,
        })?;

        let header = BlobHeader {
            magic: BLOB_MAGIC,
            format_version: BLOB_FORMAT_VERSION,
            checksum: hash,
        };
        let header_bytes = bincode::serde::encode_to_vec(&header, bincode::config::standard())
            .map_err(|e| CacheError::Serialization {
                reason: e.to_string(),
            })?;

        // 4-byte header length (little-endian) + header + payload
        let header_len = header_bytes.len() as u32;
        let write_err = |source| CacheError::DiskWriteFailure {
            path: path.clone(),
            source,
        };
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir).map_err(write_err)?;
        tmp.write_all(&header_len.to_le_bytes()).map_err(write_err)?;
        tmp.write_all(&header_bytes).map_err(write_err)?;
        tmp.write_all(payload).map_err(write_err)?;
        tmp.as_file().sync_all().map_err(write_err)?;
        tmp.persist(&path).map_err(|e| write_err(e.error))?;

        Ok(hash)
    }

    /// Reads and validates the blob for `hash`.
    pub fn read(&self, hash: ContentHash) -> Result<Vec<u8>, CacheError> {
        let path = self.blob_path(hash);
        let raw = std::fs::read(&path).map_err(|e| CacheError::Io {
            path: path.clone(),
            source: e,
        })?;
        let invalid = |reason: &str| CacheError::InvalidHeader {
            path: path.clone(),
            reason: reason.to_string(),
        };

        if raw.len() < 4 {
            return Err(invalid("file shorter than header length prefix"));
        }
        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&raw[..4]);
        let header_len = u32::from_le_bytes(len_bytes) as usize;
        if raw.len() < 4 + header_len {
            return Err(invalid("truncated header"));
        }

        let (header, _): (BlobHeader, usize) =
            bincode::serde::decode_from_slice(&raw[4..4 + header_len], bincode::config::standard())
                .map_err(|e| invalid(&e.to_string()))?;
        if header.magic != BLOB_MAGIC {
            return Err(invalid("bad magic"));
        }
        if header.format_version != BLOB_FORMAT_VERSION {
            return Err(invalid(&format!(
                "format version {} (expected {BLOB_FORMAT_VERSION})",
                header.format_version
            )));
        }

        let payload = &raw[4 + header_len..];
        let actual = ContentHash::from_bytes(payload);
        if actual != header.checksum || actual != hash {
            return Err(CacheError::ChecksumMismatch {
                path,
                expected: hash,
                actual,
            });
        }
        Ok(payload.to_vec())
    }

    /// Deletes every blob whose hash is not in `live`. Returns the number of
    /// files removed.
    pub fn gc(&self, live: &HashSet<ContentHash>) -> Result<usize, CacheError> {
        if !self.dir.exists() {
            return Ok(0);
        }
        let io_err = |path: &Path, source| CacheError::Io {
            path: path.to_path_buf(),
            source,
        };

        let mut removed = 0;
        for entry in std::fs::read_dir(&self.dir).map_err(|e| io_err(&self.dir, e))? {
            let path = entry.map_err(|e| io_err(&self.dir, e))?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(BLOB_EXT) {
                continue;
            }
            let hash = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<ContentHash>().ok());
            let keep = hash.is_some_and(|h| live.contains(&h));
            if !keep {
                std::fs::remove_file(&path).map_err(|e| io_err(&path, e))?;
                removed += 1;
            }
        }
        if removed > 0 {
            debug!(removed, "removed unreferenced payload blobs");
        }
        Ok(removed)
    }
}
