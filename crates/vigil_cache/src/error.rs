//! Error types for cache operations.

use std::path::PathBuf;

use vigil_common::ContentHash;

/// Errors that can occur during cache operations.
///
/// None of these is fatal to a caller of [`CacheManager`](crate::CacheManager):
/// the manager converts every variant into a cache miss, a skipped store, or
/// a skipped save. The enum exists so the individual components can report
/// precisely what went wrong.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// A file to be hashed vanished or could not be read.
    #[error("unreadable input {path}: {source}")]
    UnreadableInput {
        /// The file that could not be read.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Reading or listing a file inside the cache directory failed.
    #[error("cannot access {path} in cache directory: {source}")]
    Io {
        /// The index or blob path.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The persisted index could not be parsed.
    #[error("corrupt persisted cache at {path}: {reason}")]
    CorruptPersistedCache {
        /// The index file path.
        path: PathBuf,
        /// Description of the parse failure.
        reason: String,
    },

    /// The persisted index was written with a different schema version.
    #[error("schema version mismatch in {path}: expected {expected}, got {actual}")]
    SchemaMismatch {
        /// The index file path.
        path: PathBuf,
        /// The schema version this build reads and writes.
        expected: u32,
        /// The schema version found in the file.
        actual: u32,
    },

    /// Writing the index or a blob to disk failed.
    #[error("failed to write {path}: {source}")]
    DiskWriteFailure {
        /// The destination path.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The index or a blob header could not be encoded.
    #[error("cannot encode cache data: {reason}")]
    Serialization {
        /// What the encoder reported.
        reason: String,
    },

    /// A blob file does not start with a readable vigil blob header.
    #[error("blob {path} is not a vigil payload: {reason}")]
    InvalidHeader {
        /// The blob file path.
        path: PathBuf,
        /// Which part of the header is wrong.
        reason: String,
    },

    /// A blob's payload does not hash to the name it is stored under.
    #[error("blob {path} is damaged: content hashes to {actual}, expected {expected}")]
    ChecksumMismatch {
        /// The blob file path.
        path: PathBuf,
        /// Hash the blob is stored under.
        expected: ContentHash,
        /// Hash of the payload bytes actually read.
        actual: ContentHash,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreadable_input_display() {
        let err = CacheError::UnreadableInput {
            path: PathBuf::from("src/a.ts"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"),
        };
        let msg = err.to_string();
        assert!(msg.contains("unreadable input"));
        assert!(msg.contains("a.ts"));
    }

    #[test]
    fn corrupt_cache_display() {
        let err = CacheError::CorruptPersistedCache {
            path: PathBuf::from(".vigil-cache/index.json"),
            reason: "unexpected EOF".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("corrupt persisted cache"));
        assert!(msg.contains("unexpected EOF"));
    }

    #[test]
    fn schema_mismatch_display() {
        let err = CacheError::SchemaMismatch {
            path: PathBuf::from("index.json"),
            expected: 2,
            actual: 1,
        };
        let msg = err.to_string();
        assert!(msg.contains("expected 2"));
        assert!(msg.contains("got 1"));
    }

    #[test]
    fn disk_write_failure_display() {
        let err = CacheError::DiskWriteFailure {
            path: PathBuf::from("/ro/index.json"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
        };
        assert!(err.to_string().starts_with("failed to write /ro/index.json"));
    }

    #[test]
    fn checksum_mismatch_shows_both_hashes() {
        let expected = ContentHash::from_bytes(b"stored");
        let actual = ContentHash::from_bytes(b"on disk");
        let err = CacheError::ChecksumMismatch {
            path: PathBuf::from("blobs/x.blob"),
            expected,
            actual,
        };
        let msg = err.to_string();
        assert!(msg.contains(&expected.to_string()));
        assert!(msg.contains(&actual.to_string()));
        assert!(msg.contains("damaged"));
    }
}
