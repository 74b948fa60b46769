//! File hashing and dependency change detection.
//!
//! Computes content hashes for targets and their dependencies, folds them
//! into the combined hash compared on lookup, and, once a combined hash
//! mismatches, works out which dependency changed.

use std::path::{Path, PathBuf};

use rayon::prelude::*;
use vigil_common::ContentHash;

use crate::entry::DependencySet;
use crate::error::CacheError;

/// Hashes of a target and its dependency closure taken at one point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosureSnapshot {
    /// Hash of the target file.
    pub target_hash: ContentHash,
    /// Hashes of the resolved dependencies in discovery order.
    pub dependencies: DependencySet,
    /// `combine([target_hash, (path digest, content hash) per dependency...])`.
    pub combined_hash: ContentHash,
    /// Whether part of the closure could not be resolved.
    pub unresolved: bool,
}

impl ClosureSnapshot {
    /// Builds a snapshot and computes its combined hash.
    pub fn new(target_hash: ContentHash, dependencies: DependencySet, unresolved: bool) -> Self {
        // Paths are folded in too: a dependency replaced by another file with
        // identical bytes is still a different closure.
        let mut digests = Vec::with_capacity(dependencies.len() * 2 + 1);
        digests.push(target_hash);
        for (path, hash) in dependencies.iter() {
            digests.push(ContentHash::from_bytes(path.to_string_lossy().as_bytes()));
            digests.push(hash);
        }
        Self {
            target_hash,
            combined_hash: ContentHash::combine(&digests),
            dependencies,
            unresolved,
        }
    }
}

/// Result of comparing stored dependency hashes against current ones.
///
/// Used only for diagnostics; validity itself is decided by the combined hash.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyDiff {
    /// Dependencies whose content hash changed.
    pub modified: Vec<PathBuf>,

    /// Dependencies recorded at storage time that are no longer part of the
    /// closure (deleted, or no longer imported).
    pub removed: Vec<PathBuf>,

    /// Dependencies that joined the closure since storage.
    pub added: Vec<PathBuf>,
}

impl DependencyDiff {
    /// Returns `true` if no dependency changed.
    pub fn is_empty(&self) -> bool {
        self.modified.is_empty() && self.removed.is_empty() && self.added.is_empty()
    }
}

/// Utility for computing content hashes of files.
pub struct ContentHasher;

impl ContentHasher {
    /// Computes the content hash of a single file.
    ///
    /// A file that vanished or cannot be read yields
    /// [`CacheError::UnreadableInput`].
    pub fn hash_file(path: &Path) -> Result<ContentHash, CacheError> {
        let content = std::fs::read(path).map_err(|e| CacheError::UnreadableInput {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(ContentHash::from_bytes(&content))
    }

    /// Computes content hashes for multiple files in parallel.
    ///
    /// Results are returned in the same order as `paths`.
    pub fn hash_files(paths: &[PathBuf]) -> Vec<Result<ContentHash, CacheError>> {
        paths.par_iter().map(|p| Self::hash_file(p)).collect()
    }

    /// Hashes every dependency, failing on the first unreadable one.
    ///
    /// A dependency that no longer exists makes any entry depending on it
    /// invalid, so there is no partial result.
    pub fn hash_dependencies(paths: &[PathBuf]) -> Result<DependencySet, CacheError> {
        let hashes = Self::hash_files(paths);
        let mut set = DependencySet::new();
        for (path, hash) in paths.iter().zip(hashes) {
            set.insert(path.clone(), hash?);
        }
        Ok(set)
    }

    /// Compares stored dependency hashes against the current closure.
    pub fn diff_dependencies(stored: &DependencySet, current: &DependencySet) -> DependencyDiff {
        let mut diff = DependencyDiff::default();
        for (path, hash) in stored.iter() {
            match current.get(path) {
                Some(h) if h == hash => {}
                Some(_) => diff.modified.push(path.to_path_buf()),
                None => diff.removed.push(path.to_path_buf()),
            }
        }
        for (path, _) in current.iter() {
            if stored.get(path).is_none() {
                diff.added.push(path.to_path_buf());
            }
        }
        diff
    }
}
