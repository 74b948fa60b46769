//! Memoized dependency resolutions.
//!
//! Scanning imports is the second most expensive step after the work being
//! cached, and import graphs change rarely. A memoized [`Resolution`] is
//! reused for a target while the target's own hash is unchanged and every
//! dependency in the closure still hashes to the value recorded with it. A
//! dependency that gains a new import changes its own hash, so the closure is
//! rescanned rather than silently missing the new file. Likewise a file
//! created where an import previously found nothing (a local module now
//! shadowing a package, `b.ts` appearing beside `b.tsx`) forces a rescan.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use vigil_common::ContentHash;

use crate::entry::DependencySet;
use crate::resolver::Resolution;

/// One memoized resolution.
#[derive(Debug, Clone)]
pub struct GraphEntry {
    /// Hash of the target when it was resolved.
    pub target_hash: ContentHash,
    /// The resolved closure.
    pub resolution: Resolution,
    /// Hashes of the closure members at resolution time.
    pub dependency_hashes: DependencySet,
}

impl GraphEntry {
    /// Returns `true` if `current` matches the hashes recorded at resolution
    /// time and every candidate that was absent then is still absent.
    pub fn is_current(&self, current: &DependencySet) -> bool {
        &self.dependency_hashes == current && !self.resolution.is_shadowed()
    }
}

/// In-memory map from target path to its memoized resolution.
#[derive(Debug, Default)]
pub struct DependencyGraphCache {
    entries: HashMap<PathBuf, GraphEntry>,
}

impl DependencyGraphCache {
    /// Creates an empty memo.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the memoized resolution for `target` if it was computed for
    /// the same target content.
    pub fn get(&self, target: &Path, target_hash: ContentHash) -> Option<&GraphEntry> {
        self.entries
            .get(target)
            .filter(|entry| entry.target_hash == target_hash)
    }

    /// Records a resolution, replacing any earlier one for the same target.
    /// Resolutions that are not memoizable are ignored.
    pub fn insert(&mut self, target: PathBuf, entry: GraphEntry) {
        if entry.resolution.is_memoizable() {
            self.entries.insert(target, entry);
        } else {
            self.entries.remove(&target);
        }
    }

    /// Drops the memoized resolution for `target`.
    pub fn forget(&mut self, target: &Path) -> bool {
        self.entries.remove(target).is_some()
    }

    /// Drops every memoized resolution.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of memoized targets.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is memoized.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
