//! Cache keys, dependency sets and cache entries.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use vigil_common::ContentHash;

use crate::hasher::ClosureSnapshot;

/// Separator between the target path and the namespace in a [`CacheKey`].
const NAMESPACE_SEPARATOR: char = '#';

/// Identifies one cacheable unit of work: `{target_path}#{namespace}`.
///
/// Namespaces keep callers apart, so a test-result entry and a
/// description entry for the same file never collide.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Builds the key for `target` in `namespace`.
    pub fn new(target: &Path, namespace: &str) -> Self {
        Self(format!(
            "{}{NAMESPACE_SEPARATOR}{namespace}",
            target.display()
        ))
    }

    /// Returns the target path portion of the key.
    pub fn target(&self) -> &Path {
        Path::new(self.split().0)
    }

    /// Returns the namespace portion of the key.
    pub fn namespace(&self) -> &str {
        self.split().1
    }

    /// Returns the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn split(&self) -> (&str, &str) {
        // Namespaces never contain the separator, paths might.
        self.0
            .rsplit_once(NAMESPACE_SEPARATOR)
            .unwrap_or((self.0.as_str(), ""))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheKey({})", self.0)
    }
}

/// Ordered mapping from dependency path to its content hash.
///
/// Order is first-discovery order. It carries no meaning beyond making the
/// combined hash deterministic, so it is preserved exactly through
/// serialization (as a JSON object whose members appear in that order).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencySet(Vec<(PathBuf, ContentHash)>);

impl DependencySet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a dependency. A path already present keeps its original
    /// position and hash.
    pub fn insert(&mut self, path: PathBuf, hash: ContentHash) {
        if self.get(&path).is_none() {
            self.0.push((path, hash));
        }
    }

    /// Returns the recorded hash for `path`.
    pub fn get(&self, path: &Path) -> Option<ContentHash> {
        self.0.iter().find(|(p, _)| p == path).map(|(_, h)| *h)
    }

    /// Iterates over `(path, hash)` pairs in discovery order.
    pub fn iter(&self) -> impl Iterator<Item = (&Path, ContentHash)> {
        self.0.iter().map(|(p, h)| (p.as_path(), *h))
    }

    /// Returns the dependency paths in discovery order.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.0.iter().map(|(p, _)| p.clone()).collect()
    }

    /// Number of dependencies.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the target has no tracked dependencies.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(PathBuf, ContentHash)> for DependencySet {
    fn from_iter<I: IntoIterator<Item = (PathBuf, ContentHash)>>(iter: I) -> Self {
        let mut set = DependencySet::new();
        for (path, hash) in iter {
            set.insert(path, hash);
        }
        set
    }
}

impl Serialize for DependencySet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (path, hash) in &self.0 {
            map.serialize_entry(&path.to_string_lossy(), hash)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for DependencySet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OrderedMap;

        impl<'de> Visitor<'de> for OrderedMap {
            type Value = DependencySet;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("a map of dependency paths to content hashes")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut set = DependencySet::new();
                while let Some((path, hash)) = access.next_entry::<String, ContentHash>()? {
                    set.insert(PathBuf::from(path), hash);
                }
                Ok(set)
            }
        }

        deserializer.deserialize_map(OrderedMap)
    }
}

/// A cached result together with the hashes that vouch for it.
///
/// `payload` holds the caller's result serialized as JSON; the cache never
/// looks inside it. `size_bytes` is the payload length and is what the byte
/// budget accounts for.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Key this entry is stored under.
    pub key: CacheKey,
    /// Hash of the target file's content at storage time.
    pub target_hash: ContentHash,
    /// Hashes of every resolved dependency at storage time.
    pub dependency_hashes: DependencySet,
    /// Fold of the target hash and every dependency path and hash, compared
    /// first on lookup.
    pub combined_hash: ContentHash,
    /// Whether resolution could not vouch for the whole dependency closure.
    /// Such entries are only served within the unresolved TTL.
    pub unresolved: bool,
    /// Serialized caller payload.
    pub payload: Arc<[u8]>,
    /// Serialized payload length in bytes.
    pub size_bytes: u64,
    /// When the entry was stored.
    pub created_at: DateTime<Utc>,
    /// When the entry was last served.
    pub last_accessed_at: DateTime<Utc>,
    /// Number of times the entry has been served.
    pub access_count: u64,
}

impl CacheEntry {
    /// Builds a fresh entry from a closure snapshot and a serialized payload.
    pub fn new(key: CacheKey, snapshot: ClosureSnapshot, payload: Vec<u8>) -> Self {
        let now = Utc::now();
        let size_bytes = payload.len() as u64;
        Self {
            key,
            target_hash: snapshot.target_hash,
            combined_hash: snapshot.combined_hash,
            dependency_hashes: snapshot.dependencies,
            unresolved: snapshot.unresolved,
            payload: payload.into(),
            size_bytes,
            created_at: now,
            last_accessed_at: now,
            access_count: 0,
        }
    }

    /// Time elapsed since the entry was stored, clamped at zero for clocks
    /// that moved backwards.
    pub fn age(&self, now: DateTime<Utc>) -> std::time::Duration {
        (now - self.created_at).to_std().unwrap_or_default()
    }

    /// Records one served hit.
    pub fn touch(&mut self) {
        self.last_accessed_at = Utc::now();
        self.access_count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_format_and_parts() {
        let key = CacheKey::new(Path::new("/repo/src/a.ts"), "test");
        assert_eq!(key.as_str(), "/repo/src/a.ts#test");
        assert_eq!(key.target(), Path::new("/repo/src/a.ts"));
        assert_eq!(key.namespace(), "test");
    }

    #[test]
    fn key_with_hash_in_path() {
        let key = CacheKey::new(Path::new("/repo/c#/x.cs"), "pr-description");
        assert_eq!(key.target(), Path::new("/repo/c#/x.cs"));
        assert_eq!(key.namespace(), "pr-description");
    }

    #[test]
    fn namespaces_are_disjoint() {
        let a = CacheKey::new(Path::new("a.ts"), "test");
        let b = CacheKey::new(Path::new("a.ts"), "pr-description");
        assert_ne!(a, b);
    }

    #[test]
    fn dependency_set_keeps_first_discovery_order() {
        let mut set = DependencySet::new();
        let h = ContentHash::from_bytes(b"x");
        set.insert(PathBuf::from("z.ts"), h);
        set.insert(PathBuf::from("a.ts"), h);
        set.insert(PathBuf::from("z.ts"), ContentHash::from_bytes(b"other"));
        assert_eq!(set.paths(), vec![PathBuf::from("z.ts"), PathBuf::from("a.ts")]);
        assert_eq!(set.get(Path::new("z.ts")), Some(h));
    }

    #[test]
    fn dependency_set_serializes_in_order() {
        let set: DependencySet = [
            (PathBuf::from("z.ts"), ContentHash::from_bytes(b"z")),
            (PathBuf::from("a.ts"), ContentHash::from_bytes(b"a")),
        ]
        .into_iter()
        .collect();
        let json = serde_json::to_string(&set).unwrap();
        assert!(json.find("z.ts").unwrap() < json.find("a.ts").unwrap());

        let back: DependencySet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, set);
    }

    #[test]
    fn touch_updates_access_metadata() {
        let snapshot = ClosureSnapshot::new(
            ContentHash::from_bytes(b"target"),
            DependencySet::new(),
            false,
        );
        let mut entry = CacheEntry::new(
            CacheKey::new(Path::new("a.ts"), "test"),
            snapshot,
            b"{}".to_vec(),
        );
        assert_eq!(entry.size_bytes, 2);
        assert_eq!(entry.access_count, 0);
        entry.touch();
        assert_eq!(entry.access_count, 1);
        assert!(entry.last_accessed_at >= entry.created_at);
    }
}
