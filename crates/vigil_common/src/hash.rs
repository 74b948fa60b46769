//! Content hashing for cache invalidation.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A 64-bit content digest computed using XXH3.
///
/// Two files with the same `ContentHash` are assumed to have identical content.
/// This is a correctness-within-one-machine digest, not a security boundary.
/// Serialized as a 16-character lowercase hex string so persisted indexes stay
/// readable.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash(u64);

impl ContentHash {
    /// Computes a content hash from a byte slice using XXH3-64.
    pub fn from_bytes(data: &[u8]) -> Self {
        Self(xxhash_rust::xxh3::xxh3_64(data))
    }

    /// Folds an ordered list of digests into a single digest.
    ///
    /// The fold is order-sensitive: `combine(&[a, b]) != combine(&[b, a])` in
    /// general. An empty list combines to the hash of no bytes.
    pub fn combine(digests: &[ContentHash]) -> Self {
        let mut buf = Vec::with_capacity(digests.len() * 8);
        for digest in digests {
            buf.extend_from_slice(&digest.0.to_le_bytes());
        }
        Self::from_bytes(&buf)
    }

    /// Returns the raw 64-bit value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({:08x}..)", self.0 >> 32)
    }
}

/// Error type for parsing hex digest strings.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid content hash: '{input}'")]
pub struct ParseHashError {
    /// The input string that failed to parse.
    pub input: String,
}

impl FromStr for ContentHash {
    type Err = ParseHashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 16 {
            return Err(ParseHashError {
                input: s.to_string(),
            });
        }
        u64::from_str_radix(s, 16)
            .map(ContentHash)
            .map_err(|_| ParseHashError {
                input: s.to_string(),
            })
    }
}

impl Serialize for ContentHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}
