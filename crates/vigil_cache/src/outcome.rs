//! Results reported to cache callers.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

/// Why a lookup did not produce a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MissReason {
    /// No entry exists for the key.
    NeverCached,
    /// The target or a dependency changed, vanished, or the payload could not
    /// be decoded. The entry was removed.
    Stale,
    /// The entry was evicted to stay within the byte budget.
    Evicted,
    /// The namespace TTL or the unresolved-dependency TTL elapsed. The entry
    /// was removed.
    Expired,
}

impl fmt::Display for MissReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MissReason::NeverCached => "never cached",
            MissReason::Stale => "stale",
            MissReason::Evicted => "evicted",
            MissReason::Expired => "expired",
        })
    }
}

/// A served cache hit.
#[derive(Debug, Clone, PartialEq)]
pub struct Hit<T> {
    /// The caller's payload as stored.
    pub payload: T,
    /// Time since the entry was stored.
    pub age: Duration,
}

/// Outcome of [`CacheManager::lookup`](crate::CacheManager::lookup).
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    /// A valid entry was found.
    Hit(Hit<T>),
    /// The caller must compute a fresh result.
    Miss(MissReason),
}

impl<T> Lookup<T> {
    /// Returns `true` for a hit.
    pub fn is_hit(&self) -> bool {
        matches!(self, Lookup::Hit(_))
    }

    /// Returns the payload of a hit.
    pub fn into_payload(self) -> Option<T> {
        match self {
            Lookup::Hit(hit) => Some(hit.payload),
            Lookup::Miss(_) => None,
        }
    }

    /// Returns the miss reason, if this is a miss.
    pub fn miss_reason(&self) -> Option<MissReason> {
        match self {
            Lookup::Hit(_) => None,
            Lookup::Miss(reason) => Some(*reason),
        }
    }
}

/// Outcome of [`CacheManager::store`](crate::CacheManager::store).
///
/// Storing never fails from the caller's point of view: the caller already
/// holds the fresh result and uses it either way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOutcome {
    /// The entry is cached.
    Stored {
        /// Number of other entries evicted to make room.
        evicted: usize,
    },
    /// The payload alone exceeds the byte budget and was not kept.
    TooLarge {
        /// Serialized payload size.
        size_bytes: u64,
        /// The configured budget.
        max_bytes: u64,
    },
    /// Nothing was cached.
    Skipped {
        /// Human-readable cause (unreadable target, unserializable payload).
        reason: String,
    },
}

impl StoreOutcome {
    /// Returns `true` if the entry is now cached.
    pub fn is_stored(&self) -> bool {
        matches!(self, StoreOutcome::Stored { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_accessors() {
        let hit: Lookup<u32> = Lookup::Hit(Hit {
            payload: 7,
            age: Duration::from_millis(5),
        });
        assert!(hit.is_hit());
        assert_eq!(hit.miss_reason(), None);
        assert_eq!(hit.into_payload(), Some(7));

        let miss: Lookup<u32> = Lookup::Miss(MissReason::Stale);
        assert!(!miss.is_hit());
        assert_eq!(miss.miss_reason(), Some(MissReason::Stale));
        assert_eq!(miss.into_payload(), None);
    }

    #[test]
    fn miss_reason_display_and_serde() {
        assert_eq!(MissReason::NeverCached.to_string(), "never cached");
        assert_eq!(
            serde_json::to_string(&MissReason::NeverCached).unwrap(),
            "\"never_cached\""
        );
    }

    #[test]
    fn store_outcome_is_stored() {
        assert!(StoreOutcome::Stored { evicted: 0 }.is_stored());
        assert!(!StoreOutcome::TooLarge {
            size_bytes: 10,
            max_bytes: 5
        }
        .is_stored());
    }
}
