//! Content-addressed result caching with dependency-aware invalidation.
//!
//! A [`CacheManager`] answers one question for its callers: is the result
//! computed earlier for a target file still valid? Validity is decided purely
//! by content hashes of the target and of every project file it imports
//! (resolved by [`DependencyResolver`]), never by timestamps. Entries live in
//! a byte-budgeted LRU [`CacheStore`] that is persisted atomically to disk by
//! [`PersistenceManager`] on a debounced schedule.

#![warn(missing_docs)]

pub mod artifact;
pub mod entry;
pub mod error;
pub mod graph;
pub mod hasher;
pub mod manager;
pub mod metrics;
pub mod outcome;
pub mod persist;
pub mod resolver;
pub mod saver;
pub mod store;

pub use artifact::BlobStore;
pub use entry::{CacheEntry, CacheKey, DependencySet};
pub use error::CacheError;
pub use hasher::{ClosureSnapshot, ContentHasher, DependencyDiff};
pub use manager::CacheManager;
pub use metrics::{EffectivenessReport, MissBreakdown};
pub use outcome::{Hit, Lookup, MissReason, StoreOutcome};
pub use persist::{PersistenceManager, SCHEMA_VERSION};
pub use resolver::{DependencyResolver, Resolution, Unresolved, UnresolvedKind};
pub use saver::{DebouncedSaver, SaveAttempt};
pub use store::{CacheStore, PutOutcome};
