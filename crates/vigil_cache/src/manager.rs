//! The cache facade used by callers.
//!
//! [`CacheManager`] ties the pieces together: it resolves and hashes a
//! target's dependency closure, validates or stores entries in the LRU store,
//! keeps effectiveness counters and drives persistence. Every failure inside
//! degrades to a miss, a skipped store or a skipped save; nothing here panics
//! or hands an I/O error to a caller that only wanted a cached result.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, trace, warn};
use vigil_config::VigilConfig;

use crate::entry::{CacheEntry, CacheKey};
use crate::error::CacheError;
use crate::graph::{DependencyGraphCache, GraphEntry};
use crate::hasher::{ClosureSnapshot, ContentHasher};
use crate::metrics::{EffectivenessReport, Metrics, StoreSummary};
use crate::outcome::{Hit, Lookup, MissReason, StoreOutcome};
use crate::persist::PersistenceManager;
use crate::resolver::DependencyResolver;
use crate::saver::{DebouncedSaver, SaveAttempt};
use crate::store::CacheStore;

/// Consecutive failed index writes after which persistence is switched off.
const MAX_CONSECUTIVE_WRITE_FAILURES: u32 = 3;

/// State guarded by the single store lock.
struct Inner {
    store: CacheStore,
    graph: DependencyGraphCache,
    /// Every namespace that has been stored, for advisory invalidation.
    namespaces: BTreeSet<String>,
}

struct Shared {
    inner: Mutex<Inner>,
    config: VigilConfig,
    resolver: DependencyResolver,
    persistence: Option<PersistenceManager>,
    metrics: Metrics,
    dirty: AtomicBool,
    write_failures: AtomicU32,
    persistence_disabled: AtomicBool,
    /// Serializes index writes between the saver thread and `flush`.
    save_lock: Mutex<()>,
}

impl Shared {
    /// Hashes `target` and its dependency closure, reusing a memoized
    /// resolution when nothing it was computed from has changed.
    fn snapshot(&self, target: &Path) -> Result<ClosureSnapshot, CacheError> {
        let target_hash = ContentHasher::hash_file(target)?;

        let memo = self.inner.lock().graph.get(target, target_hash).cloned();
        if let Some(memo) = memo {
            match ContentHasher::hash_dependencies(&memo.resolution.dependencies) {
                Ok(current) if memo.is_current(&current) => {
                    trace!(target = %target.display(), "reusing memoized resolution");
                    return Ok(ClosureSnapshot::new(
                        target_hash,
                        current,
                        !memo.resolution.is_complete(),
                    ));
                }
                _ => trace!(target = %target.display(), "memoized resolution outdated"),
            }
        }

        let resolution = self.resolver.resolve(target);
        for unresolved in &resolution.unresolved {
            debug!(
                target = %target.display(),
                file = %unresolved.file.display(),
                kind = %unresolved.kind,
                "dependency closure incomplete"
            );
        }
        let dependencies = ContentHasher::hash_dependencies(&resolution.dependencies)?;
        let unresolved = !resolution.is_complete();

        self.inner.lock().graph.insert(
            target.to_path_buf(),
            GraphEntry {
                target_hash,
                resolution,
                dependency_hashes: dependencies.clone(),
            },
        );
        Ok(ClosureSnapshot::new(target_hash, dependencies, unresolved))
    }

    /// Writes the store if anything changed since the last write.
    fn persist(&self) -> Result<(), CacheError> {
        let Some(persistence) = &self.persistence else {
            return Ok(());
        };
        if self.persistence_disabled.load(Ordering::Acquire) {
            return Ok(());
        }

        let _guard = self.save_lock.lock();
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let entries = self.inner.lock().store.snapshot();

        match persistence.save(&entries) {
            Ok(()) => {
                self.write_failures.store(0, Ordering::Release);
                Ok(())
            }
            Err(e) => {
                self.dirty.store(true, Ordering::Release);
                let failures = self.write_failures.fetch_add(1, Ordering::AcqRel) + 1;
                if failures >= MAX_CONSECUTIVE_WRITE_FAILURES {
                    self.persistence_disabled.store(true, Ordering::Release);
                    warn!(
                        error = %e,
                        failures,
                        "disabling cache persistence, continuing in memory only"
                    );
                } else {
                    warn!(error = %e, failures, "failed to save cache index");
                }
                Err(e)
            }
        }
    }
}

/// Content-hash validated result cache.
///
/// One manager serves a whole project. It is `Send + Sync`; share it with
/// `Arc` rather than opening a second manager on the same cache directory.
pub struct CacheManager {
    shared: Arc<Shared>,
    saver: Option<DebouncedSaver>,
    disposed: bool,
}

impl CacheManager {
    /// Opens the cache for the project at `root`.
    ///
    /// Persisted state is loaded from the configured cache directory (relative
    /// paths are taken relative to `root`), giving up after the configured
    /// load timeout. Opening never fails: an unusable cache directory means
    /// starting empty and, if writes keep failing, running in memory only.
    pub fn open(config: VigilConfig, root: impl Into<PathBuf>) -> Self {
        let root = absolute_root(root.into());
        let cache_dir = if config.cache.dir.is_absolute() {
            config.cache.dir.clone()
        } else {
            root.join(&config.cache.dir)
        };
        let persistence =
            PersistenceManager::new(&cache_dir, config.cache.inline_payload_limit.bytes());
        let store = persistence.load_with_timeout(
            config.cache.max_bytes.bytes(),
            config.cache.load_timeout(),
        );
        debug!(
            dir = %cache_dir.display(),
            entries = store.len(),
            "opened cache"
        );

        let debounce = config.cache.save_debounce();
        let shared = Arc::new(Self::build_shared(config, root, store, Some(persistence)));
        let saver = match DebouncedSaver::spawn(debounce, saver_callback(Arc::downgrade(&shared)))
        {
            Ok(saver) => Some(saver),
            Err(e) => {
                warn!(error = %e, "could not start background saver, saving on flush only");
                None
            }
        };
        Self {
            shared,
            saver,
            disposed: false,
        }
    }

    /// Creates a cache that never touches the disk.
    pub fn in_memory(config: VigilConfig, root: impl Into<PathBuf>) -> Self {
        let root = absolute_root(root.into());
        let store = CacheStore::new(config.cache.max_bytes.bytes());
        Self {
            shared: Arc::new(Self::build_shared(config, root, store, None)),
            saver: None,
            disposed: false,
        }
    }

    fn build_shared(
        config: VigilConfig,
        root: PathBuf,
        store: CacheStore,
        persistence: Option<PersistenceManager>,
    ) -> Shared {
        let namespaces = store
            .iter()
            .map(|entry| entry.key.namespace().to_string())
            .collect();
        Shared {
            inner: Mutex::new(Inner {
                store,
                graph: DependencyGraphCache::new(),
                namespaces,
            }),
            resolver: DependencyResolver::from_config(root, &config),
            config,
            persistence,
            metrics: Metrics::default(),
            dirty: AtomicBool::new(false),
            write_failures: AtomicU32::new(0),
            persistence_disabled: AtomicBool::new(false),
            save_lock: Mutex::new(()),
        }
    }

    /// The configuration the cache was opened with.
    pub fn config(&self) -> &VigilConfig {
        &self.shared.config
    }

    /// The resolver used to discover dependency closures.
    pub fn resolver(&self) -> &DependencyResolver {
        &self.shared.resolver
    }

    /// The cache directory, or `None` for an in-memory cache.
    pub fn cache_dir(&self) -> Option<&Path> {
        self.shared.persistence.as_ref().map(|p| p.cache_dir())
    }

    /// Returns `true` once repeated write failures have switched persistence
    /// off for the rest of the process.
    pub fn is_persistence_disabled(&self) -> bool {
        self.shared.persistence_disabled.load(Ordering::Acquire)
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.shared.inner.lock().store.len()
    }

    /// Returns `true` if no entries are cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hashes `target` and its current dependency closure.
    pub fn snapshot(&self, target: &Path) -> Result<ClosureSnapshot, CacheError> {
        let target = self.shared.resolver.normalize(target);
        self.shared.snapshot(&target)
    }

    /// Returns the cached result for `target` in `namespace` if it is still
    /// valid.
    ///
    /// An entry is valid when the target and every dependency hash exactly as
    /// they did at storage time, no namespace TTL has elapsed, and (for
    /// entries whose closure was incomplete) the unresolved TTL has not
    /// elapsed. Invalid entries are removed on the spot.
    pub fn lookup<T: DeserializeOwned>(&self, target: &Path, namespace: &str) -> Lookup<T> {
        let target = self.shared.resolver.normalize(target);
        let key = CacheKey::new(&target, namespace);
        let lookup = self.lookup_key(&key, &target);
        match &lookup {
            Lookup::Hit(hit) => {
                debug!(key = %key, age_ms = hit.age.as_millis() as u64, "cache hit")
            }
            Lookup::Miss(reason) => {
                self.shared.metrics.record_miss(*reason);
                debug!(key = %key, reason = %reason, "cache miss");
            }
        }
        lookup
    }

    fn lookup_key<T: DeserializeOwned>(&self, key: &CacheKey, target: &Path) -> Lookup<T> {
        let stored = {
            let inner = self.shared.inner.lock();
            match inner.store.peek(key) {
                Some(entry) => (
                    entry.combined_hash,
                    entry.dependency_hashes.clone(),
                    entry.unresolved,
                    entry.created_at,
                ),
                None if inner.store.was_evicted(key) => {
                    return Lookup::Miss(MissReason::Evicted)
                }
                None => return Lookup::Miss(MissReason::NeverCached),
            }
        };
        let (combined_hash, dependency_hashes, unresolved, created_at) = stored;
        let age = (Utc::now() - created_at).to_std().unwrap_or_default();

        if let Some(ttl) = self.shared.config.namespace(key.namespace()).ttl() {
            if age > ttl {
                self.remove(key);
                return Lookup::Miss(MissReason::Expired);
            }
        }

        let snapshot = match self.shared.snapshot(target) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                debug!(key = %key, error = %e, "cannot hash target closure");
                self.remove(key);
                return Lookup::Miss(MissReason::Stale);
            }
        };
        if snapshot.combined_hash != combined_hash {
            let diff =
                ContentHasher::diff_dependencies(&dependency_hashes, &snapshot.dependencies);
            debug!(
                key = %key,
                modified = ?diff.modified,
                removed = ?diff.removed,
                added = ?diff.added,
                "content changed since entry was stored"
            );
            self.remove(key);
            return Lookup::Miss(MissReason::Stale);
        }

        let unresolved = unresolved || snapshot.unresolved;
        if unresolved && age > self.shared.config.cache.unresolved_ttl() {
            self.remove(key);
            return Lookup::Miss(MissReason::Expired);
        }

        let served = {
            let mut inner = self.shared.inner.lock();
            match inner.store.get(key) {
                Some(entry) if entry.combined_hash == snapshot.combined_hash => {
                    Some((Arc::clone(&entry.payload), entry.size_bytes))
                }
                _ => None,
            }
        };
        // Removed or replaced by another thread while hashing
        let Some((payload, size_bytes)) = served else {
            return Lookup::Miss(MissReason::Stale);
        };

        match serde_json::from_slice::<T>(&payload) {
            Ok(payload) => {
                self.shared.metrics.record_hit(size_bytes);
                // Access metadata rides along with the next save
                self.shared.dirty.store(true, Ordering::Release);
                Lookup::Hit(Hit { payload, age })
            }
            Err(e) => {
                warn!(key = %key, error = %e, "cached payload does not decode, discarding");
                self.remove(key);
                Lookup::Miss(MissReason::Stale)
            }
        }
    }

    /// Caches `payload` as the result for `target` in `namespace`, vouched
    /// for by the target's current dependency closure.
    pub fn store<T: Serialize>(&self, target: &Path, namespace: &str, payload: &T) -> StoreOutcome {
        let target = self.shared.resolver.normalize(target);
        let key = CacheKey::new(&target, namespace);
        let bytes = match serde_json::to_vec(payload) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key = %key, error = %e, "payload does not serialize, not caching");
                return StoreOutcome::Skipped {
                    reason: format!("payload does not serialize: {e}"),
                };
            }
        };
        match self.shared.snapshot(&target) {
            Ok(snapshot) => self.insert_entry(key, snapshot, bytes),
            Err(e) => {
                debug!(key = %key, error = %e, "not caching");
                StoreOutcome::Skipped {
                    reason: e.to_string(),
                }
            }
        }
    }

    fn insert_entry(
        &self,
        key: CacheKey,
        snapshot: ClosureSnapshot,
        bytes: Vec<u8>,
    ) -> StoreOutcome {
        let size_bytes = bytes.len() as u64;
        let max_bytes = self.shared.config.cache.max_bytes.bytes();

        if size_bytes > max_bytes {
            warn!(
                key = %key,
                size_bytes,
                max_bytes,
                "entry too large for cache budget, not caching"
            );
            // The old result for this key is superseded either way
            self.remove(&key);
            self.shared.metrics.record_store(true);
            return StoreOutcome::TooLarge {
                size_bytes,
                max_bytes,
            };
        }

        let unresolved = snapshot.unresolved;
        let entry = CacheEntry::new(key.clone(), snapshot, bytes);
        let put = {
            let mut inner = self.shared.inner.lock();
            inner.namespaces.insert(key.namespace().to_string());
            inner.store.put(entry)
        };
        self.shared.metrics.record_store(false);
        self.shared.metrics.record_evictions(put.evicted.len());
        debug!(
            key = %key,
            size_bytes,
            unresolved,
            evicted = put.evicted.len(),
            "stored cache entry"
        );
        self.mark_dirty();
        StoreOutcome::Stored {
            evicted: put.evicted.len(),
        }
    }

    /// Returns the cached result if valid, otherwise runs `compute`, caches
    /// its result and returns it.
    ///
    /// The closure is hashed before `compute` runs, so a file edited while
    /// the computation is in flight makes the stored entry stale rather than
    /// vouching for output computed from older content.
    pub fn get_or_compute<T, E, F>(
        &self,
        target: &Path,
        namespace: &str,
        compute: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T, E>,
    {
        if let Lookup::Hit(hit) = self.lookup(target, namespace) {
            return Ok(hit.payload);
        }

        let snapshot = self.snapshot(target);
        let value = compute()?;
        match snapshot {
            Ok(snapshot) => {
                self.store_with_snapshot(target, namespace, snapshot, &value);
            }
            Err(e) => debug!(target = %target.display(), error = %e, "not caching"),
        }
        Ok(value)
    }

    /// Like [`store`](Self::store), but vouches for `payload` with a snapshot
    /// taken earlier by [`snapshot`](Self::snapshot), typically right before
    /// the work that produced the payload started.
    pub fn store_with_snapshot<T: Serialize>(
        &self,
        target: &Path,
        namespace: &str,
        snapshot: ClosureSnapshot,
        payload: &T,
    ) -> StoreOutcome {
        let target = self.shared.resolver.normalize(target);
        let key = CacheKey::new(&target, namespace);
        match serde_json::to_vec(payload) {
            Ok(bytes) => self.insert_entry(key, snapshot, bytes),
            Err(e) => {
                warn!(key = %key, error = %e, "payload does not serialize, not caching");
                StoreOutcome::Skipped {
                    reason: format!("payload does not serialize: {e}"),
                }
            }
        }
    }

    /// Drops every entry for `path`, in every namespace seen so far, along
    /// with its memoized resolution. Returns the number of entries removed.
    ///
    /// This is advisory: entries of other targets that depend on `path` are
    /// left alone and will be found stale by content hashing.
    pub fn invalidate(&self, path: &Path) -> usize {
        let target = self.shared.resolver.normalize(path);
        let removed = {
            let mut inner = self.shared.inner.lock();
            let keys: Vec<CacheKey> = inner
                .namespaces
                .iter()
                .map(|ns| CacheKey::new(&target, ns))
                .collect();
            inner.graph.forget(&target);
            keys.iter()
                .filter(|key| inner.store.remove(key).is_some())
                .count()
        };
        debug!(path = %target.display(), removed, "invalidated cache entries");
        if removed > 0 {
            self.mark_dirty();
        }
        removed
    }

    /// Removes every entry and memoized resolution.
    pub fn clear(&self) {
        {
            let mut inner = self.shared.inner.lock();
            inner.store.clear();
            inner.graph.clear();
        }
        debug!("cleared cache");
        self.mark_dirty();
    }

    /// Summarizes cache effectiveness. Reading the report never changes
    /// entries or recency.
    pub fn effectiveness_report(&self) -> EffectivenessReport {
        let now = Utc::now();
        let summary = {
            let inner = self.shared.inner.lock();
            let count = inner.store.len();
            let total_age: Duration = inner.store.iter().map(|e| e.age(now)).sum();
            StoreSummary {
                entry_count: count,
                total_bytes: inner.store.total_bytes(),
                max_bytes: inner.store.max_bytes(),
                avg_entry_age: if count == 0 {
                    Duration::ZERO
                } else {
                    total_age / count as u32
                },
            }
        };
        self.shared.metrics.report(summary)
    }

    /// Writes the store to disk now if it changed since the last write.
    pub fn flush(&self) -> Result<(), CacheError> {
        self.shared.persist()
    }

    /// Stops the background saver and performs a final flush.
    pub fn dispose(mut self) -> Result<(), CacheError> {
        self.disposed = true;
        if let Some(mut saver) = self.saver.take() {
            saver.shutdown();
        }
        self.flush()
    }

    fn remove(&self, key: &CacheKey) {
        let removed = self.shared.inner.lock().store.remove(key).is_some();
        if removed {
            self.mark_dirty();
        }
    }

    fn mark_dirty(&self) {
        self.shared.dirty.store(true, Ordering::Release);
        if let Some(saver) = &self.saver {
            if !self.is_persistence_disabled() {
                saver.schedule();
            }
        }
    }
}

impl Drop for CacheManager {
    fn drop(&mut self) {
        if self.disposed {
            return;
        }
        if let Some(mut saver) = self.saver.take() {
            saver.shutdown();
        }
        // Failures are already logged by persist
        let _ = self.shared.persist();
    }
}

fn saver_callback(shared: Weak<Shared>) -> impl FnMut() -> SaveAttempt + Send + 'static {
    move || {
        let Some(shared) = shared.upgrade() else {
            return SaveAttempt::GiveUp;
        };
        match shared.persist() {
            Ok(()) => SaveAttempt::Saved,
            Err(_) if shared.persistence_disabled.load(Ordering::Acquire) => SaveAttempt::GiveUp,
            Err(_) => SaveAttempt::Retry,
        }
    }
}

fn absolute_root(root: PathBuf) -> PathBuf {
    if root.is_absolute() {
        return root;
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(root),
        Err(_) => root,
    }
}
