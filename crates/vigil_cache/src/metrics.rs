//! Cache effectiveness counters.
//!
//! Counters are atomics so they can be bumped from any worker without the
//! store lock and read from a reporting timer without side effects.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

use crate::outcome::MissReason;

/// Running counters for one [`CacheManager`](crate::CacheManager).
#[derive(Debug, Default)]
pub struct Metrics {
    lookups: AtomicU64,
    hits: AtomicU64,
    never_cached: AtomicU64,
    stale: AtomicU64,
    evicted_misses: AtomicU64,
    expired: AtomicU64,
    bytes_saved: AtomicU64,
    entries_evicted: AtomicU64,
    stores: AtomicU64,
    too_large: AtomicU64,
}

impl Metrics {
    /// Records a served hit of `size_bytes` payload.
    pub fn record_hit(&self, size_bytes: u64) {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        self.hits.fetch_add(1, Ordering::Relaxed);
        self.bytes_saved.fetch_add(size_bytes, Ordering::Relaxed);
    }

    /// Records a miss.
    pub fn record_miss(&self, reason: MissReason) {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        let counter = match reason {
            MissReason::NeverCached => &self.never_cached,
            MissReason::Stale => &self.stale,
            MissReason::Evicted => &self.evicted_misses,
            MissReason::Expired => &self.expired,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a completed store.
    pub fn record_store(&self, too_large: bool) {
        self.stores.fetch_add(1, Ordering::Relaxed);
        if too_large {
            self.too_large.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Records budget evictions.
    pub fn record_evictions(&self, count: usize) {
        self.entries_evicted
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Copies the counters into a report, filling in store-derived fields.
    pub fn report(&self, store: StoreSummary) -> EffectivenessReport {
        let lookups = self.lookups.load(Ordering::Relaxed);
        let hits = self.hits.load(Ordering::Relaxed);
        EffectivenessReport {
            lookups,
            hits,
            misses: MissBreakdown {
                never_cached: self.never_cached.load(Ordering::Relaxed),
                stale: self.stale.load(Ordering::Relaxed),
                evicted: self.evicted_misses.load(Ordering::Relaxed),
                expired: self.expired.load(Ordering::Relaxed),
            },
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
            bytes_saved: self.bytes_saved.load(Ordering::Relaxed),
            entries_evicted: self.entries_evicted.load(Ordering::Relaxed),
            stores: self.stores.load(Ordering::Relaxed),
            too_large: self.too_large.load(Ordering::Relaxed),
            entry_count: store.entry_count,
            total_bytes: store.total_bytes,
            max_bytes: store.max_bytes,
            avg_entry_age_ms: store.avg_entry_age.as_millis() as u64,
        }
    }
}

/// Store-derived figures, computed by the caller under the store lock.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreSummary {
    /// Number of live entries.
    pub entry_count: usize,
    /// Sum of live payload sizes.
    pub total_bytes: u64,
    /// Configured budget.
    pub max_bytes: u64,
    /// Mean time since creation over live entries.
    pub avg_entry_age: Duration,
}

/// Miss counts by reason.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MissBreakdown {
    /// Lookups with no entry.
    pub never_cached: u64,
    /// Lookups that found an invalid entry.
    pub stale: u64,
    /// Lookups for recently evicted entries.
    pub evicted: u64,
    /// Lookups for entries past a TTL.
    pub expired: u64,
}

impl MissBreakdown {
    /// Total misses.
    pub fn total(&self) -> u64 {
        self.never_cached + self.stale + self.evicted + self.expired
    }
}

/// Read-only snapshot of how well the cache is doing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EffectivenessReport {
    /// Total lookups.
    pub lookups: u64,
    /// Lookups served from cache.
    pub hits: u64,
    /// Misses by reason.
    pub misses: MissBreakdown,
    /// `hits / lookups`, or 0 with no lookups.
    pub hit_rate: f64,
    /// Payload bytes served from cache instead of recomputed.
    pub bytes_saved: u64,
    /// Entries evicted for budget reasons.
    pub entries_evicted: u64,
    /// Completed stores.
    pub stores: u64,
    /// Stores rejected because the payload exceeded the budget.
    pub too_large: u64,
    /// Live entries.
    pub entry_count: usize,
    /// Live payload bytes.
    pub total_bytes: u64,
    /// Byte budget.
    pub max_bytes: u64,
    /// Mean age of live entries in milliseconds.
    pub avg_entry_age_ms: u64,
}

impl fmt::Display for EffectivenessReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "lookups: {} (hits {}, misses {})",
            self.lookups,
            self.hits,
            self.misses.total()
        )?;
        writeln!(f, "hit rate: {:.1}%", self.hit_rate * 100.0)?;
        writeln!(
            f,
            "misses: never cached {}, stale {}, evicted {}, expired {}",
            self.misses.never_cached, self.misses.stale, self.misses.evicted, self.misses.expired
        )?;
        writeln!(f, "bytes saved: {}", self.bytes_saved)?;
        writeln!(
            f,
            "entries: {} using {} of {} bytes (evicted {})",
            self.entry_count, self.total_bytes, self.max_bytes, self.entries_evicted
        )?;
        write!(f, "average entry age: {}ms", self.avg_entry_age_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_report_has_zero_hit_rate() {
        let metrics = Metrics::default();
        let report = metrics.report(StoreSummary::default());
        assert_eq!(report.lookups, 0);
        assert_eq!(report.hit_rate, 0.0);
    }

    #[test]
    fn counts_hits_and_misses() {
        let metrics = Metrics::default();
        metrics.record_hit(100);
        metrics.record_hit(50);
        metrics.record_miss(MissReason::Stale);
        metrics.record_miss(MissReason::NeverCached);
        metrics.record_evictions(3);
        metrics.record_store(true);

        let report = metrics.report(StoreSummary {
            entry_count: 2,
            total_bytes: 10,
            max_bytes: 100,
            avg_entry_age: Duration::from_millis(1500),
        });
        assert_eq!(report.lookups, 4);
        assert_eq!(report.hits, 2);
        assert_eq!(report.misses.total(), 2);
        assert_eq!(report.misses.stale, 1);
        assert!((report.hit_rate - 0.5).abs() < f64::EPSILON);
        assert_eq!(report.bytes_saved, 150);
        assert_eq!(report.entries_evicted, 3);
        assert_eq!(report.too_large, 1);
        assert_eq!(report.avg_entry_age_ms, 1500);
    }

    #[test]
    fn report_renders_and_serializes() {
        let metrics = Metrics::default();
        metrics.record_hit(1);
        let report = metrics.report(StoreSummary::default());
        assert!(report.to_string().contains("hit rate: 100.0%"));
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["hits"], 1);
    }
}
