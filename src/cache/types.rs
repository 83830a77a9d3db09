//! Core type definitions for the cache system

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Per-entry counters, readable as a [`EntryStats`] snapshot
#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    pub visits: AtomicU64,
    pub fresh_hits: AtomicU64,
    pub stale_hits: AtomicU64,
    pub sync_refreshes: AtomicU64,
    pub regenerations: AtomicU64,
    pub failures: AtomicU64,
    pub throttled: AtomicU64,
}

impl StatsCounters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> EntryStats {
        EntryStats {
            visits: self.visits.load(Ordering::Relaxed),
            fresh_hits: self.fresh_hits.load(Ordering::Relaxed),
            stale_hits: self.stale_hits.load(Ordering::Relaxed),
            sync_refreshes: self.sync_refreshes.load(Ordering::Relaxed),
            regenerations: self.regenerations.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            throttled: self.throttled.load(Ordering::Relaxed),
        }
    }
}

/// Statistics for one entry
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct EntryStats {
    /// Total number of reads
    pub visits: u64,

    /// Reads served without any coordination
    pub fresh_hits: u64,

    /// Reads served past the soft threshold (background refresh triggered)
    pub stale_hits: u64,

    /// Reads that had to wait for a regeneration
    pub sync_refreshes: u64,

    /// Successful regeneration calls
    pub regenerations: u64,

    /// Failed regeneration calls
    pub failures: u64,

    /// Regeneration attempts refused by the minimum refresh interval
    pub throttled: u64,
}

impl EntryStats {
    /// Share of reads served without waiting, as a percentage
    pub fn hit_rate(&self) -> f64 {
        if self.visits == 0 {
            0.0
        } else {
            ((self.fresh_hits + self.stale_hits) as f64 / self.visits as f64) * 100.0
        }
    }

    /// Share of regeneration calls that failed, as a percentage
    pub fn failure_rate(&self) -> f64 {
        let calls = self.regenerations + self.failures;
        if calls == 0 {
            0.0
        } else {
            (self.failures as f64 / calls as f64) * 100.0
        }
    }

    pub(crate) fn merge(&mut self, other: &EntryStats) {
        self.visits += other.visits;
        self.fresh_hits += other.fresh_hits;
        self.stale_hits += other.stale_hits;
        self.sync_refreshes += other.sync_refreshes;
        self.regenerations += other.regenerations;
        self.failures += other.failures;
        self.throttled += other.throttled;
    }
}

impl fmt::Display for EntryStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "EntryStats {{ visits: {}, hit_rate: {:.2}%, sync_refreshes: {}, regenerations: {}, failures: {} }}",
            self.visits,
            self.hit_rate(),
            self.sync_refreshes,
            self.regenerations,
            self.failures
        )
    }
}

/// Aggregated statistics for a registry
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RegistryStats {
    /// Number of live entries
    pub entries: usize,

    /// Sum over all live entries
    pub totals: EntryStats,
}

impl fmt::Display for RegistryStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RegistryStats {{ entries: {}, {} }}", self.entries, self.totals)
    }
}
