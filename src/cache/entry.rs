//! Self-refreshing cache entry
//!
//! An [`Entry`] holds the current [`Snapshot`] behind a reference-counted
//! pointer and knows how to regenerate it. Reads follow a two-tier policy:
//!
//! - before the soft refresh threshold the snapshot is returned as is
//! - between the soft threshold and hard expiry the snapshot is returned and a
//!   background refresh is started (stale-while-revalidate)
//! - past hard expiry, or with no snapshot at all, the reader regenerates
//!   synchronously
//!
//! Two locks coordinate regeneration. The blocking `refresh` mutex guarantees
//! at most one regeneration call per entry at a time and owns the throttle
//! timestamp. The non-blocking [`TryLock`] lets background refreshers skip the
//! work entirely when somebody else is already at it.

use crate::cache::{
    center::{Center, KeepWarm},
    config::RefreshConfig,
    regenerate::{RefreshCause, Regenerator},
    snapshot::{Snapshot, SnapshotRecord},
    trylock::TryLock,
    types::{EntryStats, StatsCounters},
};
use crate::error::{CacheError, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::future::Future;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, trace, warn};
use uuid::Uuid;

/// What a regeneration attempt did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// A new snapshot was produced and installed
    Refreshed,

    /// The current snapshot was not due; nothing was called
    Skipped,

    /// The previous attempt was too recent
    Throttled { retry_after: Duration },

    /// The entry has no regeneration function
    Unconfigured,
}

/// Result of a read: the snapshot (if any) and whether it may be trusted
#[derive(Debug)]
pub struct Lookup<T> {
    snapshot: Option<Arc<Snapshot<T>>>,
    fresh: bool,
}

impl<T> Lookup<T> {
    pub(crate) fn fresh(snapshot: Arc<Snapshot<T>>) -> Self {
        Self {
            snapshot: Some(snapshot),
            fresh: true,
        }
    }

    pub(crate) fn stale(snapshot: Arc<Snapshot<T>>) -> Self {
        Self {
            snapshot: Some(snapshot),
            fresh: false,
        }
    }

    pub(crate) fn empty() -> Self {
        Self {
            snapshot: None,
            fresh: false,
        }
    }

    /// `false` when the data is past hard expiry or there is no data
    pub fn is_fresh(&self) -> bool {
        self.fresh
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.is_none()
    }

    pub fn data(&self) -> Option<&T> {
        self.snapshot.as_deref().map(Snapshot::data)
    }

    pub fn cloned(&self) -> Option<T>
    where
        T: Clone,
    {
        self.data().cloned()
    }

    pub fn snapshot(&self) -> Option<&Arc<Snapshot<T>>> {
        self.snapshot.as_ref()
    }

    pub fn into_snapshot(self) -> Option<Arc<Snapshot<T>>> {
        self.snapshot
    }
}

/// State guarded by the blocking refresh mutex
#[derive(Debug, Default)]
struct RefreshState {
    last_attempt: Option<DateTime<Utc>>,

    /// Failure of the last attempt, cleared when the next one starts
    last_error: Option<String>,
}

/// One cache slot that keeps itself fresh
pub struct Entry<T> {
    id: Uuid,
    config: RefreshConfig,
    current: RwLock<Option<Arc<Snapshot<T>>>>,
    regenerate: Option<Regenerator<T>>,
    pending: TryLock,
    refresh: tokio::sync::Mutex<RefreshState>,
    last_visited: AtomicI64,
    counters: StatsCounters,
    center: Option<Arc<Center>>,
}

impl<T> std::fmt::Debug for Entry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entry")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("has_regenerator", &self.regenerate.is_some())
            .field("refreshing", &self.pending.is_locked())
            .finish()
    }
}

impl<T> Entry<T>
where
    T: Send + Sync + 'static,
{
    /// Start building an entry with the given refresh policy
    pub fn builder(config: RefreshConfig) -> EntryBuilder<T> {
        EntryBuilder {
            config,
            regenerate: None,
            center: None,
        }
    }

    /// Read the entry, regenerating per policy
    ///
    /// Fails only when data had to be produced synchronously and could not be.
    pub async fn get(self: &Arc<Self>) -> Result<Lookup<T>> {
        let now = Utc::now();
        self.touch(now);
        let current = self.current();

        if self.regenerate.is_none() {
            return Ok(match current {
                Some(snapshot) if !snapshot.is_expired(now) => {
                    StatsCounters::bump(&self.counters.fresh_hits);
                    Lookup::fresh(snapshot)
                }
                Some(snapshot) => Lookup::stale(snapshot),
                None => Lookup::empty(),
            });
        }

        match current {
            Some(snapshot) if !snapshot.is_expired(now) => {
                if snapshot.needs_refresh(now) {
                    StatsCounters::bump(&self.counters.stale_hits);
                    self.spawn_refresh(RefreshCause::Stale);
                } else {
                    StatsCounters::bump(&self.counters.fresh_hits);
                }
                Ok(Lookup::fresh(snapshot))
            }
            previous => {
                let cause = if previous.is_some() {
                    RefreshCause::Expired
                } else {
                    RefreshCause::Missing
                };
                StatsCounters::bump(&self.counters.sync_refreshes);

                let outcome = self.do_refresh(cause, false).await?;
                let now = Utc::now();
                match self.current() {
                    Some(snapshot) if !snapshot.is_expired(now) => Ok(Lookup::fresh(snapshot)),
                    Some(snapshot) => Ok(Lookup::stale(snapshot)),
                    None => Err(CacheError::Throttled {
                        retry_after_ms: match outcome {
                            RefreshOutcome::Throttled { retry_after } => {
                                retry_after.as_millis() as u64
                            }
                            _ => 0,
                        },
                    }),
                }
            }
        }
    }

    /// Regenerate now, regardless of the snapshot's age.
    /// Still throttled and still exclusive with every other refresh.
    pub async fn refresh(&self) -> Result<RefreshOutcome> {
        self.do_refresh(RefreshCause::Forced, true).await
    }

    /// Install data from an exported record without calling the regenerator
    pub fn import(&self, record: SnapshotRecord<T>) {
        let snapshot = Snapshot::from_record(record, &self.config);
        self.install(Arc::new(snapshot));
    }

    /// Export the current snapshot, if any
    pub fn export(&self) -> Option<SnapshotRecord<T>>
    where
        T: Clone,
    {
        self.current().map(|snapshot| snapshot.to_record())
    }

    /// Expired (or empty) and unread for `idle_ttl_multiple * ttl`
    pub fn is_idle(&self, now: DateTime<Utc>) -> bool {
        let expired = self
            .current()
            .map_or(true, |snapshot| snapshot.is_expired(now));
        if !expired {
            return false;
        }

        let idle_for = now.timestamp_millis() - self.last_visited.load(Ordering::Relaxed);
        idle_for > self.config.idle_after().as_millis() as i64
    }

    /// The snapshot currently served, without touching visit bookkeeping
    pub fn current(&self) -> Option<Arc<Snapshot<T>>> {
        self.current.read().clone()
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &RefreshConfig {
        &self.config
    }

    pub fn has_regenerator(&self) -> bool {
        self.regenerate.is_some()
    }

    /// Whether a background refresh currently holds the try-lock
    pub fn is_refreshing(&self) -> bool {
        self.pending.is_locked()
    }

    pub fn last_visited(&self) -> Option<DateTime<Utc>> {
        DateTime::<Utc>::from_timestamp_millis(self.last_visited.load(Ordering::Relaxed))
    }

    pub fn stats(&self) -> EntryStats {
        self.counters.snapshot()
    }

    fn touch(&self, now: DateTime<Utc>) {
        StatsCounters::bump(&self.counters.visits);
        self.last_visited
            .store(now.timestamp_millis(), Ordering::Relaxed);
    }

    /// Start a best-effort background refresh unless one is already running.
    /// Outside a tokio runtime the refresh is skipped with a warning.
    fn spawn_refresh(self: &Arc<Self>, cause: RefreshCause) {
        if self.pending.is_locked() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(entry = %self.id, %cause, "no tokio runtime, background refresh skipped");
            return;
        };
        let entry = Arc::clone(self);
        runtime.spawn(async move {
            entry.try_refresh(cause).await;
        });
    }

    /// Refresh if nobody else is refreshing; never waits, never fails
    pub(crate) async fn try_refresh(&self, cause: RefreshCause) {
        let Some(_guard) = self.pending.try_lock() else {
            return;
        };

        match self.do_refresh(cause, false).await {
            Ok(outcome) => {
                trace!(entry = %self.id, %cause, ?outcome, "background refresh finished");
            }
            Err(e) => {
                warn!(entry = %self.id, %cause, "background refresh failed: {}", e);
            }
        }
    }

    /// Regenerate under the exclusivity mutex
    async fn do_refresh(&self, cause: RefreshCause, force: bool) -> Result<RefreshOutcome> {
        let Some(regenerate) = &self.regenerate else {
            return Ok(RefreshOutcome::Unconfigured);
        };

        let mut state = self.refresh.lock().await;
        let now = Utc::now();

        // Whoever held the mutex before us may already have done the work.
        // Synchronous readers only need unexpired data; background refreshers
        // need data that has not reached its refresh threshold.
        if !force {
            if let Some(snapshot) = self.current() {
                let satisfied = if cause.is_synchronous() {
                    !snapshot.is_expired(now)
                } else {
                    !snapshot.needs_refresh(now)
                };
                if satisfied {
                    return Ok(RefreshOutcome::Skipped);
                }
            }
        }

        if let Some(last) = state.last_attempt {
            let since = (now - last).to_std().unwrap_or(Duration::ZERO);
            if since < self.config.min_refresh_interval {
                StatsCounters::bump(&self.counters.throttled);
                debug!(entry = %self.id, %cause, "refresh throttled");

                // A waiter with nothing to serve gets the failure it queued behind
                if !force && cause.is_synchronous() && self.current().is_none() {
                    if let Some(message) = &state.last_error {
                        return Err(CacheError::RegenerationFailed(anyhow::anyhow!(
                            "{}",
                            message
                        )));
                    }
                }
                return Ok(RefreshOutcome::Throttled {
                    retry_after: self.config.min_refresh_interval - since,
                });
            }
        }

        state.last_attempt = Some(now);
        state.last_error = None;
        match regenerate(cause).await {
            Ok(data) => {
                let snapshot = Snapshot::produce(data, Utc::now(), &self.config);
                debug!(
                    entry = %self.id,
                    %cause,
                    expire_at = %snapshot.expire_at(),
                    "regenerated snapshot"
                );
                self.install(Arc::new(snapshot));
                StatsCounters::bump(&self.counters.regenerations);
                Ok(RefreshOutcome::Refreshed)
            }
            Err(e) => {
                StatsCounters::bump(&self.counters.failures);
                debug!(entry = %self.id, %cause, "regeneration failed: {}", e);
                state.last_error = Some(format!("{:#}", e));
                Err(CacheError::RegenerationFailed(e))
            }
        }
    }

    /// Swap in a new snapshot and retire the old one
    fn install(&self, snapshot: Arc<Snapshot<T>>) {
        let retired = self.current.write().replace(snapshot);
        if let Some(retired) = retired {
            trace!(
                entry = %self.id,
                readers = Arc::strong_count(&retired) - 1,
                "retired snapshot"
            );
        }
    }
}

impl<T> KeepWarm for Entry<T>
where
    T: Send + Sync + 'static,
{
    fn is_idle(&self, now: DateTime<Utc>) -> bool {
        Entry::is_idle(self, now)
    }

    fn keep_warm(self: Arc<Self>) {
        self.spawn_refresh(RefreshCause::KeepWarm);
    }
}

impl<T> Drop for Entry<T> {
    fn drop(&mut self) {
        if let Some(center) = &self.center {
            center.unregister_entry(&self.id);
        }
    }
}

/// Builder for [`Entry`]
pub struct EntryBuilder<T> {
    config: RefreshConfig,
    regenerate: Option<Regenerator<T>>,
    center: Option<Arc<Center>>,
}

impl<T> EntryBuilder<T>
where
    T: Send + Sync + 'static,
{
    /// Set the regeneration function
    pub fn regenerate<F, Fut>(self, f: F) -> Self
    where
        F: Fn(RefreshCause) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        self.regenerator(crate::cache::regenerate::regenerator(f))
    }

    /// Set an already wrapped regeneration function
    pub fn regenerator(mut self, regenerate: Regenerator<T>) -> Self {
        self.regenerate = Some(regenerate);
        self
    }

    /// Register the entry with a keep-warm center
    pub fn center(mut self, center: &Arc<Center>) -> Self {
        self.center = Some(Arc::clone(center));
        self
    }

    /// Build the entry
    pub fn build(self) -> Result<Arc<Entry<T>>> {
        self.config.validate()?;

        let entry = Arc::new(Entry {
            id: Uuid::new_v4(),
            config: self.config,
            current: RwLock::new(None),
            regenerate: self.regenerate,
            pending: TryLock::new(),
            refresh: tokio::sync::Mutex::new(RefreshState::default()),
            last_visited: AtomicI64::new(Utc::now().timestamp_millis()),
            counters: StatsCounters::default(),
            center: self.center,
        });

        if let Some(center) = &entry.center {
            let weak: Weak<dyn KeepWarm> = Arc::downgrade(&entry) as Weak<dyn KeepWarm>;
            center.register_entry(entry.id, weak);
        }

        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32};
    use tokio::time::sleep;

    fn counting(
        config: RefreshConfig,
        delay: Duration,
    ) -> (Arc<Entry<u32>>, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let entry = Entry::builder(config)
            .regenerate(move |_| {
                let counter = Arc::clone(&counter);
                async move {
                    sleep(delay).await;
                    Ok(counter.fetch_add(1, Ordering::SeqCst) + 1)
                }
            })
            .build()
            .unwrap();
        (entry, calls)
    }

    #[tokio::test]
    async fn test_unconfigured_entry_reports_not_found() {
        let entry: Arc<Entry<String>> = Entry::builder(RefreshConfig::default()).build().unwrap();

        let lookup = entry.get().await.unwrap();
        assert!(lookup.is_empty());
        assert!(!lookup.is_fresh());
        assert_eq!(entry.refresh().await.unwrap(), RefreshOutcome::Unconfigured);
    }

    #[tokio::test]
    async fn test_unconfigured_entry_serves_imported_data() {
        let entry: Arc<Entry<String>> = Entry::builder(RefreshConfig::default()).build().unwrap();
        entry.import(SnapshotRecord::new(
            "kept".to_string(),
            Utc::now() + chrono::Duration::seconds(30),
        ));

        let lookup = entry.get().await.unwrap();
        assert!(lookup.is_fresh());
        assert_eq!(lookup.data().map(String::as_str), Some("kept"));

        entry.import(SnapshotRecord::new(
            "old".to_string(),
            Utc::now() - chrono::Duration::seconds(1),
        ));
        let lookup = entry.get().await.unwrap();
        assert!(!lookup.is_fresh());
        assert_eq!(lookup.cloned(), Some("old".to_string()));
    }

    #[tokio::test]
    async fn test_first_get_populates() {
        let (entry, calls) = counting(RefreshConfig::new(Duration::from_secs(60)), Duration::ZERO);

        let lookup = entry.get().await.unwrap();
        assert!(lookup.is_fresh());
        assert_eq!(lookup.cloned(), Some(1));

        let lookup = entry.get().await.unwrap();
        assert_eq!(lookup.cloned(), Some(1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let stats = entry.stats();
        assert_eq!(stats.visits, 2);
        assert_eq!(stats.sync_refreshes, 1);
        assert_eq!(stats.fresh_hits, 1);
        assert_eq!(stats.regenerations, 1);
    }

    #[tokio::test]
    async fn test_failure_propagates_and_keeps_old_snapshot() {
        let failing = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&failing);
        let config = RefreshConfig::builder()
            .ttl(Duration::from_millis(50))
            .min_refresh_interval(Duration::from_millis(1))
            .build();
        let entry = Entry::builder(config)
            .regenerate(move |_| {
                let fail = flag.load(Ordering::SeqCst);
                async move {
                    if fail {
                        Err(anyhow::anyhow!("upstream unavailable"))
                    } else {
                        Ok("good")
                    }
                }
            })
            .build()
            .unwrap();

        entry.get().await.unwrap();
        failing.store(true, Ordering::SeqCst);
        sleep(Duration::from_millis(5)).await;

        let forced = entry.refresh().await;
        assert!(matches!(forced, Err(CacheError::RegenerationFailed(_))));
        assert_eq!(entry.current().map(|s| *s.data()), Some("good"));

        sleep(Duration::from_millis(80)).await;
        let expired = entry.get().await;
        assert!(matches!(expired, Err(CacheError::RegenerationFailed(_))));
        assert_eq!(entry.stats().failures, 2);
    }

    #[tokio::test]
    async fn test_forced_refresh_is_throttled() {
        let config = RefreshConfig::builder()
            .ttl(Duration::from_secs(60))
            .min_refresh_interval(Duration::from_secs(30))
            .build();
        let (entry, calls) = counting(config, Duration::ZERO);

        entry.get().await.unwrap();
        let outcome = entry.refresh().await.unwrap();
        assert!(matches!(outcome, RefreshOutcome::Throttled { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(entry.stats().throttled, 1);
    }

    #[tokio::test]
    async fn test_forced_refresh_bypasses_freshness() {
        let config = RefreshConfig::builder()
            .ttl(Duration::from_secs(60))
            .min_refresh_interval(Duration::from_millis(1))
            .build();
        let (entry, calls) = counting(config, Duration::ZERO);

        entry.get().await.unwrap();
        sleep(Duration::from_millis(5)).await;
        assert_eq!(entry.refresh().await.unwrap(), RefreshOutcome::Refreshed);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(entry.get().await.unwrap().cloned(), Some(2));
    }

    #[tokio::test]
    async fn test_throttled_waiter_gets_last_failure() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let config = RefreshConfig::builder()
            .ttl(Duration::from_secs(60))
            .min_refresh_interval(Duration::from_secs(30))
            .build();
        let entry = Entry::builder(config)
            .regenerate(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err::<u32, _>(anyhow::anyhow!("nope")) }
            })
            .build()
            .unwrap();

        assert!(matches!(
            entry.get().await,
            Err(CacheError::RegenerationFailed(_))
        ));
        let err = entry.get().await.unwrap_err();
        assert!(matches!(err, CacheError::RegenerationFailed(_)));
        assert!(err.to_string().contains("nope"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(entry.stats().throttled, 1);
    }

    #[tokio::test]
    async fn test_throttled_after_cancelled_attempt() {
        let config = RefreshConfig::builder()
            .ttl(Duration::from_secs(60))
            .min_refresh_interval(Duration::from_secs(30))
            .build();
        let (entry, calls) = counting(config, Duration::from_secs(5));

        let cancelled = tokio::time::timeout(Duration::from_millis(10), entry.get()).await;
        assert!(cancelled.is_err());

        match entry.get().await.unwrap_err() {
            CacheError::Throttled { retry_after_ms } => assert!(retry_after_ms > 0),
            other => panic!("expected throttled, got {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_waiter_skips_when_winner_installed_unexpired_data() {
        // refresh threshold is reached almost at once, expiry is far away
        let config = RefreshConfig::builder()
            .ttl(Duration::from_secs(10))
            .refresh_interval(Duration::from_millis(1))
            .min_refresh_interval(Duration::from_millis(1))
            .build();
        let (entry, calls) = counting(config, Duration::from_millis(20));

        let first = {
            let entry = Arc::clone(&entry);
            tokio::spawn(async move { entry.get().await })
        };
        tokio::task::yield_now().await;
        sleep(Duration::from_millis(5)).await;

        // queued behind the winner on the mutex
        assert_eq!(
            entry.do_refresh(RefreshCause::Missing, false).await.unwrap(),
            RefreshOutcome::Skipped
        );
        assert_eq!(first.await.unwrap().unwrap().cloned(), Some(1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_keep_warm_outside_runtime_is_skipped() {
        let center = Center::new(crate::cache::config::CenterConfig::default()).unwrap();
        let counter = Arc::new(AtomicU32::new(0));
        let counted = Arc::clone(&counter);
        let entry = Entry::builder(RefreshConfig::default())
            .regenerate(move |_| {
                counted.fetch_add(1, Ordering::SeqCst);
                async { Ok(1u32) }
            })
            .center(&center)
            .build()
            .unwrap();

        let report = center.scan();
        assert_eq!(report.warmed, 1);
        assert!(!entry.is_refreshing());
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_idle_detection() {
        let config = RefreshConfig::builder()
            .ttl(Duration::from_millis(20))
            .idle_ttl_multiple(2)
            .build();
        let (entry, _) = counting(config, Duration::ZERO);

        entry.get().await.unwrap();
        assert!(!entry.is_idle(Utc::now()));

        // expired, but read recently
        sleep(Duration::from_millis(30)).await;
        assert!(!entry.is_idle(Utc::now()));

        sleep(Duration::from_millis(40)).await;
        assert!(entry.is_idle(Utc::now()));
    }

    #[tokio::test]
    async fn test_export_empty_entry() {
        let (entry, _) = counting(RefreshConfig::default(), Duration::ZERO);
        assert!(entry.export().is_none());

        entry.get().await.unwrap();
        let record = entry.export().unwrap();
        assert_eq!(record.data, 1);
        assert!(!record.is_expired(Utc::now()));
    }
}
