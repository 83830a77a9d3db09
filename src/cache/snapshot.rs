//! Immutable snapshots of cached data

use crate::cache::config::RefreshConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One immutable generation of cached data
///
/// A snapshot is never mutated after construction. Entries replace it as a
/// whole; readers that still hold the `Arc` of a replaced snapshot keep it
/// alive until they are done with it.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot<T> {
    data: T,
    produced_at: DateTime<Utc>,
    refresh_at: DateTime<Utc>,
    expire_at: DateTime<Utc>,
}

impl<T> Snapshot<T> {
    /// Create a snapshot from explicit timestamps.
    /// `refresh_at` is clamped so that it never passes `expire_at`.
    pub fn new(
        data: T,
        produced_at: DateTime<Utc>,
        refresh_at: DateTime<Utc>,
        expire_at: DateTime<Utc>,
    ) -> Self {
        Self {
            data,
            produced_at,
            refresh_at: refresh_at.min(expire_at),
            expire_at,
        }
    }

    /// Create a snapshot produced at `now` under the given refresh policy
    pub fn produce(data: T, now: DateTime<Utc>, config: &RefreshConfig) -> Self {
        let expire_at = offset(now, config.ttl_with_jitter());
        let refresh_at = offset(now, config.effective_refresh_interval());
        Self::new(data, now, refresh_at, expire_at)
    }

    /// Rebuild a snapshot from an exported record.
    /// The production time is inferred as `expire_at - ttl`.
    pub fn from_record(record: SnapshotRecord<T>, config: &RefreshConfig) -> Self {
        let produced_at = chrono::Duration::from_std(config.ttl)
            .ok()
            .and_then(|ttl| record.expire_at.checked_sub_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let refresh_at = offset(produced_at, config.effective_refresh_interval());
        Self::new(record.data, produced_at, refresh_at, record.expire_at)
    }

    /// True once `now` is past the hard expiry
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expire_at
    }

    /// True once `now` has reached the soft refresh threshold
    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        now >= self.refresh_at
    }

    /// The cached payload
    pub fn data(&self) -> &T {
        &self.data
    }

    /// Consume the snapshot, returning the payload
    pub fn into_data(self) -> T {
        self.data
    }

    pub fn produced_at(&self) -> DateTime<Utc> {
        self.produced_at
    }

    pub fn refresh_at(&self) -> DateTime<Utc> {
        self.refresh_at
    }

    pub fn expire_at(&self) -> DateTime<Utc> {
        self.expire_at
    }

    /// Age of the snapshot at `now`
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.produced_at)
            .to_std()
            .unwrap_or(Duration::from_secs(0))
    }

    /// Export the persistent part of the snapshot
    pub fn to_record(&self) -> SnapshotRecord<T>
    where
        T: Clone,
    {
        SnapshotRecord {
            data: self.data.clone(),
            expire_at: self.expire_at,
        }
    }
}

/// Serialized form of a snapshot: the payload and its hard expiry
///
/// `expire_at` is encoded as epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord<T> {
    pub data: T,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub expire_at: DateTime<Utc>,
}

impl<T> SnapshotRecord<T> {
    pub fn new(data: T, expire_at: DateTime<Utc>) -> Self {
        Self { data, expire_at }
    }

    /// True once `now` is past the recorded expiry
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expire_at
    }
}

/// `at + d`, saturating at the largest representable time
pub(crate) fn offset(at: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(d)
        .ok()
        .and_then(|d| at.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
