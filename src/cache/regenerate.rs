//! Regeneration callbacks
//!
//! An entry owns a [`Regenerator`]: an async function producing a fresh value.
//! Registries take a [`KeyedRegenerator`] and bind the key into a per-entry
//! closure when the entry is created.

use futures::future::{BoxFuture, FutureExt};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Why a regeneration call was made
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefreshCause {
    /// A reader found no snapshot at all
    Missing,

    /// A reader found a hard-expired snapshot
    Expired,

    /// A reader crossed the soft refresh threshold; runs in the background
    Stale,

    /// Explicit `refresh()` call
    Forced,

    /// The center's keep-warm scan
    KeepWarm,
}

impl RefreshCause {
    /// Whether the caller is waiting on this regeneration
    pub fn is_synchronous(&self) -> bool {
        matches!(
            self,
            RefreshCause::Missing | RefreshCause::Expired | RefreshCause::Forced
        )
    }
}

impl fmt::Display for RefreshCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefreshCause::Missing => write!(f, "missing"),
            RefreshCause::Expired => write!(f, "expired"),
            RefreshCause::Stale => write!(f, "stale"),
            RefreshCause::Forced => write!(f, "forced"),
            RefreshCause::KeepWarm => write!(f, "keep_warm"),
        }
    }
}

/// Produces a fresh value for one entry
pub type Regenerator<T> =
    Arc<dyn Fn(RefreshCause) -> BoxFuture<'static, anyhow::Result<T>> + Send + Sync>;

/// Produces a fresh value for any key of a registry
pub type KeyedRegenerator<K, T> =
    Arc<dyn Fn(K, RefreshCause) -> BoxFuture<'static, anyhow::Result<T>> + Send + Sync>;

/// Wrap an async closure as a [`Regenerator`]
pub fn regenerator<T, F, Fut>(f: F) -> Regenerator<T>
where
    F: Fn(RefreshCause) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    Arc::new(move |cause| f(cause).boxed())
}

/// Wrap an async closure as a [`KeyedRegenerator`]
pub fn keyed_regenerator<K, T, F, Fut>(f: F) -> KeyedRegenerator<K, T>
where
    F: Fn(K, RefreshCause) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    Arc::new(move |key, cause| f(key, cause).boxed())
}

/// Fix the key of a keyed regenerator
pub(crate) fn bind_key<K, T>(keyed: &KeyedRegenerator<K, T>, key: K) -> Regenerator<T>
where
    K: Clone + Send + Sync + 'static,
    T: 'static,
{
    let keyed = Arc::clone(keyed);
    Arc::new(move |cause| keyed(key.clone(), cause))
}
