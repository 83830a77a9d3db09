//! # Self-Refreshing Cache
//!
//! Every cached entry knows how to regenerate its own value and does so
//! lazily and proactively, so readers almost always see fresh-enough data
//! without paying for regeneration themselves.
//!
//! ## Features
//!
//! - **Two-Tier Staleness**: a soft refresh threshold triggers background
//!   refresh while data is still served; hard expiry forces a synchronous one
//! - **Single-Flight**: at most one regeneration call per entry at a time, and
//!   background refreshers skip instead of queueing
//! - **Throttling**: a minimum interval between regeneration attempts
//! - **Lazy Registries**: one entry per key, created on first access
//! - **Keep-Warm Daemon**: a periodic scan refreshes entries that are in use,
//!   independent of reads
//! - **Warm Start**: registries export and import `{data, expire_at}` records
//!
//! ## Example
//!
//! ```rust
//! use horizon_cache::cache::{Registry, RefreshConfig};
//! use std::time::Duration;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = RefreshConfig::builder()
//!     .ttl(Duration::from_secs(60))
//!     .refresh_interval(Duration::from_secs(45))
//!     .build();
//!
//! let users = Registry::builder("users", config)
//!     .regenerate(|id: u64, _cause| async move { Ok(format!("user-{}", id)) })
//!     .build()?;
//!
//! let lookup = users.fetch(&7).await?;
//! assert_eq!(lookup.data().map(String::as_str), Some("user-7"));
//! assert!(lookup.is_fresh());
//! # Ok(())
//! # }
//! ```

pub mod center;
pub mod config;
pub mod entry;
pub mod regenerate;
pub mod registry;
pub mod snapshot;
pub mod trylock;
pub mod types;

pub use center::{Center, ScanReport};
pub use config::{CenterConfig, CenterConfigBuilder, RefreshConfig, RefreshConfigBuilder};
pub use entry::{Entry, EntryBuilder, Lookup, RefreshOutcome};
pub use regenerate::{
    keyed_regenerator, regenerator, KeyedRegenerator, RefreshCause, Regenerator,
};
pub use registry::{Registry, RegistryBuilder, RegistryExport};
pub use snapshot::{Snapshot, SnapshotRecord};
pub use trylock::{TryLock, TryLockGuard};
pub use types::{EntryStats, RegistryStats};
