//! # Horizon Cache (horizon-cache)
//!
//! An in-process cache whose entries refresh themselves.
//!
//! Data that is expensive to produce (RPC calls, heavy computation) but
//! tolerates bounded staleness is served from immutable snapshots. Each entry
//! carries its own regeneration function and a two-tier policy:
//!
//! - past the **soft refresh threshold** readers still get the current data
//!   and one background refresh starts (stale-while-revalidate)
//! - past **hard expiry** the reader regenerates synchronously; concurrent
//!   readers wait on that single call instead of stampeding the upstream
//!
//! ## Standalone Entry
//!
//! ```no_run
//! use horizon_cache::{Entry, RefreshConfig};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = RefreshConfig::builder()
//!         .ttl(Duration::from_millis(1000))
//!         .refresh_interval(Duration::from_millis(100))
//!         .build();
//!
//!     let rates = Entry::builder(config)
//!         .regenerate(|_cause| async { Ok(1.0842_f64) })
//!         .build()?;
//!
//!     let lookup = rates.get().await?;
//!     println!("EUR/USD {:?} (fresh: {})", lookup.data(), lookup.is_fresh());
//!     Ok(())
//! }
//! ```
//!
//! ## Registry With Keep-Warm Center
//!
//! ```no_run
//! use horizon_cache::{Center, CenterConfig, RefreshConfig, Registry};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let center = Center::new(CenterConfig::default())?;
//!     center.start();
//!
//!     let profiles = Registry::builder("profiles", RefreshConfig::new(Duration::from_secs(30)))
//!         .regenerate(|user_id: u64, _cause| async move {
//!             Ok(format!("profile of {}", user_id))
//!         })
//!         .center(&center)
//!         .build()?;
//!
//!     let lookup = profiles.fetch(&42).await?;
//!     println!("{:?}", lookup.data());
//!
//!     center.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Warm Start
//!
//! Registries export live snapshots as `{"<json key>": {"data": ..., "expire_at": <ms>}}`
//! and import them again without calling the regeneration function:
//!
//! ```no_run
//! # use horizon_cache::Registry;
//! # fn demo(source: &Registry<String, String>, target: &Registry<String, String>) -> horizon_cache::Result<()> {
//! let json = source.to_json()?;
//! target.from_json(&json)?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod error;

// Re-export main types for convenience
pub use cache::{
    Center, CenterConfig, CenterConfigBuilder, Entry, EntryBuilder, EntryStats, KeyedRegenerator,
    Lookup, RefreshCause, RefreshConfig, RefreshConfigBuilder, RefreshOutcome, Regenerator,
    Registry, RegistryBuilder, RegistryExport, RegistryStats, ScanReport, Snapshot,
    SnapshotRecord,
};
pub use error::{CacheError, Result};
