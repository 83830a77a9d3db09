//! Warm Cache Demo Application
//!
//! Serves simulated exchange-rate quotes from a keep-warm registry, then
//! exports the live snapshots and warm-starts a second registry from them.
//!
//! Usage:
//!   cargo run --example warm_cache_demo
//!
//! Environment variables (also read from `.env`):
//!   HORIZON_TTL_MS              - Hard expiry of each snapshot (default: 60000)
//!   HORIZON_REFRESH_INTERVAL_MS - Soft refresh threshold (default: ttl)
//!   HORIZON_SCAN_INTERVAL_MS    - Keep-warm scan period (default: 1000)
//!   HORIZON_RECYCLE_INTERVAL_MS - Idle entry recycling period (default: off)

use horizon_cache::{Center, CenterConfig, RefreshCause, RefreshConfig, Registry};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .init();

    info!("=== Self-Refreshing Cache Demo ===");

    let refresh = RefreshConfig::from_env()?;
    let center_config = CenterConfig::from_env()?;
    info!("Refresh policy: {:?}", refresh);

    let center = Center::new(center_config)?;
    center.start();

    let upstream_calls = Arc::new(AtomicU64::new(0));
    let calls = Arc::clone(&upstream_calls);
    let quotes = Registry::builder("quotes", refresh.clone())
        .regenerate(move |pair: String, cause: RefreshCause| {
            let calls = Arc::clone(&calls);
            async move {
                // pretend to call a slow pricing service
                tokio::time::sleep(Duration::from_millis(150)).await;
                let n = calls.fetch_add(1, Ordering::SeqCst);
                info!("Fetched {} from upstream ({})", pair, cause);
                Ok(1.0 + (pair.len() as f64) / 10.0 + (n as f64) / 1000.0)
            }
        })
        .center(&center)
        .build()?;

    info!("\n--- Cold reads (synchronous regeneration) ---");
    for pair in ["EUR/USD", "GBP/USD", "USD/JPY"] {
        let started = Instant::now();
        let lookup = quotes.fetch(&pair.to_string()).await?;
        info!(
            "{} = {:?} (fresh: {}, took {:?})",
            pair,
            lookup.data(),
            lookup.is_fresh(),
            started.elapsed()
        );
    }

    info!("\n--- Warm reads (served from snapshots) ---");
    let started = Instant::now();
    for _ in 0..1000 {
        quotes.fetch(&"EUR/USD".to_string()).await?;
    }
    info!("1000 reads took {:?}", started.elapsed());

    info!("\n--- Keep-warm scan ---");
    let report = center.scan();
    info!(
        "Scan: {} warmed, {} idle, {} pruned",
        report.warmed, report.idle, report.pruned
    );

    info!("\n--- Warm start ---");
    let exported = quotes.to_json()?;
    info!("Exported: {}", exported);

    let standby: Arc<Registry<String, f64>> =
        Registry::builder("quotes-standby", refresh).build()?;
    let imported = standby.from_json(&exported)?;
    info!("Imported {} snapshots into {}", imported, standby.name());

    let lookup = standby.fetch(&"GBP/USD".to_string()).await?;
    info!(
        "Standby GBP/USD = {:?} (fresh: {})",
        lookup.data(),
        lookup.is_fresh()
    );

    info!("\n--- Statistics ---");
    info!("{}", quotes.stats());
    info!("Upstream calls: {}", upstream_calls.load(Ordering::SeqCst));
    info!("Center tracks {} entries", center.len());

    center.stop().await;
    info!("\n=== Demo Complete ===");

    Ok(())
}
