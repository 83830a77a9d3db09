//! Configuration for entries, registries and the keep-warm center

use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Refresh policy shared by every entry of a registry (or a standalone entry)
///
/// - `ttl` is the hard lifetime of a snapshot
/// - `refresh_interval` is the soft threshold, measured from production; once it
///   passes, readers still get the snapshot but a background refresh starts
/// - `min_refresh_interval` is the floor between two regeneration attempts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshConfig {
    /// Hard lifetime of a produced snapshot
    pub ttl: Duration,

    /// Soft refresh threshold. `None` means the same as `ttl`: no early refresh
    pub refresh_interval: Option<Duration>,

    /// Minimum time between two regeneration attempts of one entry
    pub min_refresh_interval: Duration,

    /// An expired entry that has not been read for `idle_ttl_multiple * ttl`
    /// is idle and may be recycled
    pub idle_ttl_multiple: u32,

    /// TTL jitter factor (0.0 - 1.0)
    /// Shortens each snapshot's TTL by a random fraction so that entries
    /// populated together do not expire together
    pub ttl_jitter: f64,
}

/// Default minimum refresh interval
pub const DEFAULT_MIN_REFRESH_INTERVAL: Duration = Duration::from_millis(10);

/// Default idle multiple
pub const DEFAULT_IDLE_TTL_MULTIPLE: u32 = 4;

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60),
            refresh_interval: None,
            min_refresh_interval: DEFAULT_MIN_REFRESH_INTERVAL,
            idle_ttl_multiple: DEFAULT_IDLE_TTL_MULTIPLE,
            ttl_jitter: 0.0,
        }
    }
}

impl RefreshConfig {
    /// Create a config with the given TTL and defaults for everything else
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            ..Default::default()
        }
    }

    /// Create a new builder for refresh configuration
    pub fn builder() -> RefreshConfigBuilder {
        RefreshConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.ttl.is_zero() {
            return Err(CacheError::ConfigError(
                "ttl must be greater than 0".to_string(),
            ));
        }

        if let Some(interval) = self.refresh_interval {
            if interval.is_zero() {
                return Err(CacheError::ConfigError(
                    "refresh_interval must be greater than 0".to_string(),
                ));
            }
            if interval > self.ttl {
                return Err(CacheError::ConfigError(format!(
                    "refresh_interval ({:?}) must not exceed ttl ({:?})",
                    interval, self.ttl
                )));
            }
        }

        if self.idle_ttl_multiple == 0 {
            return Err(CacheError::ConfigError(
                "idle_ttl_multiple must be at least 1".to_string(),
            ));
        }

        if !(0.0..1.0).contains(&self.ttl_jitter) {
            return Err(CacheError::ConfigError(
                "ttl_jitter must be in [0.0, 1.0)".to_string(),
            ));
        }

        Ok(())
    }

    /// Soft refresh threshold actually in effect
    pub fn effective_refresh_interval(&self) -> Duration {
        self.refresh_interval.unwrap_or(self.ttl).min(self.ttl)
    }

    /// How long an expired entry may go unread before it counts as idle
    pub fn idle_after(&self) -> Duration {
        self.ttl.saturating_mul(self.idle_ttl_multiple)
    }

    /// Calculate the TTL for one snapshot with jitter applied.
    /// Jitter only ever shortens the TTL.
    pub fn ttl_with_jitter(&self) -> Duration {
        if self.ttl_jitter == 0.0 {
            return self.ttl;
        }

        let cut = rand::random::<f64>() * self.ttl_jitter;
        self.ttl.mul_f64(1.0 - cut)
    }

    /// Load the refresh policy from `HORIZON_*` environment variables.
    /// Unset variables fall back to the defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let config = Self {
            ttl: read_millis(&lookup, "HORIZON_TTL_MS")?.unwrap_or(defaults.ttl),
            refresh_interval: read_millis(&lookup, "HORIZON_REFRESH_INTERVAL_MS")?,
            min_refresh_interval: read_millis(&lookup, "HORIZON_MIN_REFRESH_INTERVAL_MS")?
                .unwrap_or(defaults.min_refresh_interval),
            idle_ttl_multiple: read_parsed(&lookup, "HORIZON_IDLE_TTL_MULTIPLE")?
                .unwrap_or(defaults.idle_ttl_multiple),
            ttl_jitter: read_parsed(&lookup, "HORIZON_TTL_JITTER")?
                .unwrap_or(defaults.ttl_jitter),
        };
        config.validate()?;
        Ok(config)
    }
}

/// Builder for refresh configuration
#[derive(Debug, Default)]
pub struct RefreshConfigBuilder {
    ttl: Option<Duration>,
    refresh_interval: Option<Duration>,
    min_refresh_interval: Option<Duration>,
    idle_ttl_multiple: Option<u32>,
    ttl_jitter: Option<f64>,
}

impl RefreshConfigBuilder {
    /// Set the hard lifetime of a snapshot
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Set the soft refresh threshold
    pub fn refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = Some(interval);
        self
    }

    /// Set the regeneration throttle floor
    pub fn min_refresh_interval(mut self, interval: Duration) -> Self {
        self.min_refresh_interval = Some(interval);
        self
    }

    /// Set the idle multiple of the TTL
    pub fn idle_ttl_multiple(mut self, multiple: u32) -> Self {
        self.idle_ttl_multiple = Some(multiple);
        self
    }

    /// Set TTL jitter factor (0.0 - 1.0)
    pub fn ttl_jitter(mut self, jitter: f64) -> Self {
        self.ttl_jitter = Some(jitter);
        self
    }

    /// Build the refresh configuration
    pub fn build(self) -> RefreshConfig {
        let defaults = RefreshConfig::default();

        RefreshConfig {
            ttl: self.ttl.unwrap_or(defaults.ttl),
            refresh_interval: self.refresh_interval.or(defaults.refresh_interval),
            min_refresh_interval: self
                .min_refresh_interval
                .unwrap_or(defaults.min_refresh_interval),
            idle_ttl_multiple: self
                .idle_ttl_multiple
                .unwrap_or(defaults.idle_ttl_multiple),
            ttl_jitter: self.ttl_jitter.unwrap_or(defaults.ttl_jitter),
        }
    }
}

/// Preset refresh policies for common use cases
impl RefreshConfig {
    /// Short-lived data: 1 minute TTL, refresh after 30 seconds
    pub fn realtime() -> Self {
        Self {
            ttl: Duration::from_secs(60),
            refresh_interval: Some(Duration::from_secs(30)),
            ttl_jitter: 0.10,
            ..Default::default()
        }
    }

    /// Slowly changing data: 1 hour TTL, refresh after 50 minutes
    pub fn hourly() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
            refresh_interval: Some(Duration::from_secs(50 * 60)),
            ttl_jitter: 0.05,
            ..Default::default()
        }
    }
}

/// Configuration for the keep-warm center
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CenterConfig {
    /// How often the daemon walks all live entries
    pub scan_interval: Duration,

    /// How often the daemon asks every registry to recycle idle entries.
    /// `None` leaves recycling to the registry owners
    pub recycle_interval: Option<Duration>,
}

impl Default for CenterConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(1),
            recycle_interval: None,
        }
    }
}

impl CenterConfig {
    /// Create a new builder for center configuration
    pub fn builder() -> CenterConfigBuilder {
        CenterConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.scan_interval.is_zero() {
            return Err(CacheError::ConfigError(
                "scan_interval must be greater than 0".to_string(),
            ));
        }

        if matches!(self.recycle_interval, Some(interval) if interval.is_zero()) {
            return Err(CacheError::ConfigError(
                "recycle_interval must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Load the center configuration from `HORIZON_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let config = Self {
            scan_interval: read_millis(&lookup, "HORIZON_SCAN_INTERVAL_MS")?
                .unwrap_or(defaults.scan_interval),
            recycle_interval: read_millis(&lookup, "HORIZON_RECYCLE_INTERVAL_MS")?,
        };
        config.validate()?;
        Ok(config)
    }
}

/// Builder for center configuration
#[derive(Debug, Default)]
pub struct CenterConfigBuilder {
    scan_interval: Option<Duration>,
    recycle_interval: Option<Duration>,
}

impl CenterConfigBuilder {
    /// Set the keep-warm scan interval
    pub fn scan_interval(mut self, interval: Duration) -> Self {
        self.scan_interval = Some(interval);
        self
    }

    /// Enable periodic registry recycling
    pub fn recycle_interval(mut self, interval: Duration) -> Self {
        self.recycle_interval = Some(interval);
        self
    }

    /// Build the center configuration
    pub fn build(self) -> CenterConfig {
        let defaults = CenterConfig::default();

        CenterConfig {
            scan_interval: self.scan_interval.unwrap_or(defaults.scan_interval),
            recycle_interval: self.recycle_interval.or(defaults.recycle_interval),
        }
    }
}

fn read_parsed<F, V>(lookup: &F, name: &str) -> Result<Option<V>>
where
    F: Fn(&str) -> Option<String>,
    V: std::str::FromStr,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<V>()
            .map(Some)
            .map_err(|_| CacheError::ConfigError(format!("{} has invalid value {:?}", name, raw))),
    }
}

fn read_millis<F>(lookup: &F, name: &str) -> Result<Option<Duration>>
where
    F: Fn(&str) -> Option<String>,
{
    Ok(read_parsed::<F, u64>(lookup, name)?.map(Duration::from_millis))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = RefreshConfig::default();
        assert_eq!(config.ttl, Duration::from_secs(60));
        assert_eq!(config.min_refresh_interval, Duration::from_millis(10));
        assert_eq!(config.idle_ttl_multiple, 4);
        assert_eq!(config.effective_refresh_interval(), config.ttl);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut invalid_config = RefreshConfig::default();
        invalid_config.ttl = Duration::ZERO;
        assert!(invalid_config.validate().is_err());

        let invalid_config = RefreshConfig::builder()
            .ttl(Duration::from_secs(1))
            .refresh_interval(Duration::from_secs(2))
            .build();
        assert!(invalid_config.validate().is_err());

        let mut invalid_config = RefreshConfig::default();
        invalid_config.ttl_jitter = 1.5;
        assert!(invalid_config.validate().is_err());

        let mut invalid_config = RefreshConfig::default();
        invalid_config.idle_ttl_multiple = 0;
        assert!(invalid_config.validate().is_err());
    }

    #[test]
    fn test_config_builder() {
        let config = RefreshConfig::builder()
            .ttl(Duration::from_millis(1000))
            .refresh_interval(Duration::from_millis(100))
            .min_refresh_interval(Duration::from_millis(5))
            .build();

        assert_eq!(config.ttl, Duration::from_millis(1000));
        assert_eq!(config.effective_refresh_interval(), Duration::from_millis(100));
        assert_eq!(config.min_refresh_interval, Duration::from_millis(5));
        assert_eq!(config.idle_after(), Duration::from_millis(4000));
    }

    #[test]
    fn test_ttl_with_jitter_only_shortens() {
        let config = RefreshConfig {
            ttl: Duration::from_secs(100),
            ttl_jitter: 0.2,
            ..Default::default()
        };

        for _ in 0..100 {
            let ttl = config.ttl_with_jitter();
            assert!(ttl <= Duration::from_secs(100));
            assert!(ttl >= Duration::from_secs(80));
        }
    }

    #[test]
    fn test_preset_configs() {
        assert!(RefreshConfig::realtime().validate().is_ok());
        assert!(RefreshConfig::hourly().validate().is_ok());
        assert_eq!(
            RefreshConfig::hourly().effective_refresh_interval(),
            Duration::from_secs(3000)
        );
    }

    #[test]
    fn test_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("HORIZON_TTL_MS", "1000"),
            ("HORIZON_REFRESH_INTERVAL_MS", "100"),
            ("HORIZON_IDLE_TTL_MULTIPLE", "2"),
        ]
        .into_iter()
        .collect();

        let config =
            RefreshConfig::from_lookup(|name| vars.get(name).map(|v| v.to_string())).unwrap();
        assert_eq!(config.ttl, Duration::from_millis(1000));
        assert_eq!(config.refresh_interval, Some(Duration::from_millis(100)));
        assert_eq!(config.idle_ttl_multiple, 2);
        assert_eq!(config.min_refresh_interval, DEFAULT_MIN_REFRESH_INTERVAL);
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let result = RefreshConfig::from_lookup(|name| {
            (name == "HORIZON_TTL_MS").then(|| "soon".to_string())
        });
        assert!(matches!(result, Err(CacheError::ConfigError(_))));
    }

    #[test]
    fn test_center_config() {
        let config = CenterConfig::default();
        assert_eq!(config.scan_interval, Duration::from_secs(1));
        assert!(config.recycle_interval.is_none());

        let config = CenterConfig::builder()
            .scan_interval(Duration::from_millis(50))
            .recycle_interval(Duration::from_secs(5))
            .build();
        assert!(config.validate().is_ok());
        assert_eq!(config.recycle_interval, Some(Duration::from_secs(5)));

        let config = CenterConfig::from_lookup(|name| {
            (name == "HORIZON_SCAN_INTERVAL_MS").then(|| "0".to_string())
        });
        assert!(config.is_err());
    }
}
