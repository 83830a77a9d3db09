//! Error types for cache operations
//!
//! This module defines the error type shared by entries, registries and the
//! keep-warm center. Only the synchronous refresh path and the serialization
//! path ever surface errors to callers; background refresh failures are logged.

use thiserror::Error;

/// Main error type for cache operations
#[derive(Error, Debug)]
pub enum CacheError {
    /// The regeneration callback returned an error and no acceptable data exists
    #[error("Regeneration failed: {0}")]
    RegenerationFailed(#[source] anyhow::Error),

    /// A regeneration attempt was refused by the minimum refresh interval and
    /// there is no data to fall back on
    #[error("Refresh throttled: no data available, retry after {retry_after_ms}ms")]
    Throttled { retry_after_ms: u64 },

    /// Key cannot be used on the export/import path
    #[error("Unsupported key type: {0}")]
    UnsupportedKeyType(String),

    /// Serialization/Deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Generic error with context
    #[error("Error: {0}")]
    Other(String),
}

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

impl From<String> for CacheError {
    fn from(s: String) -> Self {
        CacheError::Other(s)
    }
}

impl From<&str> for CacheError {
    fn from(s: &str) -> Self {
        CacheError::Other(s.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        CacheError::SerializationError(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_error_display() {
        let error = CacheError::ConfigError("ttl must be greater than 0".to_string());
        assert_eq!(
            error.to_string(),
            "Configuration error: ttl must be greater than 0"
        );

        let throttled = CacheError::Throttled { retry_after_ms: 7 };
        assert!(throttled.to_string().contains("retry after 7ms"));

        let key_error = CacheError::UnsupportedKeyType("array".to_string());
        assert!(key_error.to_string().contains("array"));
    }

    #[test]
    fn test_regeneration_error_keeps_source() {
        let error = CacheError::RegenerationFailed(anyhow::anyhow!("upstream timeout"));
        assert!(error.to_string().contains("upstream timeout"));
        assert!(error.source().is_some());
    }

    #[test]
    fn test_error_conversion() {
        let error: CacheError = "test error".into();
        assert!(matches!(error, CacheError::Other(_)));

        let error: CacheError = "test error".to_string().into();
        assert!(matches!(error, CacheError::Other(_)));

        let json_error = serde_json::from_str::<u32>("nope").unwrap_err();
        let error: CacheError = json_error.into();
        assert!(matches!(error, CacheError::SerializationError(_)));
    }
}
