//! Coordinator configuration
//!
//! Everything tunable at startup: dispatch timeout, the read retry
//! budget, the fan-out pool width, and the gate fairness policy.
//! Loadable from TOML with every field defaulted, so an empty document
//! is a valid configuration.

use confsync_concurrency::FairnessPolicy;
use confsync_core::error::{CoordError, CoordResult};
use confsync_dispatch::RetryPolicy;
use serde::Deserialize;
use std::time::Duration;

/// Startup configuration for the transaction coordinator
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoordinatorConfig {
    /// Bounded wait for one dispatch, in milliseconds
    pub dispatch_timeout_ms: u64,
    /// Retry budget for read-only dispatches
    pub retry: RetryPolicy,
    /// Worker threads for the per-controller dispatch fan-out
    pub pool_size: usize,
    /// Writer admission order on controller gates
    pub fairness: FairnessPolicy,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            dispatch_timeout_ms: 5_000,
            retry: RetryPolicy::default(),
            pool_size: 4,
            fairness: FairnessPolicy::default(),
        }
    }
}

impl CoordinatorConfig {
    /// Parse a TOML document; absent fields take their defaults
    ///
    /// # Errors
    /// Returns a `Store` error describing the parse failure.
    pub fn from_toml_str(text: &str) -> CoordResult<Self> {
        toml::from_str(text).map_err(|e| CoordError::store(format!("bad config: {e}")))
    }

    /// The dispatch timeout as a Duration
    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_is_all_defaults() {
        let config = CoordinatorConfig::from_toml_str("").unwrap();
        assert_eq!(config, CoordinatorConfig::default());
    }

    #[test]
    fn test_partial_document_overrides() {
        let config = CoordinatorConfig::from_toml_str(
            r#"
            dispatch_timeout_ms = 250
            pool_size = 8
            fairness = "drain-biased"

            [retry]
            max_retries = 5
            backoff_ms = 10
            "#,
        )
        .unwrap();
        assert_eq!(config.dispatch_timeout(), Duration::from_millis(250));
        assert_eq!(config.pool_size, 8);
        assert_eq!(config.fairness, FairnessPolicy::DrainBiased);
        assert_eq!(config.retry.max_retries, 5);
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(CoordinatorConfig::from_toml_str("shard_count = 3").is_err());
    }
}
