//! Engine configuration.
//!
//! Configuration contains:
//! - Cache sizing and freshness
//! - Query window defaults and bounds
//! - Background task intervals
//!
//! Configuration does NOT contain:
//! - Bid data (that's the ledger)
//! - Transport settings (that's the server)

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::TraitError;

/// Configuration for the analytics engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    /// Engine name (for logging)
    pub name: String,
    /// Time-to-live of cached results, in seconds
    pub cache_ttl_seconds: u64,
    /// Maximum number of cached results
    pub max_cache_entries: usize,
    /// Window used when a query does not give one, in months
    pub default_window_months: u32,
    /// Largest window a query may request, in months
    pub max_window_months: u32,
    /// Trailing window for the win-rate trend slope, in months
    pub performance_trend_months: u32,
    /// Per-query deadline, in milliseconds (0 = none)
    pub query_timeout_ms: u64,
    /// Interval between expired-entry sweeps, in seconds (0 = disabled)
    pub sweep_interval_seconds: u64,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            name: "bidscope".to_string(),
            cache_ttl_seconds: 120, // 2 minutes
            max_cache_entries: 10_000,
            default_window_months: 6,
            max_window_months: 60,
            performance_trend_months: 12,
            query_timeout_ms: 5_000,
            sweep_interval_seconds: 30,
        }
    }
}

impl AnalyticsConfig {
    /// Creates a minimal configuration for testing.
    pub fn minimal() -> Self {
        Self {
            name: "bidscope-test".to_string(),
            cache_ttl_seconds: 60,
            max_cache_entries: 100,
            sweep_interval_seconds: 0,
            ..Default::default()
        }
    }

    /// Cache TTL as a duration.
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }

    /// Query deadline, if any.
    pub fn query_timeout(&self) -> Option<Duration> {
        (self.query_timeout_ms > 0).then(|| Duration::from_millis(self.query_timeout_ms))
    }

    /// Sweep interval, if sweeping is enabled.
    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_seconds > 0).then(|| Duration::from_secs(self.sweep_interval_seconds))
    }

    /// Check that the values are usable.
    pub fn validate(&self) -> Result<(), TraitError> {
        if self.max_window_months == 0 {
            return Err(TraitError::InvalidInput("max_window_months must be positive".into()));
        }
        if self.default_window_months == 0 || self.default_window_months > self.max_window_months {
            return Err(TraitError::InvalidInput(format!(
                "default_window_months must be within 1..={}",
                self.max_window_months
            )));
        }
        if self.performance_trend_months == 0
            || self.performance_trend_months > self.max_window_months
        {
            return Err(TraitError::InvalidInput(format!(
                "performance_trend_months must be within 1..={}",
                self.max_window_months
            )));
        }
        if self.max_cache_entries == 0 {
            return Err(TraitError::InvalidInput("max_cache_entries must be positive".into()));
        }
        Ok(())
    }
}
