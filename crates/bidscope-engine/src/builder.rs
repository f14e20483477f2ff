//! Builder pattern for the analytics engine.

use std::sync::Arc;

use tokio::sync::broadcast;

use bidscope_traits::{AnalyticsConfig, BidEvent, BidLedger, Clock, SystemClock};

use crate::cache::AggregationCache;
use crate::error::EngineError;
use crate::AnalyticsEngine;

/// Builder for constructing an [`AnalyticsEngine`].
pub struct AnalyticsEngineBuilder {
    config: Option<AnalyticsConfig>,
    ledger: Option<Arc<dyn BidLedger>>,
    cache: Option<Arc<AggregationCache>>,
    clock: Option<Arc<dyn Clock>>,
    events: Option<broadcast::Receiver<BidEvent>>,
}

impl AnalyticsEngineBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            config: None,
            ledger: None,
            cache: None,
            clock: None,
            events: None,
        }
    }

    /// Set the engine configuration.
    pub fn with_config(mut self, config: AnalyticsConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the bid ledger.
    pub fn with_ledger(mut self, ledger: Arc<dyn BidLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Share an existing cache instead of creating one from the config.
    pub fn with_cache(mut self, cache: Arc<AggregationCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Set the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Subscribe the engine to ledger events. Consumed by [`AnalyticsEngine::start`].
    pub fn with_events(mut self, events: broadcast::Receiver<BidEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Build the analytics engine.
    pub fn build(self) -> Result<AnalyticsEngine, EngineError> {
        let config = self.config.unwrap_or_default();
        config
            .validate()
            .map_err(|e| EngineError::ConfigError(e.to_string()))?;

        let ledger = self
            .ledger
            .ok_or_else(|| EngineError::ConfigError("ledger not configured".into()))?;

        let cache = self.cache.unwrap_or_else(|| {
            Arc::new(AggregationCache::new(
                config.cache_ttl(),
                config.max_cache_entries,
            ))
        });

        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>);

        Ok(AnalyticsEngine::new(config, ledger, cache, clock, self.events))
    }
}

impl Default for AnalyticsEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
