//! # Bidscope Engine
//!
//! The bid analytics aggregation engine for Bidscope.
//!
//! This crate provides:
//! - [`bucketing`]: Calendar bucketing (month, quarter, year) and window ranges
//! - [`aggregators`]: Volume, success rate, distribution, statistics,
//!   performance, trend and timeline aggregations
//! - [`AggregationCache`]: TTL cache with single-flight computation and
//!   per-company invalidation
//! - [`AnalyticsEngine`]: Query facade orchestrating all components
//!
//! ## Architecture
//!
//! ```text
//! Adapter ─> AnalyticsEngine ─> AggregationCache ─┬─> hit
//!                                                 │
//!                                                 └─> BidLedger scan ─> aggregators
//!
//! BidEvent ─> InvalidationListener ─> AggregationCache
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! let engine = AnalyticsEngineBuilder::new()
//!     .with_ledger(ledger)
//!     .with_events(ledger.subscribe())
//!     .build()?;
//!
//! engine.start();
//! let rates = engine.get_bid_success_rate("C1", Some(6), Some("month")).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod aggregators;
pub mod bucketing;
pub mod builder;
pub mod cache;
pub mod engine;
pub mod error;
pub mod listener;
pub mod result;

// Re-exports
pub use builder::AnalyticsEngineBuilder;
pub use bucketing::{bucket_for, range_of_buckets, window_start, BucketAxis, Granularity, TimeBucket};
pub use cache::{AggregationCache, CacheKey, CacheScope, CacheStats};
pub use engine::{AnalyticsEngine, QueryParams};
pub use error::{EngineError, EngineResult};
pub use listener::InvalidationListener;
pub use result::{
    AmountBand, BidStatistics, CategoryTrend, MetricKind, MetricPayload, MetricResult,
    PerformanceMetrics, PeriodComparison, ProjectTimeline, QueryWindow, RateSeries,
    ResponseTimeSummary, SeriesPoint, StatusDistribution, TrendDimension, VolumeSeries,
};
