//! Analytics query facade.
//!
//! The `AnalyticsEngine` is the main entry point for the bidscope-engine
//! crate. It orchestrates all components:
//!
//! - Parameter validation and default resolution
//! - Cache lookup with single-flight computation
//! - Bounded ledger scans under a deadline
//! - Dispatch to the aggregators
//! - Background expiry sweeps and event-driven invalidation
//!
//! # Example
//!
//! ```rust,ignore
//! use bidscope_engine::AnalyticsEngineBuilder;
//!
//! let engine = AnalyticsEngineBuilder::new()
//!     .with_ledger(ledger)
//!     .build()?;
//!
//! engine.start();
//!
//! let volume = engine.get_bid_volume("C1", Some(6), None).await?;
//!
//! engine.shutdown().await;
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use bidscope_traits::{
    AnalyticsConfig, BidEvent, BidLedger, Clock, CompanyId, LedgerScan, ProjectType,
};

use crate::aggregators;
use crate::bucketing::{BucketAxis, Granularity};
use crate::cache::{AggregationCache, CacheKey, CacheStats};
use crate::error::{EngineError, EngineResult};
use crate::listener::InvalidationListener;
use crate::result::{MetricKind, MetricPayload, MetricResult, QueryWindow, TrendDimension};

// =============================================================================
// QUERY PARAMETERS
// =============================================================================

/// Raw, unvalidated query parameters as received from an adapter.
#[derive(Debug, Clone, Default)]
pub struct QueryParams {
    /// Company identifier (required for company-scoped metrics)
    pub company_id: Option<String>,
    /// Window length in months
    pub window_months: Option<i64>,
    /// Bucket width / timeframe name
    pub granularity: Option<String>,
    /// Project-type label (`all` = unfiltered)
    pub project_type: Option<String>,
    /// Deadline for this call, overriding the configured one
    pub timeout: Option<Duration>,
}

impl QueryParams {
    /// Parameters for a company-scoped query.
    pub fn company(company_id: impl Into<String>) -> Self {
        Self {
            company_id: Some(company_id.into()),
            ..Default::default()
        }
    }

    /// Set the window length.
    pub fn window(mut self, months: i64) -> Self {
        self.window_months = Some(months);
        self
    }

    /// Set the bucket width.
    pub fn granularity(mut self, granularity: impl Into<String>) -> Self {
        self.granularity = Some(granularity.into());
        self
    }

    /// Set the project-type filter.
    pub fn project_type(mut self, project_type: impl Into<String>) -> Self {
        self.project_type = Some(project_type.into());
        self
    }

    /// Set the deadline.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A validated query.
#[derive(Debug, Clone)]
struct QueryPlan {
    metric: MetricKind,
    company_id: Option<CompanyId>,
    window_months: Option<u32>,
    granularity: Option<Granularity>,
    project_type: Option<ProjectType>,
}

impl QueryPlan {
    fn cache_key(&self) -> CacheKey {
        let key = match self.company_id {
            Some(ref company) => CacheKey::company(company.clone(), self.metric),
            None => CacheKey::all_companies(self.metric),
        };
        let key = match (self.window_months, self.granularity) {
            (Some(months), Some(granularity)) => key.with_window(months, granularity),
            _ => key,
        };
        key.with_project_type(self.project_type.clone())
    }
}

// =============================================================================
// ENGINE
// =============================================================================

/// Bid analytics engine.
pub struct AnalyticsEngine {
    config: AnalyticsConfig,
    ledger: Arc<dyn BidLedger>,
    cache: Arc<AggregationCache>,
    clock: Arc<dyn Clock>,
    events: Mutex<Option<broadcast::Receiver<BidEvent>>>,
    shutdown_tx: broadcast::Sender<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shutting_down: AtomicBool,
}

impl AnalyticsEngine {
    /// Creates a new engine. Prefer [`AnalyticsEngineBuilder`](crate::AnalyticsEngineBuilder).
    pub fn new(
        config: AnalyticsConfig,
        ledger: Arc<dyn BidLedger>,
        cache: Arc<AggregationCache>,
        clock: Arc<dyn Clock>,
        events: Option<broadcast::Receiver<BidEvent>>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            ledger,
            cache,
            clock,
            events: Mutex::new(events),
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Engine configuration.
    pub fn config(&self) -> &AnalyticsConfig {
        &self.config
    }

    /// The shared aggregation cache.
    pub fn cache(&self) -> &Arc<AggregationCache> {
        &self.cache
    }

    /// Cache counters.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Start background tasks: the expiry sweeper and, when an event
    /// receiver was supplied, the invalidation listener.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        info!("Starting analytics engine: {}", self.config.name);
        let mut tasks = self.tasks.lock();

        if let Some(period) = self.config.sweep_interval() {
            let cache = self.cache.clone();
            let mut shutdown_rx = self.shutdown_tx.subscribe();
            tasks.push(tokio::spawn(async move {
                let mut ticker = interval(period);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            let removed = cache.purge_expired();
                            if removed > 0 {
                                debug!("Swept {} expired cache entries", removed);
                            }
                        }
                        _ = shutdown_rx.recv() => {
                            debug!("Cache sweeper shutting down");
                            break;
                        }
                    }
                }
            }));
        }

        if let Some(events) = self.events.lock().take() {
            let mut listener = InvalidationListener::new(
                self.cache.clone(),
                events,
                self.shutdown_tx.subscribe(),
            );
            tasks.push(tokio::spawn(async move { listener.run().await }));
        }

        info!("Analytics engine started");
    }

    /// Stop background tasks and drop all cached results.
    pub async fn shutdown(&self) {
        info!("Shutting down analytics engine");
        self.shutting_down.store(true, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(());

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Background task ended abnormally: {}", e);
            }
        }
        self.cache.clear();
        info!("Analytics engine stopped");
    }

    /// Apply a ledger event directly (for callers without a channel).
    pub fn on_bid_event(&self, event: &BidEvent) {
        debug!(company = %event.company_id(), bid = %event.bid_id(), "bid event");
        self.invalidate(event.company_id());
    }

    /// Drop every cached result derived from `company_id`'s bids.
    pub fn invalidate(&self, company_id: &CompanyId) {
        self.cache.invalidate(company_id);
    }

    // =========================================================================
    // OPERATIONS
    // =========================================================================

    /// Success rate per bucket over the last `window_months` months.
    pub async fn get_bid_success_rate(
        &self,
        company_id: &str,
        window_months: Option<i64>,
        granularity: Option<&str>,
    ) -> EngineResult<Arc<MetricResult>> {
        let params = QueryParams {
            window_months,
            granularity: granularity.map(str::to_string),
            ..QueryParams::company(company_id)
        };
        self.query(MetricKind::SuccessRate, params).await
    }

    /// Bid volume per bucket over the last `window_months` months.
    pub async fn get_bid_volume(
        &self,
        company_id: &str,
        window_months: Option<i64>,
        granularity: Option<&str>,
    ) -> EngineResult<Arc<MetricResult>> {
        let params = QueryParams {
            window_months,
            granularity: granularity.map(str::to_string),
            ..QueryParams::company(company_id)
        };
        self.query(MetricKind::Volume, params).await
    }

    /// Status distribution over the company's full history.
    pub async fn get_bid_distribution(&self, company_id: &str) -> EngineResult<Arc<MetricResult>> {
        self.query(MetricKind::Distribution, QueryParams::company(company_id))
            .await
    }

    /// Overall statistics over the company's full history.
    pub async fn get_bid_statistics(&self, company_id: &str) -> EngineResult<Arc<MetricResult>> {
        self.query(MetricKind::Statistics, QueryParams::company(company_id))
            .await
    }

    /// Performance metrics over the company's full history.
    pub async fn get_performance_metrics(
        &self,
        company_id: &str,
    ) -> EngineResult<Arc<MetricResult>> {
        self.query(MetricKind::Performance, QueryParams::company(company_id))
            .await
    }

    /// Per-group volume and success-rate trends at `timeframe` granularity.
    pub async fn get_bid_trends(
        &self,
        company_id: &str,
        timeframe: Option<&str>,
        group_by: Option<&str>,
    ) -> EngineResult<Arc<MetricResult>> {
        let dimension = match group_by {
            Some(raw) => raw.parse::<TrendDimension>()?,
            None => TrendDimension::default(),
        };
        let params = QueryParams {
            granularity: timeframe.map(str::to_string),
            ..QueryParams::company(company_id)
        };
        self.query(dimension.metric(), params).await
    }

    /// Response-time summary of a project type across all companies.
    pub async fn get_project_timelines(
        &self,
        project_type: Option<&str>,
    ) -> EngineResult<Arc<MetricResult>> {
        let params = QueryParams {
            project_type: project_type.map(str::to_string),
            ..Default::default()
        };
        self.query(MetricKind::Timelines, params).await
    }

    /// Validate, then answer from the cache or compute under the deadline.
    pub async fn query(
        &self,
        metric: MetricKind,
        params: QueryParams,
    ) -> EngineResult<Arc<MetricResult>> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(EngineError::Shutdown);
        }

        let plan = self.resolve(metric, &params)?;
        let key = plan.cache_key();
        let lookup = self.cache.get_or_compute(&key, || self.compute(&plan));

        let outcome = match params.timeout.or_else(|| self.config.query_timeout()) {
            Some(deadline) => match tokio::time::timeout(deadline, lookup).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(metric = %metric, "query exceeded its deadline of {:?}", deadline);
                    Err(EngineError::DeadlineExceeded(deadline.as_millis() as u64))
                }
            },
            None => lookup.await,
        };

        if let Err(EngineError::Internal(ref msg)) = outcome {
            error!(metric = %metric, "aggregation failed: {}", msg);
        }
        outcome
    }

    // =========================================================================
    // INTERNALS
    // =========================================================================

    fn resolve(&self, metric: MetricKind, params: &QueryParams) -> EngineResult<QueryPlan> {
        let company_id = if metric.is_company_scoped() {
            let raw = params.company_id.as_deref().map(str::trim).unwrap_or("");
            if raw.is_empty() {
                return Err(EngineError::InvalidArgument("company id is required".into()));
            }
            Some(CompanyId::new(raw))
        } else {
            None
        };

        let (window_months, granularity) = if metric.is_windowed() {
            let granularity = match params.granularity.as_deref() {
                Some(raw) => raw.parse::<Granularity>()?,
                None => Granularity::Month,
            };
            let default_window = match metric {
                MetricKind::TrendsByProjectType | MetricKind::TrendsByAmountBand => {
                    granularity.default_trend_window_months()
                }
                _ => self.config.default_window_months,
            };
            let months = self.validate_window(params.window_months, default_window)?;
            (Some(months), Some(granularity))
        } else {
            (None, None)
        };

        let project_type = match params.project_type.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) if raw.eq_ignore_ascii_case("all") => None,
            Some(raw) => {
                if !matches!(
                    metric,
                    MetricKind::SuccessRate | MetricKind::Volume | MetricKind::Timelines
                ) {
                    return Err(EngineError::InvalidArgument(format!(
                        "{} does not accept a project type filter",
                        metric
                    )));
                }
                Some(ProjectType::parse(raw)?)
            }
        };

        Ok(QueryPlan {
            metric,
            company_id,
            window_months,
            granularity,
            project_type,
        })
    }

    fn validate_window(&self, requested: Option<i64>, default: u32) -> EngineResult<u32> {
        let max = self.config.max_window_months;
        match requested {
            None => Ok(default.min(max)),
            Some(m) if m >= 1 && m <= i64::from(max) => Ok(m as u32),
            Some(m) => Err(EngineError::InvalidArgument(format!(
                "window must be between 1 and {} months, got {}",
                max, m
            ))),
        }
    }

    async fn compute(&self, plan: &QueryPlan) -> EngineResult<MetricResult> {
        if let Some(ref company) = plan.company_id {
            if !self.ledger.company_exists(company).await? {
                return Err(EngineError::NotFound(format!("company {}", company)));
            }
        }
        if let Some(ref project_type) = plan.project_type {
            let known = self.ledger.project_types().await?;
            if !known.contains(project_type) {
                return Err(EngineError::NotFound(format!("project type {}", project_type)));
            }
        }

        let now = self.clock.now();
        let axis = match (plan.window_months, plan.granularity) {
            (Some(months), Some(granularity)) => Some(BucketAxis::new(now, months, granularity)),
            _ => None,
        };

        let scan = LedgerScan {
            company_id: plan.company_id.clone(),
            since: axis.as_ref().map(|a| a.since),
            project_type: plan.project_type.clone(),
        };
        let mut bids = self.ledger.scan(&scan).await?;
        aggregators::verify_scan(&bids, &scan)?;
        aggregators::sort_deterministic(&mut bids);
        debug!(
            metric = %plan.metric,
            company = ?plan.company_id,
            bids = bids.len(),
            "scanned ledger"
        );

        let payload = match (plan.metric, axis.as_ref()) {
            (MetricKind::Volume, Some(axis)) => MetricPayload::Volume(aggregators::volume(&bids, axis)?),
            (MetricKind::SuccessRate, Some(axis)) => {
                MetricPayload::SuccessRate(aggregators::success_rate(&bids, axis)?)
            }
            (MetricKind::TrendsByProjectType, Some(axis)) => MetricPayload::Trends(
                aggregators::trends(&bids, axis, TrendDimension::ProjectType)?,
            ),
            (MetricKind::TrendsByAmountBand, Some(axis)) => MetricPayload::Trends(
                aggregators::trends(&bids, axis, TrendDimension::AmountBand)?,
            ),
            (MetricKind::Distribution, None) => {
                MetricPayload::Distribution(aggregators::distribution(&bids)?)
            }
            (MetricKind::Statistics, None) => {
                MetricPayload::Statistics(aggregators::statistics(&bids, now)?)
            }
            (MetricKind::Performance, None) => MetricPayload::Performance(
                aggregators::performance(&bids, now, self.config.performance_trend_months)?,
            ),
            (MetricKind::Timelines, None) => MetricPayload::Timeline(aggregators::timeline(&bids)?),
            (metric, _) => {
                return Err(EngineError::Internal(format!(
                    "no aggregation plan for {}",
                    metric
                )))
            }
        };

        Ok(MetricResult {
            company_id: plan.company_id.clone(),
            metric: plan.metric,
            window: axis.as_ref().zip(plan.window_months).map(|(a, months)| QueryWindow {
                months,
                since: a.since,
                until: a.until,
            }),
            granularity: plan.granularity,
            project_type: plan.project_type.clone(),
            payload,
            computed_at: now,
        })
    }
}
