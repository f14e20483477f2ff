//! Metric result envelope and payload shapes.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use bidscope_traits::{BidStatus, CompanyId, ProjectType};

use crate::bucketing::Granularity;
use crate::error::EngineError;

// =============================================================================
// METRIC KINDS
// =============================================================================

/// The fixed set of aggregation shapes the engine answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Won / (won + lost) per bucket
    SuccessRate,
    /// Bids submitted per bucket
    Volume,
    /// Status snapshot over full history
    Distribution,
    /// Overall statistics over full history
    Statistics,
    /// Response time, win-rate slope and value-weighted win rate
    Performance,
    /// Per-project-type volume and success rate series
    TrendsByProjectType,
    /// Per-amount-band volume and success rate series
    TrendsByAmountBand,
    /// Response-time summary for a project type
    Timelines,
}

impl MetricKind {
    /// Whether the metric is computed over a bucketed window.
    pub fn is_windowed(&self) -> bool {
        matches!(
            self,
            MetricKind::SuccessRate
                | MetricKind::Volume
                | MetricKind::TrendsByProjectType
                | MetricKind::TrendsByAmountBand
        )
    }

    /// Whether the metric is scoped to one company.
    pub fn is_company_scoped(&self) -> bool {
        !matches!(self, MetricKind::Timelines)
    }

    /// Snake-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::SuccessRate => "success_rate",
            MetricKind::Volume => "volume",
            MetricKind::Distribution => "distribution",
            MetricKind::Statistics => "statistics",
            MetricKind::Performance => "performance",
            MetricKind::TrendsByProjectType => "trends_by_project_type",
            MetricKind::TrendsByAmountBand => "trends_by_amount_band",
            MetricKind::Timelines => "timelines",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Grouping used by trend queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDimension {
    /// Group by the bid's project type
    #[default]
    ProjectType,
    /// Group by bid amount band
    AmountBand,
}

impl TrendDimension {
    /// Metric computed for this grouping.
    pub fn metric(&self) -> MetricKind {
        match self {
            TrendDimension::ProjectType => MetricKind::TrendsByProjectType,
            TrendDimension::AmountBand => MetricKind::TrendsByAmountBand,
        }
    }
}

impl FromStr for TrendDimension {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "project_type" | "type" => Ok(TrendDimension::ProjectType),
            "amount_band" | "amount" => Ok(TrendDimension::AmountBand),
            other => Err(EngineError::InvalidArgument(format!(
                "unsupported trend grouping '{}' (expected project_type or amount_band)",
                other
            ))),
        }
    }
}

/// Bid amount bands used by amount-band trends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmountBand {
    /// Below 10K
    Small,
    /// 10K up to 50K
    Medium,
    /// 50K up to 100K
    Large,
    /// 100K and above
    VeryLarge,
}

impl AmountBand {
    /// All bands, smallest first.
    pub const ALL: [AmountBand; 4] = [
        AmountBand::Small,
        AmountBand::Medium,
        AmountBand::Large,
        AmountBand::VeryLarge,
    ];

    /// Band of an amount.
    pub fn of(amount: Decimal) -> AmountBand {
        if amount < Decimal::from(10_000) {
            AmountBand::Small
        } else if amount < Decimal::from(50_000) {
            AmountBand::Medium
        } else if amount < Decimal::from(100_000) {
            AmountBand::Large
        } else {
            AmountBand::VeryLarge
        }
    }

    /// Snake-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            AmountBand::Small => "small",
            AmountBand::Medium => "medium",
            AmountBand::Large => "large",
            AmountBand::VeryLarge => "very_large",
        }
    }
}

// =============================================================================
// PAYLOADS
// =============================================================================

/// One point of a time series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint<T> {
    /// Canonical bucket label
    pub bucket: String,
    /// Bucket start instant
    pub start: DateTime<Utc>,
    /// Aggregated value
    pub value: T,
}

/// Bid counts per bucket.
pub type VolumeSeries = Vec<SeriesPoint<u64>>;

/// Success rate per bucket; `None` means no decided bids in the bucket.
pub type RateSeries = Vec<SeriesPoint<Option<f64>>>;

/// Status counts over a company's full history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusDistribution {
    /// Total bids
    pub total: u64,
    /// Count per status, every status present
    pub counts: BTreeMap<BidStatus, u64>,
}

/// Current vs previous calendar month.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodComparison {
    /// Current month label
    pub current_period: String,
    /// Previous month label
    pub previous_period: String,
    /// Bids submitted in the current month
    pub current_volume: u64,
    /// Bids submitted in the previous month
    pub previous_volume: u64,
    /// Percent change in volume, `None` when the previous month is empty
    pub volume_change_pct: Option<f64>,
    /// Win rate of bids submitted in the current month
    pub current_win_rate: Option<f64>,
    /// Win rate of bids submitted in the previous month
    pub previous_win_rate: Option<f64>,
    /// Difference of the two win rates, when both exist
    pub win_rate_change: Option<f64>,
    /// Mean amount of bids submitted in the current month
    pub current_avg_amount: Option<Decimal>,
    /// Mean amount of bids submitted in the previous month
    pub previous_avg_amount: Option<Decimal>,
    /// Percent change in mean amount, `None` when the previous month is empty
    pub avg_amount_change_pct: Option<f64>,
    /// Bids submitted in the current month that are still open
    pub current_active: u64,
    /// Bids submitted in the previous month that are still open
    pub previous_active: u64,
    /// Percent change in open bids, `None` when the previous month has none
    pub active_change_pct: Option<f64>,
}

/// Overall statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BidStatistics {
    /// Total bids
    pub total_bids: u64,
    /// Won bids
    pub total_won: u64,
    /// Lost bids
    pub total_lost: u64,
    /// Withdrawn bids
    pub total_withdrawn: u64,
    /// Submitted or pending bids
    pub active_bids: u64,
    /// Won / (won + lost)
    pub win_rate: Option<f64>,
    /// Sum of all bid amounts
    pub total_amount: Decimal,
    /// Mean bid amount
    pub avg_amount: Option<Decimal>,
    /// Mean response time of resolved bids, in seconds
    pub avg_response_time_secs: Option<f64>,
    /// Month-over-month comparison
    pub month_over_month: PeriodComparison,
}

/// Performance metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    /// Mean response time of resolved bids, in seconds
    pub avg_response_time_secs: Option<f64>,
    /// Least-squares slope of the monthly success rate, per month
    pub win_rate_trend_slope: Option<f64>,
    /// Σ amount(won) / Σ amount(won + lost)
    pub amount_weighted_win_rate: Option<f64>,
    /// Months covered by the slope
    pub trend_window_months: u32,
}

/// Series of one trend group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryTrend {
    /// Bids of the group inside the window
    pub total_bids: u64,
    /// Mean amount of those bids, `None` for an empty group
    pub avg_amount: Option<Decimal>,
    /// Bids per bucket
    pub volume: VolumeSeries,
    /// Success rate per bucket
    pub success_rate: RateSeries,
}

/// Response-time distribution summary, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseTimeSummary {
    /// Number of resolved bids
    pub samples: u64,
    /// Fastest resolution
    pub min_secs: f64,
    /// Median resolution
    pub median_secs: f64,
    /// 90th percentile
    pub p90_secs: f64,
    /// Slowest resolution
    pub max_secs: f64,
    /// Mean resolution
    pub mean_secs: f64,
}

/// Decision latency of a project category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectTimeline {
    /// Bids of the category
    pub bids_considered: u64,
    /// Summary of resolved bids, `None` when there are none
    pub response_time: Option<ResponseTimeSummary>,
}

/// Metric-specific result body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum MetricPayload {
    /// Volume series
    Volume(VolumeSeries),
    /// Success-rate series
    SuccessRate(RateSeries),
    /// Status distribution
    Distribution(StatusDistribution),
    /// Overall statistics
    Statistics(BidStatistics),
    /// Performance metrics
    Performance(PerformanceMetrics),
    /// Per-group trend series, keyed by group label
    Trends(BTreeMap<String, CategoryTrend>),
    /// Response-time timeline
    Timeline(ProjectTimeline),
}

// =============================================================================
// ENVELOPE
// =============================================================================

/// Resolved time span of a windowed query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryWindow {
    /// Window length in calendar months
    pub months: u32,
    /// First instant covered
    pub since: DateTime<Utc>,
    /// "Now" at computation time
    pub until: DateTime<Utc>,
}

/// Result envelope returned by every query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricResult {
    /// Company, for company-scoped metrics
    pub company_id: Option<CompanyId>,
    /// Metric computed
    pub metric: MetricKind,
    /// Window, for windowed metrics
    pub window: Option<QueryWindow>,
    /// Bucket width, for windowed metrics
    pub granularity: Option<Granularity>,
    /// Project-type filter, if any
    pub project_type: Option<ProjectType>,
    /// Metric body
    pub payload: MetricPayload,
    /// Computation instant
    pub computed_at: DateTime<Utc>,
}

impl MetricResult {
    /// Volume series, if this is a volume result.
    pub fn volume(&self) -> Option<&VolumeSeries> {
        match &self.payload {
            MetricPayload::Volume(s) => Some(s),
            _ => None,
        }
    }

    /// Success-rate series, if this is a success-rate result.
    pub fn success_rate(&self) -> Option<&RateSeries> {
        match &self.payload {
            MetricPayload::SuccessRate(s) => Some(s),
            _ => None,
        }
    }

    /// Distribution, if this is a distribution result.
    pub fn distribution(&self) -> Option<&StatusDistribution> {
        match &self.payload {
            MetricPayload::Distribution(d) => Some(d),
            _ => None,
        }
    }

    /// Statistics, if this is a statistics result.
    pub fn statistics(&self) -> Option<&BidStatistics> {
        match &self.payload {
            MetricPayload::Statistics(s) => Some(s),
            _ => None,
        }
    }

    /// Performance metrics, if this is a performance result.
    pub fn performance(&self) -> Option<&PerformanceMetrics> {
        match &self.payload {
            MetricPayload::Performance(p) => Some(p),
            _ => None,
        }
    }

    /// Trend groups, if this is a trends result.
    pub fn trends(&self) -> Option<&BTreeMap<String, CategoryTrend>> {
        match &self.payload {
            MetricPayload::Trends(t) => Some(t),
            _ => None,
        }
    }

    /// Timeline, if this is a timelines result.
    pub fn timeline(&self) -> Option<&ProjectTimeline> {
        match &self.payload {
            MetricPayload::Timeline(t) => Some(t),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_amount_bands() {
        assert_eq!(AmountBand::of(dec!(9999.99)), AmountBand::Small);
        assert_eq!(AmountBand::of(dec!(10000)), AmountBand::Medium);
        assert_eq!(AmountBand::of(dec!(50000)), AmountBand::Large);
        assert_eq!(AmountBand::of(dec!(100000)), AmountBand::VeryLarge);
    }

    #[test]
    fn test_trend_dimension_parse() {
        assert_eq!(
            "amount_band".parse::<TrendDimension>().unwrap(),
            TrendDimension::AmountBand
        );
        assert!("region".parse::<TrendDimension>().is_err());
    }

    #[test]
    fn test_null_rate_serializes_as_null() {
        let point = SeriesPoint {
            bucket: "2024-01".to_string(),
            start: DateTime::<Utc>::from_timestamp(1_704_067_200, 0).unwrap(),
            value: None::<f64>,
        };
        let json = serde_json::to_value(&point).unwrap();
        assert!(json["value"].is_null());
        assert_eq!(json["bucket"], "2024-01");
    }

    #[test]
    fn test_distribution_keys_are_status_names() {
        let mut counts = BTreeMap::new();
        counts.insert(BidStatus::Won, 2);
        let json = serde_json::to_value(StatusDistribution { total: 2, counts }).unwrap();
        assert_eq!(json["counts"]["WON"], 2);
    }
}
