//! Aggregators.
//!
//! Pure reductions from a bid sequence (and, for time series, a bucket axis)
//! to each metric shape. Inputs are not required to be sorted, but callers
//! should pass them through [`sort_deterministic`] so floating point sums
//! are reproducible.
//!
//! Every aggregator re-checks its own output and reports a violated
//! invariant as [`EngineError::Internal`] instead of returning a bad value.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use bidscope_traits::{Bid, BidStatus, LedgerScan};

use crate::bucketing::{BucketAxis, Granularity};
use crate::error::{EngineError, EngineResult};
use crate::result::{
    AmountBand, BidStatistics, CategoryTrend, PerformanceMetrics, PeriodComparison,
    ProjectTimeline, RateSeries, ResponseTimeSummary, SeriesPoint, StatusDistribution,
    TrendDimension, VolumeSeries,
};

/// Order bids by submission instant, then id.
pub fn sort_deterministic(bids: &mut [Bid]) {
    bids.sort_by(|a, b| {
        a.submitted_at
            .cmp(&b.submitted_at)
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Check that the ledger honoured the scan and returned well-formed bids.
pub fn verify_scan(bids: &[Bid], scan: &LedgerScan) -> EngineResult<()> {
    for bid in bids {
        if !scan.matches(bid) {
            return Err(EngineError::Internal(format!(
                "ledger returned bid {} outside the requested scan",
                bid.id
            )));
        }
        bid.validate()
            .map_err(|e| EngineError::Internal(format!("ledger returned invalid bid: {}", e)))?;
    }
    Ok(())
}

// =============================================================================
// TIME SERIES
// =============================================================================

/// Bids submitted per bucket.
pub fn volume(bids: &[Bid], axis: &BucketAxis) -> EngineResult<VolumeSeries> {
    let mut counts = vec![0u64; axis.len()];
    for bid in bids {
        if let Some(i) = axis.position(bid.submitted_at) {
            counts[i] += 1;
        }
    }
    let series = points(axis, counts);
    check_ordered(&series)?;
    Ok(series)
}

/// Won / (won + lost) per bucket, `None` where no bid was decided.
pub fn success_rate(bids: &[Bid], axis: &BucketAxis) -> EngineResult<RateSeries> {
    let mut tallies = vec![Tally::default(); axis.len()];
    for bid in bids {
        if let Some(i) = axis.position(bid.submitted_at) {
            tallies[i].add(bid);
        }
    }
    let series = points(axis, tallies.iter().map(Tally::rate).collect());
    check_ordered(&series)?;
    check_rates(&series)?;
    Ok(series)
}

/// Volume and success rate per group.
pub fn trends(
    bids: &[Bid],
    axis: &BucketAxis,
    dimension: TrendDimension,
) -> EngineResult<BTreeMap<String, CategoryTrend>> {
    let mut groups: BTreeMap<String, Vec<Bid>> = BTreeMap::new();
    if dimension == TrendDimension::AmountBand {
        for band in AmountBand::ALL {
            groups.insert(band.as_str().to_string(), Vec::new());
        }
    }

    for bid in bids.iter().filter(|b| axis.covers(b.submitted_at)) {
        let key = match dimension {
            TrendDimension::ProjectType => bid.project_type.as_str().to_string(),
            TrendDimension::AmountBand => AmountBand::of(bid.amount).as_str().to_string(),
        };
        groups.entry(key).or_default().push(bid.clone());
    }

    let mut out = BTreeMap::new();
    for (key, group) in groups {
        let trend = CategoryTrend {
            total_bids: group.len() as u64,
            avg_amount: mean_amount(&group),
            volume: volume(&group, axis)?,
            success_rate: success_rate(&group, axis)?,
        };
        out.insert(key, trend);
    }

    let grouped: u64 = out.values().map(|t| t.total_bids).sum();
    let in_window = bids.iter().filter(|b| axis.covers(b.submitted_at)).count() as u64;
    if grouped != in_window {
        return Err(EngineError::Internal(format!(
            "trend groups hold {} bids, window holds {}",
            grouped, in_window
        )));
    }
    Ok(out)
}

// =============================================================================
// SNAPSHOTS
// =============================================================================

/// Count per status over all bids.
pub fn distribution(bids: &[Bid]) -> EngineResult<StatusDistribution> {
    let mut counts: BTreeMap<BidStatus, u64> =
        BidStatus::ALL.iter().map(|s| (*s, 0)).collect();
    for bid in bids {
        *counts.entry(bid.status).or_insert(0) += 1;
    }

    let total = bids.len() as u64;
    let sum: u64 = counts.values().sum();
    if sum != total {
        return Err(EngineError::Internal(format!(
            "distribution counts sum to {} but {} bids were scanned",
            sum, total
        )));
    }
    Ok(StatusDistribution { total, counts })
}

/// Overall statistics over all bids.
pub fn statistics(bids: &[Bid], now: DateTime<Utc>) -> EngineResult<BidStatistics> {
    let mut tally = Tally::default();
    let mut withdrawn = 0u64;
    let mut active = 0u64;
    let mut total_amount = Decimal::ZERO;

    for bid in bids {
        tally.add(bid);
        total_amount += bid.amount;
        match bid.status {
            BidStatus::Withdrawn => withdrawn += 1,
            s if s.is_active() => active += 1,
            _ => {}
        }
    }

    let total_bids = bids.len() as u64;
    let avg_amount = mean_amount(bids);
    let win_rate = tally.rate();
    check_rate(win_rate)?;

    Ok(BidStatistics {
        total_bids,
        total_won: tally.won,
        total_lost: tally.lost,
        total_withdrawn: withdrawn,
        active_bids: active,
        win_rate,
        total_amount,
        avg_amount,
        avg_response_time_secs: mean_response_secs(bids),
        month_over_month: month_over_month(bids, now)?,
    })
}

/// Response time, win-rate trend slope and value-weighted win rate.
pub fn performance(
    bids: &[Bid],
    now: DateTime<Utc>,
    trend_window_months: u32,
) -> EngineResult<PerformanceMetrics> {
    let axis = BucketAxis::new(now, trend_window_months, Granularity::Month);
    let monthly = success_rate(bids, &axis)?;
    let samples: Vec<(f64, f64)> = monthly
        .iter()
        .enumerate()
        .filter_map(|(i, p)| p.value.map(|rate| (i as f64, rate)))
        .collect();

    let mut won_value = Decimal::ZERO;
    let mut decided_value = Decimal::ZERO;
    for bid in bids.iter().filter(|b| b.status.is_decided()) {
        decided_value += bid.amount;
        if bid.status == BidStatus::Won {
            won_value += bid.amount;
        }
    }
    let amount_weighted_win_rate = if decided_value.is_zero() {
        None
    } else {
        (won_value / decided_value).to_f64()
    };
    check_rate(amount_weighted_win_rate)?;

    Ok(PerformanceMetrics {
        avg_response_time_secs: mean_response_secs(bids),
        win_rate_trend_slope: least_squares_slope(&samples),
        amount_weighted_win_rate,
        trend_window_months,
    })
}

/// Response-time distribution of the resolved bids.
pub fn timeline(bids: &[Bid]) -> EngineResult<ProjectTimeline> {
    let mut secs: Vec<f64> = bids.iter().filter_map(response_secs).collect();
    if secs.iter().any(|s| *s < 0.0 || !s.is_finite()) {
        return Err(EngineError::Internal("negative response time".into()));
    }
    secs.sort_by(f64::total_cmp);

    let response_time = if secs.is_empty() {
        None
    } else {
        let n = secs.len();
        Some(ResponseTimeSummary {
            samples: n as u64,
            min_secs: secs[0],
            median_secs: percentile(&secs, 0.5),
            p90_secs: percentile(&secs, 0.9),
            max_secs: secs[n - 1],
            mean_secs: secs.iter().sum::<f64>() / n as f64,
        })
    };

    Ok(ProjectTimeline {
        bids_considered: bids.len() as u64,
        response_time,
    })
}

// =============================================================================
// HELPERS
// =============================================================================

#[derive(Debug, Clone, Copy, Default)]
struct Tally {
    won: u64,
    lost: u64,
}

impl Tally {
    fn add(&mut self, bid: &Bid) {
        match bid.status {
            BidStatus::Won => self.won += 1,
            BidStatus::Lost => self.lost += 1,
            _ => {}
        }
    }

    fn rate(&self) -> Option<f64> {
        let decided = self.won + self.lost;
        (decided > 0).then(|| self.won as f64 / decided as f64)
    }
}

fn points<T>(axis: &BucketAxis, values: Vec<T>) -> Vec<SeriesPoint<T>> {
    axis.buckets
        .iter()
        .zip(values)
        .map(|(bucket, value)| SeriesPoint {
            bucket: bucket.label(),
            start: bucket.start(),
            value,
        })
        .collect()
}

fn check_ordered<T>(series: &[SeriesPoint<T>]) -> EngineResult<()> {
    for pair in series.windows(2) {
        if pair[0].start >= pair[1].start || pair[0].bucket == pair[1].bucket {
            return Err(EngineError::Internal(format!(
                "series buckets out of order: {} then {}",
                pair[0].bucket, pair[1].bucket
            )));
        }
    }
    Ok(())
}

fn check_rates(series: &RateSeries) -> EngineResult<()> {
    series.iter().try_for_each(|p| check_rate(p.value))
}

fn check_rate(rate: Option<f64>) -> EngineResult<()> {
    match rate {
        Some(r) if !(0.0..=1.0).contains(&r) => {
            Err(EngineError::Internal(format!("rate {} outside [0, 1]", r)))
        }
        _ => Ok(()),
    }
}

fn response_secs(bid: &Bid) -> Option<f64> {
    bid.response_time().map(|d| d.num_milliseconds() as f64 / 1000.0)
}

fn mean_response_secs(bids: &[Bid]) -> Option<f64> {
    let (sum, n) = bids
        .iter()
        .filter_map(response_secs)
        .fold((0.0, 0u64), |(sum, n), s| (sum + s, n + 1));
    (n > 0).then(|| sum / n as f64)
}

/// Linear-interpolated percentile of sorted, non-empty values.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    let rank = p * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
}

fn least_squares_slope(samples: &[(f64, f64)]) -> Option<f64> {
    if samples.len() < 2 {
        return None;
    }
    let n = samples.len() as f64;
    let mean_x = samples.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y = samples.iter().map(|(_, y)| y).sum::<f64>() / n;
    let (num, den) = samples.iter().fold((0.0, 0.0), |(num, den), (x, y)| {
        (num + (x - mean_x) * (y - mean_y), den + (x - mean_x).powi(2))
    });
    (den > 0.0).then(|| num / den)
}

fn pct_change(current: f64, previous: f64) -> Option<f64> {
    (previous != 0.0).then(|| (current - previous) / previous * 100.0)
}

fn mean_amount(bids: &[Bid]) -> Option<Decimal> {
    let total: Decimal = bids.iter().map(|b| b.amount).sum();
    (!bids.is_empty()).then(|| (total / Decimal::from(bids.len() as u64)).round_dp(2))
}

fn month_over_month(bids: &[Bid], now: DateTime<Utc>) -> EngineResult<PeriodComparison> {
    let axis = BucketAxis::new(now, 2, Granularity::Month);
    if axis.len() != 2 {
        return Err(EngineError::Internal(
            "month-over-month axis must have two buckets".into(),
        ));
    }

    let mut periods: [Vec<Bid>; 2] = [Vec::new(), Vec::new()];
    for bid in bids {
        if let Some(i) = axis.position(bid.submitted_at) {
            periods[i].push(bid.clone());
        }
    }
    let (previous, current) = (periods[0].as_slice(), periods[1].as_slice());

    let rate = |period: &[Bid]| {
        let mut tally = Tally::default();
        period.iter().for_each(|b| tally.add(b));
        tally.rate()
    };
    let active = |period: &[Bid]| period.iter().filter(|b| b.status.is_active()).count() as u64;

    let (current_win_rate, previous_win_rate) = (rate(current), rate(previous));
    check_rate(current_win_rate)?;
    check_rate(previous_win_rate)?;
    let win_rate_change = match (current_win_rate, previous_win_rate) {
        (Some(c), Some(p)) => Some(c - p),
        _ => None,
    };

    let (current_avg_amount, previous_avg_amount) = (mean_amount(current), mean_amount(previous));
    let avg_amount_change_pct = match (current_avg_amount, previous_avg_amount) {
        (Some(c), Some(p)) => c.to_f64().zip(p.to_f64()).and_then(|(c, p)| pct_change(c, p)),
        _ => None,
    };

    let (current_active, previous_active) = (active(current), active(previous));

    Ok(PeriodComparison {
        current_period: axis.buckets[1].label(),
        previous_period: axis.buckets[0].label(),
        current_volume: current.len() as u64,
        previous_volume: previous.len() as u64,
        volume_change_pct: pct_change(current.len() as f64, previous.len() as f64),
        current_win_rate,
        previous_win_rate,
        win_rate_change,
        current_avg_amount,
        previous_avg_amount,
        avg_amount_change_pct,
        current_active,
        previous_active,
        active_change_pct: pct_change(current_active as f64, previous_active as f64),
    })
}
