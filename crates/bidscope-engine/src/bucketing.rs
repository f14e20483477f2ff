//! Period bucketing.
//!
//! Maps instants to calendar buckets (month, quarter, year) in UTC and
//! produces the continuous bucket axis of a query window. Every function
//! here is total and pure.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Bucket width selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    /// Calendar month
    Month,
    /// Calendar quarter (Q1 = Jan-Mar)
    Quarter,
    /// Calendar year
    Year,
}

impl Granularity {
    /// Number of calendar months a bucket spans.
    pub fn months(&self) -> u32 {
        match self {
            Granularity::Month => 1,
            Granularity::Quarter => 3,
            Granularity::Year => 12,
        }
    }

    /// Trailing window used for trend queries at this timeframe.
    pub fn default_trend_window_months(&self) -> u32 {
        match self {
            Granularity::Month => 6,
            Granularity::Quarter => 12,
            Granularity::Year => 36,
        }
    }

    /// Lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Month => "month",
            Granularity::Quarter => "quarter",
            Granularity::Year => "year",
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "month" => Ok(Granularity::Month),
            "quarter" => Ok(Granularity::Quarter),
            "year" => Ok(Granularity::Year),
            other => Err(EngineError::InvalidArgument(format!(
                "unsupported granularity '{}' (expected month, quarter or year)",
                other
            ))),
        }
    }
}

/// A half-open calendar interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeBucket {
    granularity: Granularity,
    year: i32,
    /// Month 1-12, quarter 1-4, or 1 for years.
    ordinal: u32,
}

impl TimeBucket {
    /// Bucket width.
    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    /// Calendar year of the bucket start.
    pub fn year(&self) -> i32 {
        self.year
    }

    /// Canonical label: `2024-03`, `2024-Q1` or `2024`.
    pub fn label(&self) -> String {
        match self.granularity {
            Granularity::Month => format!("{:04}-{:02}", self.year, self.ordinal),
            Granularity::Quarter => format!("{:04}-Q{}", self.year, self.ordinal),
            Granularity::Year => format!("{:04}", self.year),
        }
    }

    /// First instant of the bucket.
    pub fn start(&self) -> DateTime<Utc> {
        first_instant(self.month_index())
    }

    /// First instant after the bucket.
    pub fn end(&self) -> DateTime<Utc> {
        first_instant(self.month_index() + i64::from(self.granularity.months()))
    }

    /// Whether `ts` falls inside the bucket.
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        bucket_for(ts, self.granularity) == *self
    }

    /// The bucket immediately after this one.
    pub fn next(&self) -> TimeBucket {
        let per_year = 12 / self.granularity.months();
        if self.ordinal >= per_year {
            TimeBucket {
                granularity: self.granularity,
                year: self.year.saturating_add(1),
                ordinal: 1,
            }
        } else {
            TimeBucket {
                granularity: self.granularity,
                year: self.year,
                ordinal: self.ordinal + 1,
            }
        }
    }

    /// Months since year 0 of the bucket's first month.
    fn month_index(&self) -> i64 {
        let first_month0 = (self.ordinal - 1) * self.granularity.months();
        i64::from(self.year) * 12 + i64::from(first_month0)
    }
}

impl PartialOrd for TimeBucket {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimeBucket {
    fn cmp(&self, other: &Self) -> Ordering {
        self.month_index()
            .cmp(&other.month_index())
            .then(self.granularity.cmp(&other.granularity))
    }
}

impl fmt::Display for TimeBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// Bucket containing `ts` at `granularity`.
pub fn bucket_for(ts: DateTime<Utc>, granularity: Granularity) -> TimeBucket {
    let month = ts.month();
    let ordinal = match granularity {
        Granularity::Month => month,
        Granularity::Quarter => (month - 1) / 3 + 1,
        Granularity::Year => 1,
    };
    TimeBucket {
        granularity,
        year: ts.year(),
        ordinal,
    }
}

/// First instant of the window of `window_months` calendar months ending
/// with the month containing `now`.
///
/// A zero window is treated as one month.
pub fn window_start(now: DateTime<Utc>, window_months: u32) -> DateTime<Utc> {
    let current = i64::from(now.year()) * 12 + i64::from(now.month0());
    let back = i64::from(window_months.max(1) - 1);
    first_instant(current - back)
}

/// Every bucket from the window start to the bucket containing `now`,
/// inclusive and gap-free.
pub fn range_of_buckets(
    now: DateTime<Utc>,
    window_months: u32,
    granularity: Granularity,
) -> Vec<TimeBucket> {
    let last = bucket_for(now, granularity);
    let mut bucket = bucket_for(window_start(now, window_months), granularity);
    let mut buckets = Vec::new();
    while bucket <= last {
        buckets.push(bucket);
        bucket = bucket.next();
    }
    buckets
}

/// The bucket axis of one query window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketAxis {
    /// Buckets, ascending and gap-free
    pub buckets: Vec<TimeBucket>,
    /// First instant of the window
    pub since: DateTime<Utc>,
    /// Last instant of the window (inclusive)
    pub until: DateTime<Utc>,
}

impl BucketAxis {
    /// Axis of `window_months` months ending at `now`.
    pub fn new(now: DateTime<Utc>, window_months: u32, granularity: Granularity) -> Self {
        Self {
            buckets: range_of_buckets(now, window_months, granularity),
            since: window_start(now, window_months),
            until: now,
        }
    }

    /// Whether `ts` lies inside the window.
    pub fn covers(&self, ts: DateTime<Utc>) -> bool {
        self.since <= ts && ts <= self.until
    }

    /// Position of the bucket containing `ts`, if `ts` lies inside the window.
    pub fn position(&self, ts: DateTime<Utc>) -> Option<usize> {
        if !self.covers(ts) {
            return None;
        }
        let first = self.buckets.first()?;
        let bucket = bucket_for(ts, first.granularity());
        self.buckets.binary_search(&bucket).ok()
    }

    /// Number of buckets.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Whether the axis has no buckets.
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

fn first_instant(month_index: i64) -> DateTime<Utc> {
    let year = month_index.div_euclid(12);
    let month0 = month_index.rem_euclid(12) as u32;
    i32::try_from(year)
        .ok()
        .and_then(|y| NaiveDate::from_ymd_opt(y, month0 + 1, 1))
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .unwrap_or(if month_index < 0 {
            DateTime::<Utc>::MIN_UTC
        } else {
            DateTime::<Utc>::MAX_UTC
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn ts(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_labels() {
        let t = ts(2024, 3, 15);
        assert_eq!(bucket_for(t, Granularity::Month).label(), "2024-03");
        assert_eq!(bucket_for(t, Granularity::Quarter).label(), "2024-Q1");
        assert_eq!(bucket_for(t, Granularity::Year).label(), "2024");
        assert_eq!(bucket_for(ts(2024, 10, 1), Granularity::Quarter).label(), "2024-Q4");
    }

    #[test]
    fn test_bucket_bounds() {
        let q = bucket_for(ts(2024, 5, 20), Granularity::Quarter);
        assert_eq!(q.start(), Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap());
        assert_eq!(q.end(), Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap());

        let dec = bucket_for(ts(2023, 12, 31), Granularity::Month);
        assert_eq!(dec.end(), Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(dec.next().label(), "2024-01");
    }

    #[test]
    fn test_half_open_boundary() {
        let midnight = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        assert_eq!(bucket_for(midnight, Granularity::Month).label(), "2024-02");
        let just_before = midnight - chrono::Duration::nanoseconds(1);
        assert_eq!(bucket_for(just_before, Granularity::Month).label(), "2024-01");
    }

    #[test]
    fn test_window_start() {
        let now = ts(2024, 2, 10);
        assert_eq!(
            window_start(now, 2),
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(
            window_start(now, 3),
            Utc.with_ymd_and_hms(2023, 12, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(window_start(now, 0), window_start(now, 1));
    }

    #[test]
    fn test_range_months() {
        let labels: Vec<String> = range_of_buckets(ts(2024, 2, 10), 4, Granularity::Month)
            .iter()
            .map(|b| b.label())
            .collect();
        assert_eq!(labels, vec!["2023-11", "2023-12", "2024-01", "2024-02"]);
    }

    #[test]
    fn test_range_quarters_and_years() {
        let now = ts(2024, 8, 1);
        let quarters: Vec<String> = range_of_buckets(now, 12, Granularity::Quarter)
            .iter()
            .map(|b| b.label())
            .collect();
        assert_eq!(quarters, vec!["2023-Q3", "2023-Q4", "2024-Q1", "2024-Q2", "2024-Q3"]);

        let years: Vec<String> = range_of_buckets(now, 36, Granularity::Year)
            .iter()
            .map(|b| b.label())
            .collect();
        assert_eq!(years, vec!["2021", "2022", "2023", "2024"]);
    }

    #[test]
    fn test_axis_position_respects_window_edges() {
        let now = ts(2024, 2, 10);
        let axis = BucketAxis::new(now, 1, Granularity::Quarter);
        assert_eq!(axis.len(), 1);
        // inside Q1 but before the window start
        assert_eq!(axis.position(ts(2024, 1, 5)), None);
        assert_eq!(axis.position(ts(2024, 2, 5)), Some(0));
        // after now
        assert_eq!(axis.position(ts(2024, 2, 11)), None);
    }

    #[test]
    fn test_granularity_parse() {
        assert_eq!("Quarter".parse::<Granularity>().unwrap(), Granularity::Quarter);
        assert!(matches!(
            "week".parse::<Granularity>(),
            Err(EngineError::InvalidArgument(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_range_is_gap_free_and_covers_window(
            secs in 0i64..4_102_444_800, // 1970..2100
            window in 1u32..=60,
            g in prop_oneof![
                Just(Granularity::Month),
                Just(Granularity::Quarter),
                Just(Granularity::Year)
            ],
        ) {
            let now = DateTime::<Utc>::from_timestamp(secs, 0).unwrap();
            let buckets = range_of_buckets(now, window, g);

            prop_assert!(!buckets.is_empty());
            prop_assert!(buckets[0].contains(window_start(now, window)));
            prop_assert!(buckets.last().unwrap().contains(now));
            for pair in buckets.windows(2) {
                prop_assert!(pair[0] < pair[1]);
                prop_assert!(pair[0].label() < pair[1].label() || pair[0].year() < pair[1].year());
                prop_assert_eq!(pair[0].end(), pair[1].start());
                prop_assert_eq!(pair[0].next(), pair[1]);
            }
        }

        #[test]
        fn prop_bucket_for_contains_instant(
            secs in 0i64..4_102_444_800,
            g in prop_oneof![
                Just(Granularity::Month),
                Just(Granularity::Quarter),
                Just(Granularity::Year)
            ],
        ) {
            let t = DateTime::<Utc>::from_timestamp(secs, 0).unwrap();
            let b = bucket_for(t, g);
            prop_assert!(b.start() <= t && t < b.end());
            prop_assert_eq!(b, bucket_for(t, g));
        }
    }
}
