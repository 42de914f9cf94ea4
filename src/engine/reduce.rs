//! Numeric summaries and the batched by-date reducer.

use chrono::DateTime;
use std::collections::BTreeMap;

use crate::decode::RawDateBucket;

/// Running count, sum and sum of squares.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NumericSummary {
    pub count: u64,
    pub sum: f64,
    pub sum_squares: f64,
}

impl NumericSummary {
    pub fn push(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.sum_squares += value * value;
    }

    pub fn merge(&mut self, other: &NumericSummary) {
        self.count += other.count;
        self.sum += other.sum;
        self.sum_squares += other.sum_squares;
    }

    pub fn from_values(values: impl IntoIterator<Item = f64>) -> Self {
        let mut summary = Self::default();
        for value in values {
            summary.push(value);
        }
        summary
    }
}

/// Per-date summaries keyed by `YYYY-MM-DD`.
pub type DateBuckets = BTreeMap<String, NumericSummary>;

/// UTC calendar date of a millisecond timestamp.
pub fn utc_date(time: i64) -> String {
    DateTime::from_timestamp_millis(time)
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}

/// One reducer call: merge earlier partial results, then add new users.
///
/// Each user is a `(first event time, aggregated value)` pair.
pub fn reduce_by_date(prevs: &[DateBuckets], users: &[(i64, f64)]) -> DateBuckets {
    let mut dates = DateBuckets::new();
    for prev in prevs {
        for (date, summary) in prev {
            dates.entry(date.clone()).or_default().merge(summary);
        }
    }
    for &(time, value) in users {
        dates.entry(utc_date(time)).or_default().push(value);
    }
    dates
}

/// Reduce users in batches of `batch_size`, then merge the partials.
pub fn batched_by_date(users: &[(i64, f64)], batch_size: usize) -> DateBuckets {
    let partials: Vec<DateBuckets> = users
        .chunks(batch_size.max(1))
        .map(|batch| reduce_by_date(&[], batch))
        .collect();
    reduce_by_date(&partials, &[])
}

pub fn to_raw_buckets(dates: DateBuckets) -> Vec<RawDateBucket> {
    dates
        .into_iter()
        .map(|(date, s)| RawDateBucket {
            date,
            count: s.count,
            sum: Some(s.sum),
            sum_squares: Some(s.sum_squares),
        })
        .collect()
}
