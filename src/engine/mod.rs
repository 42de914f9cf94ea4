//! Reference interpreter for compiled plans.
//!
//! Evaluates an [`ExperimentPlan`] or [`MetricValuePlan`] over in-memory
//! events with the same semantics as the generated script, producing the
//! same raw row shapes the analytics engine returns.
//!
//! ```text
//! events ──► select/filter ──► group by user ──► UserState ──► aggregate
//!                                                                 │
//!                          RawExperimentRow ◄── group by bucket ◄─┘
//! ```

pub mod reduce;
pub mod state;

use chrono::{DateTime, NaiveDate, Utc};
use std::collections::BTreeMap;
use tracing::debug;

use crate::decode::{RawExperimentRow, RawMetricSummary, RawMetricValueRow};
use crate::model::event::value_as_string;
use crate::model::Event;
use crate::plan::predicate::property_path;
use crate::plan::{ExperimentPlan, Matches, MetricValuePlan};

pub use reduce::{NumericSummary, batched_by_date, reduce_by_date};
pub use state::{Phase, UserState};

/// Default number of users per by-date reducer batch.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Interpreter configuration.
#[derive(Debug, Clone)]
pub struct Engine {
    batch_size: usize,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_SIZE)
    }
}

impl Engine {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Run an experiment plan.
    pub fn run_experiment(&self, plan: &ExperimentPlan, events: &[Event]) -> Vec<RawExperimentRow> {
        let selected = select(events, &plan.selectors, plan.from, plan.to, |event| {
            plan.exposure.matches(event)
                || plan
                    .activation
                    .as_ref()
                    .is_some_and(|a| a.predicate.matches(event))
                || plan.metrics.iter().any(|m| m.predicate.matches(event))
        });
        let users = group_by_user(selected, plan.user_key.as_deref());

        let mut groups: BTreeMap<(String, String), Bucket> = BTreeMap::new();
        let mut included = 0usize;
        for user_events in users.values() {
            let mut state = UserState::new(plan);
            for &event in user_events {
                state.observe(event);
            }
            if !state.is_included() {
                continue;
            }
            included += 1;

            let variation = value_as_string(state.variation.as_ref());
            let dimension = state.dimension.clone().unwrap_or_default();
            let bucket = groups
                .entry((variation, dimension))
                .or_insert_with(|| Bucket::new(plan.metrics.len()));
            bucket.users += 1;
            for (summary, value) in bucket.metrics.iter_mut().zip(state.aggregate()) {
                summary.push(value);
            }
        }

        debug!(
            experiment = %plan.experiment_id,
            users = users.len(),
            included,
            groups = groups.len(),
            "interpreted experiment plan"
        );

        groups
            .into_iter()
            .map(|((variation, dimension), bucket)| RawExperimentRow {
                variation: variation.into(),
                dimension: dimension.into(),
                users: bucket.users,
                metrics: plan
                    .metrics
                    .iter()
                    .zip(bucket.metrics)
                    .map(|(metric, summary)| RawMetricSummary {
                        id: metric.id.clone(),
                        metric_type: metric.kind,
                        count: summary.count,
                        main_sum: Some(summary.sum),
                        main_sum_squares: Some(summary.sum_squares),
                    })
                    .collect(),
            })
            .collect()
    }

    /// Run a metric-value plan.
    pub fn run_metric_value(&self, plan: &MetricValuePlan, events: &[Event]) -> Vec<RawMetricValueRow> {
        let selected = select(events, &plan.selectors, plan.from, plan.to, |event| {
            plan.segment.as_ref().map_or(true, |s| s.matches(event))
                && plan.metric.predicate.matches(event)
        });
        let users = group_by_user(selected, plan.user_key.as_deref());

        let converted: Vec<(i64, f64)> = users
            .values()
            .filter_map(|user_events| {
                let first = user_events.first()?;
                let values: Vec<f64> = user_events
                    .iter()
                    .map(|event| plan.metric.value.eval(event).unwrap_or(0.0))
                    .collect();
                Some((first.time, plan.metric.aggregate(&values)))
            })
            .collect();

        let overall = NumericSummary::from_values(converted.iter().map(|(_, value)| *value));
        debug!(
            metric = %plan.name,
            users = converted.len(),
            batch_size = self.batch_size,
            "interpreted metric value plan"
        );

        let mut rows = vec![RawMetricValueRow::Overall {
            count: overall.count,
            sum: Some(overall.sum),
            sum_squares: Some(overall.sum_squares),
        }];
        if plan.include_by_date {
            rows.push(RawMetricValueRow::ByDate {
                dates: reduce::to_raw_buckets(batched_by_date(&converted, self.batch_size)),
            });
        }
        rows
    }
}

struct Bucket {
    users: u64,
    metrics: Vec<NumericSummary>,
}

impl Bucket {
    fn new(metrics: usize) -> Self {
        Self {
            users: 0,
            metrics: vec![NumericSummary::default(); metrics],
        }
    }
}

fn date_range(from: DateTime<Utc>, to: DateTime<Utc>) -> (NaiveDate, NaiveDate) {
    (from.date_naive(), to.date_naive())
}

/// Events with a selected name, inside the date range, passing `keep`.
fn select<'a>(
    events: &'a [Event],
    selectors: &[String],
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    keep: impl Fn(&Event) -> bool,
) -> Vec<&'a Event> {
    let (first_day, last_day) = date_range(from, to);
    events
        .iter()
        .filter(|event| selectors.iter().any(|s| *s == event.name))
        .filter(|event| {
            DateTime::from_timestamp_millis(event.time)
                .map(|dt| dt.date_naive())
                .is_some_and(|day| day >= first_day && day <= last_day)
        })
        .filter(|event| keep(event))
        .collect()
}

/// Group events by user, each user's events sorted by time.
fn group_by_user<'a>(
    events: Vec<&'a Event>,
    user_key: Option<&str>,
) -> BTreeMap<(String, String), Vec<&'a Event>> {
    let mut users: BTreeMap<(String, String), Vec<&'a Event>> = BTreeMap::new();
    for event in events {
        let extra = user_key
            .map(|key| value_as_string(event.lookup(&property_path(key))))
            .unwrap_or_default();
        users
            .entry((event.distinct_id.clone(), extra))
            .or_default()
            .push(event);
    }
    for user_events in users.values_mut() {
        user_events.sort_by_key(|event| event.time);
    }
    users
}
