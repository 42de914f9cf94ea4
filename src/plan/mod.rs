//! Structured plans for experiment and metric-value queries.
//!
//! A plan is the intermediate representation shared by the script renderer
//! ([`crate::script`]) and the reference interpreter ([`crate::engine`]).
//! Building a plan never fails: definitions are validated before they get
//! here.

pub mod aggregate;
pub mod predicate;

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

use crate::model::{
    Aggregation, DimensionSpec, ExperimentSettings, MetricDefinition, MetricKind,
    MetricValueParams,
};
use crate::window::{self, hours_to_ms, WindowBound};

pub use aggregate::{AggregateFilter, CompareOp, Comparison, FilterColumn};
pub use predicate::{
    ConditionTest, DimensionExpr, EventPredicate, ExposurePredicate, Matches, SegmentPredicate,
    ValueExpr,
};

/// One metric, ready for per-user evaluation.
#[derive(Debug, Clone)]
pub struct MetricStep {
    pub id: String,
    pub name: String,
    pub kind: MetricKind,
    pub predicate: EventPredicate,
    pub value: ValueExpr,
    pub window: Vec<WindowBound>,
    pub delay_ms: i64,
    pub aggregation: Aggregation,
    pub cap: Option<f64>,
    pub aggregate_filter: Option<AggregateFilter>,
}

impl MetricStep {
    pub fn from_metric(metric: &MetricDefinition, experiment_end: DateTime<Utc>) -> Self {
        let aggregate_filter = if metric.kind.is_binomial() {
            match (
                metric.numerator.aggregate_filter_column.as_deref(),
                metric.numerator.aggregate_filter.as_deref(),
            ) {
                (Some(column), Some(filter)) => AggregateFilter::from_parts(column, filter),
                _ => None,
            }
        } else {
            None
        };

        let value = match &aggregate_filter {
            Some(AggregateFilter {
                column: FilterColumn::Column(column),
                ..
            }) => ValueExpr::from_column(Some(column)),
            _ => ValueExpr::from_column(metric.numerator.value_column()),
        };

        Self {
            id: metric.id.clone(),
            name: metric.name.clone(),
            kind: metric.kind,
            predicate: EventPredicate::new(metric.event_names(), &metric.conditions),
            value,
            window: window::resolve_window(&metric.window_settings, experiment_end),
            delay_ms: hours_to_ms(metric.window_settings.delay_hours()),
            aggregation: metric.effective_aggregation(),
            cap: window::resolve_capping(&metric.capping_settings),
            aggregate_filter,
        }
    }

    /// Drop window bounds (metric-value queries have no reference instant).
    pub fn without_window(mut self) -> Self {
        self.window.clear();
        self.delay_ms = 0;
        self
    }

    /// Metrics whose window opens before exposure.
    pub fn is_early_start(&self) -> bool {
        self.delay_ms < 0
    }

    pub fn in_window(&self, time: i64, start: i64) -> bool {
        window::within(&self.window, time, start)
    }

    /// Collapse a user's value list into one number.
    pub fn aggregate(&self, values: &[f64]) -> f64 {
        if self.kind.is_binomial() {
            let converted = match &self.aggregate_filter {
                Some(filter) => !values.is_empty() && filter.passes(values),
                None => !values.is_empty(),
            };
            return if converted { 1.0 } else { 0.0 };
        }
        if values.is_empty() {
            return 0.0;
        }
        window::apply_cap(self.aggregation.apply(values), self.cap, false)
    }
}

/// Optional gate after which metric capture starts.
#[derive(Debug, Clone)]
pub struct ActivationStep {
    pub name: String,
    pub predicate: EventPredicate,
}

/// Full description of an experiment query.
#[derive(Debug, Clone)]
pub struct ExperimentPlan {
    pub experiment_id: String,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    /// Deduplicated, sorted event names to read.
    pub selectors: Vec<String>,
    pub exposure: ExposurePredicate,
    pub variation_path: Vec<String>,
    pub user_key: Option<String>,
    pub dimension: Option<DimensionExpr>,
    pub activation: Option<ActivationStep>,
    pub metrics: Vec<MetricStep>,
}

impl ExperimentPlan {
    pub fn build(
        settings: &ExperimentSettings,
        metrics: &[MetricDefinition],
        activation: Option<&MetricDefinition>,
        dimension: Option<&DimensionSpec>,
    ) -> Self {
        let metrics: Vec<MetricDefinition> =
            metrics.iter().map(|m| settings.apply_overrides(m)).collect();
        let activation = activation.map(|m| settings.apply_overrides(m));

        let mut selectors = BTreeSet::new();
        selectors.insert(settings.exposure_event.clone());
        for metric in metrics.iter().chain(activation.iter()) {
            selectors.extend(metric.event_names());
        }

        Self {
            experiment_id: settings.experiment_id.clone(),
            from: settings.start,
            to: settings.end,
            selectors: selectors.into_iter().collect(),
            exposure: ExposurePredicate {
                event_name: settings.exposure_event.clone(),
                experiment_id_path: predicate::property_path(&settings.experiment_id_property),
                experiment_id: settings.experiment_id.clone(),
                start: settings.start.timestamp_millis(),
                end: settings.end.timestamp_millis(),
            },
            variation_path: predicate::property_path(&settings.variation_id_property),
            user_key: settings.extra_user_id_property.clone(),
            dimension: dimension.map(|d| DimensionExpr {
                path: predicate::property_path(&d.resolve(
                    settings.start,
                    settings.end,
                    &settings.experiment_id,
                )),
            }),
            activation: activation.map(|m| ActivationStep {
                name: m.name.clone(),
                predicate: EventPredicate::new(m.event_names(), &m.conditions),
            }),
            metrics: metrics
                .iter()
                .map(|m| MetricStep::from_metric(m, settings.end))
                .collect(),
        }
    }

    pub fn has_early_start(&self) -> bool {
        self.metrics.iter().any(MetricStep::is_early_start)
    }
}

/// Full description of a metric-value query.
#[derive(Debug, Clone)]
pub struct MetricValuePlan {
    pub name: String,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub selectors: Vec<String>,
    pub segment: Option<SegmentPredicate>,
    pub metric: MetricStep,
    pub include_by_date: bool,
    pub user_key: Option<String>,
}

impl MetricValuePlan {
    pub fn build(params: &MetricValueParams) -> Self {
        let selectors: BTreeSet<String> = params.metric.event_names().into_iter().collect();
        Self {
            name: params.name.clone(),
            from: params.from,
            to: params.to,
            selectors: selectors.into_iter().collect(),
            segment: params.segment.as_ref().map(|s| SegmentPredicate {
                name: s.name.clone(),
                conditions: s.conditions.iter().map(ConditionTest::new).collect(),
            }),
            metric: MetricStep::from_metric(&params.metric, params.to).without_window(),
            include_by_date: params.include_by_date,
            user_key: params.extra_user_id_property.clone(),
        }
    }
}
