//! Metric definitions.
//!
//! A metric describes which events count, what value each event contributes,
//! how a user's values collapse into one number and which time window around
//! exposure is eligible.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pseudo-column meaning "one per matching row".
pub const ROW_COUNT_COLUMN: &str = "$$count";

/// Pseudo-column meaning "one per distinct user".
pub const DISTINCT_USERS_COLUMN: &str = "$$distinctUsers";

/// Default conversion window when a legacy document does not carry one.
pub const DEFAULT_CONVERSION_WINDOW_HOURS: f64 = 72.0;

/// Default prior standard deviation for proper priors.
pub const DEFAULT_PROPER_PRIOR_STDDEV: f64 = 0.3;

/// The statistical shape of a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Count,
    #[serde(alias = "binomial")]
    Proportion,
    Mean,
    Ratio,
    Quantile,
    Retention,
}

impl MetricKind {
    /// Binomial metrics aggregate to 0/1 per user and are never capped.
    pub fn is_binomial(&self) -> bool {
        matches!(self, MetricKind::Proportion | MetricKind::Retention)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Count => "count",
            MetricKind::Proportion => "proportion",
            MetricKind::Mean => "mean",
            MetricKind::Ratio => "ratio",
            MetricKind::Quantile => "quantile",
            MetricKind::Retention => "retention",
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to a column of a fact table, with row filters and an optional
/// per-user aggregate filter.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnRef {
    pub fact_table_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    #[serde(default)]
    pub filters: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregate_filter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregate_filter_column: Option<String>,
}

impl ColumnRef {
    pub fn new(fact_table_id: impl Into<String>) -> Self {
        Self {
            fact_table_id: fact_table_id.into(),
            ..Default::default()
        }
    }

    pub fn with_column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    pub fn with_filter(mut self, filter_id: impl Into<String>) -> Self {
        self.filters.push(filter_id.into());
        self
    }

    pub fn with_aggregate_filter(
        mut self,
        column: impl Into<String>,
        filter: impl Into<String>,
    ) -> Self {
        self.aggregate_filter_column = Some(column.into());
        self.aggregate_filter = Some(filter.into());
        self
    }

    /// The value column, with the counting pseudo-columns mapped to `None`.
    pub fn value_column(&self) -> Option<&str> {
        match self.column.as_deref() {
            None | Some("") | Some(ROW_COUNT_COLUMN) | Some(DISTINCT_USERS_COLUMN) => None,
            Some(col) => Some(col),
        }
    }

    /// Whether either half of the aggregate filter is set.
    pub fn has_aggregate_filter(&self) -> bool {
        non_empty(&self.aggregate_filter) || non_empty(&self.aggregate_filter_column)
    }
}

fn non_empty(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|s| !s.is_empty())
}

/// Comparison operator of an event condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionOperator {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = "~")]
    Matches,
    #[serde(rename = "!~")]
    NotMatches,
}

impl ConditionOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionOperator::Eq => "=",
            ConditionOperator::Ne => "!=",
            ConditionOperator::Gt => ">",
            ConditionOperator::Gte => ">=",
            ConditionOperator::Lt => "<",
            ConditionOperator::Lte => "<=",
            ConditionOperator::Matches => "~",
            ConditionOperator::NotMatches => "!~",
        }
    }
}

/// A boolean test on one event property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Dotted property path, e.g. `plan.tier`.
    pub column: String,
    pub operator: ConditionOperator,
    pub value: String,
}

impl Condition {
    pub fn new(column: impl Into<String>, operator: ConditionOperator, value: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            operator,
            value: value.into(),
        }
    }
}

/// Per-user aggregation of a metric's value list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Aggregation {
    Sum,
    Count,
    CountDistinct,
    Min,
    Max,
    Avg,
    Median,
}

/// Time unit of window and delay values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Minutes,
    #[default]
    Hours,
    Days,
    Weeks,
}

impl TimeUnit {
    /// Convert a value in this unit to hours.
    pub fn to_hours(&self, value: f64) -> f64 {
        match self {
            TimeUnit::Minutes => value / 60.0,
            TimeUnit::Hours => value,
            TimeUnit::Days => value * 24.0,
            TimeUnit::Weeks => value * 24.0 * 7.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowKind {
    #[default]
    #[serde(rename = "", alias = "none")]
    None,
    Conversion,
    Lookback,
}

/// Conversion/lookback window relative to exposure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowSettings {
    #[serde(rename = "type", default)]
    pub kind: WindowKind,
    #[serde(default)]
    pub delay_value: f64,
    #[serde(default)]
    pub delay_unit: TimeUnit,
    #[serde(default)]
    pub window_value: f64,
    #[serde(default)]
    pub window_unit: TimeUnit,
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self {
            kind: WindowKind::None,
            delay_value: 0.0,
            delay_unit: TimeUnit::Hours,
            window_value: DEFAULT_CONVERSION_WINDOW_HOURS,
            window_unit: TimeUnit::Hours,
        }
    }
}

impl WindowSettings {
    pub fn conversion(delay_hours: f64, window_hours: f64) -> Self {
        Self {
            kind: WindowKind::Conversion,
            delay_value: delay_hours,
            window_value: window_hours,
            ..Default::default()
        }
    }

    pub fn lookback(window_hours: f64) -> Self {
        Self {
            kind: WindowKind::Lookback,
            window_value: window_hours,
            ..Default::default()
        }
    }

    pub fn delay_hours(&self) -> f64 {
        self.delay_unit.to_hours(self.delay_value)
    }

    pub fn window_hours(&self) -> f64 {
        self.window_unit.to_hours(self.window_value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CappingKind {
    #[default]
    #[serde(rename = "", alias = "none")]
    None,
    Absolute,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CappingSettings {
    #[serde(rename = "type", default)]
    pub kind: CappingKind,
    #[serde(default)]
    pub value: f64,
}

impl CappingSettings {
    pub fn absolute(value: f64) -> Self {
        Self {
            kind: CappingKind::Absolute,
            value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorSettings {
    #[serde(rename = "override")]
    pub override_: bool,
    pub proper: bool,
    pub mean: f64,
    pub stddev: f64,
}

impl Default for PriorSettings {
    fn default() -> Self {
        Self {
            override_: false,
            proper: false,
            mean: 0.0,
            stddev: DEFAULT_PROPER_PRIOR_STDDEV,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuantileType {
    Event,
    Unit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuantileSettings {
    #[serde(rename = "type")]
    pub kind: QuantileType,
    pub quantile: f64,
    #[serde(default)]
    pub ignore_zeros: bool,
}

/// Who owns a metric document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManagedBy {
    #[default]
    #[serde(rename = "")]
    Ui,
    Api,
}

/// A complete metric definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub owner: String,
    pub datasource: String,
    #[serde(default)]
    pub projects: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(rename = "metricType")]
    pub kind: MetricKind,
    /// Event name filter; several names are joined with ` OR `.
    pub events: String,
    pub numerator: ColumnRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub denominator: Option<ColumnRef>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregation: Option<Aggregation>,
    #[serde(default)]
    pub window_settings: WindowSettings,
    #[serde(default)]
    pub capping_settings: CappingSettings,
    #[serde(default)]
    pub prior_settings: PriorSettings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantile_settings: Option<QuantileSettings>,
    #[serde(default = "default_win_risk")]
    pub win_risk: f64,
    #[serde(default = "default_lose_risk")]
    pub lose_risk: f64,
    #[serde(default = "default_min_percent_change")]
    pub min_percent_change: f64,
    #[serde(default = "default_max_percent_change")]
    pub max_percent_change: f64,
    #[serde(default = "default_min_sample_size")]
    pub min_sample_size: f64,
    #[serde(default)]
    pub regression_adjustment_override: bool,
    #[serde(default)]
    pub regression_adjustment_enabled: bool,
    #[serde(default)]
    pub regression_adjustment_days: u32,
    #[serde(default)]
    pub managed_by: ManagedBy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_created: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_updated: Option<DateTime<Utc>>,
}

fn default_win_risk() -> f64 {
    0.0025
}

fn default_lose_risk() -> f64 {
    0.0125
}

fn default_min_percent_change() -> f64 {
    0.005
}

fn default_max_percent_change() -> f64 {
    0.5
}

fn default_min_sample_size() -> f64 {
    150.0
}

impl MetricDefinition {
    /// Create a metric with default thresholds and settings.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        kind: MetricKind,
        events: impl Into<String>,
        numerator: ColumnRef,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            owner: String::new(),
            datasource: String::new(),
            projects: Vec::new(),
            tags: Vec::new(),
            kind,
            events: events.into(),
            numerator,
            denominator: None,
            conditions: Vec::new(),
            aggregation: None,
            window_settings: WindowSettings::default(),
            capping_settings: CappingSettings::default(),
            prior_settings: PriorSettings::default(),
            quantile_settings: None,
            win_risk: default_win_risk(),
            lose_risk: default_lose_risk(),
            min_percent_change: default_min_percent_change(),
            max_percent_change: default_max_percent_change(),
            min_sample_size: default_min_sample_size(),
            regression_adjustment_override: false,
            regression_adjustment_enabled: false,
            regression_adjustment_days: 0,
            managed_by: ManagedBy::Ui,
            date_created: None,
            date_updated: None,
        }
    }

    pub fn with_datasource(mut self, datasource: impl Into<String>) -> Self {
        self.datasource = datasource.into();
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_window(mut self, window: WindowSettings) -> Self {
        self.window_settings = window;
        self
    }

    pub fn with_capping(mut self, capping: CappingSettings) -> Self {
        self.capping_settings = capping;
        self
    }

    pub fn with_aggregation(mut self, aggregation: Aggregation) -> Self {
        self.aggregation = Some(aggregation);
        self
    }

    pub fn with_denominator(mut self, denominator: ColumnRef) -> Self {
        self.denominator = Some(denominator);
        self
    }

    /// Event names from the ` OR `-joined filter, trimmed, empties dropped.
    pub fn event_names(&self) -> Vec<String> {
        split_event_names(&self.events)
    }

    /// The aggregation applied when none is set explicitly.
    pub fn effective_aggregation(&self) -> Aggregation {
        if let Some(aggregation) = self.aggregation {
            return aggregation;
        }
        if self.kind == MetricKind::Count && self.numerator.value_column().is_none() {
            Aggregation::Count
        } else {
            Aggregation::Sum
        }
    }
}

/// Split an ` OR `-joined event filter into names.
pub fn split_event_names(events: &str) -> Vec<String> {
    events
        .split(" OR ")
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}
