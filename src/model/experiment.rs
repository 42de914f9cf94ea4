//! Experiment, dimension and segment descriptions consumed by the compilers.

use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use super::metric::{Condition, MetricDefinition, TimeUnit, WindowKind};

pub const DEFAULT_EXPOSURE_EVENT: &str = "$experiment_started";
pub const DEFAULT_EXPERIMENT_ID_PROPERTY: &str = "Experiment name";
pub const DEFAULT_VARIATION_ID_PROPERTY: &str = "Variant name";

/// Placeholders usable in dimension expressions, e.g. `{{ startDate }}`.
static TEMPLATE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*(\w+)\s*\}\}").unwrap());

/// Datasource-level event naming.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EventSettings {
    pub experiment_event: String,
    pub experiment_id_property: String,
    pub variation_id_property: String,
    pub extra_user_id_property: Option<String>,
}

impl Default for EventSettings {
    fn default() -> Self {
        Self {
            experiment_event: DEFAULT_EXPOSURE_EVENT.to_string(),
            experiment_id_property: DEFAULT_EXPERIMENT_ID_PROPERTY.to_string(),
            variation_id_property: DEFAULT_VARIATION_ID_PROPERTY.to_string(),
            extra_user_id_property: None,
        }
    }
}

impl EventSettings {
    /// Fill empty fields with the defaults.
    pub fn with_defaults(mut self) -> Self {
        let defaults = EventSettings::default();
        if self.experiment_event.is_empty() {
            self.experiment_event = defaults.experiment_event;
        }
        if self.experiment_id_property.is_empty() {
            self.experiment_id_property = defaults.experiment_id_property;
        }
        if self.variation_id_property.is_empty() {
            self.variation_id_property = defaults.variation_id_property;
        }
        if self.extra_user_id_property.as_deref() == Some("") {
            self.extra_user_id_property = None;
        }
        self
    }
}

/// Per-experiment override of a metric's window.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MetricOverride {
    pub id: String,
    pub window_type: Option<WindowKind>,
    pub window_hours: Option<f64>,
    pub delay_hours: Option<f64>,
}

impl MetricOverride {
    /// Apply this override to a metric in place.
    pub fn apply(&self, metric: &mut MetricDefinition) {
        if let Some(kind) = self.window_type {
            metric.window_settings.kind = kind;
        }
        if let Some(hours) = self.window_hours {
            metric.window_settings.window_unit = TimeUnit::Hours;
            metric.window_settings.window_value = hours;
        }
        if let Some(hours) = self.delay_hours {
            metric.window_settings.delay_unit = TimeUnit::Hours;
            metric.window_settings.delay_value = hours;
        }
    }
}

/// Experiment analysis settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentSettings {
    pub experiment_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default = "default_exposure_event")]
    pub exposure_event: String,
    #[serde(default = "default_experiment_id_property")]
    pub experiment_id_property: String,
    #[serde(default = "default_variation_id_property")]
    pub variation_id_property: String,
    #[serde(default)]
    pub extra_user_id_property: Option<String>,
    #[serde(default)]
    pub metric_overrides: Vec<MetricOverride>,
}

fn default_exposure_event() -> String {
    DEFAULT_EXPOSURE_EVENT.to_string()
}

fn default_experiment_id_property() -> String {
    DEFAULT_EXPERIMENT_ID_PROPERTY.to_string()
}

fn default_variation_id_property() -> String {
    DEFAULT_VARIATION_ID_PROPERTY.to_string()
}

impl ExperimentSettings {
    pub fn new(experiment_id: impl Into<String>, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            experiment_id: experiment_id.into(),
            start,
            end,
            exposure_event: default_exposure_event(),
            experiment_id_property: default_experiment_id_property(),
            variation_id_property: default_variation_id_property(),
            extra_user_id_property: None,
            metric_overrides: Vec::new(),
        }
    }

    /// Take event naming from datasource settings.
    pub fn with_events(mut self, events: &EventSettings) -> Self {
        let events = events.clone().with_defaults();
        self.exposure_event = events.experiment_event;
        self.experiment_id_property = events.experiment_id_property;
        self.variation_id_property = events.variation_id_property;
        self.extra_user_id_property = events.extra_user_id_property;
        self
    }

    pub fn with_override(mut self, metric_override: MetricOverride) -> Self {
        self.metric_overrides.push(metric_override);
        self
    }

    /// Copy of `metric` with any matching override applied.
    pub fn apply_overrides(&self, metric: &MetricDefinition) -> MetricDefinition {
        let mut metric = metric.clone();
        let id = metric.id.clone();
        for metric_override in self.metric_overrides.iter().filter(|o| o.id == id) {
            metric_override.apply(&mut metric);
        }
        metric
    }
}

/// A dimension evaluated once per user at first exposure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionSpec {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Property path, optionally containing `{{...}}` placeholders.
    pub expression: String,
}

impl DimensionSpec {
    pub fn new(name: impl Into<String>, expression: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: name.clone(),
            name,
            expression: expression.into(),
        }
    }

    /// Substitute date and experiment placeholders.
    ///
    /// Unknown placeholders are left untouched.
    pub fn resolve(&self, start: DateTime<Utc>, end: DateTime<Utc>, experiment_id: &str) -> String {
        TEMPLATE_PATTERN
            .replace_all(&self.expression, |caps: &regex::Captures| match &caps[1] {
                "startDate" => start.format("%Y-%m-%d %H:%M:%S").to_string(),
                "endDate" => end.format("%Y-%m-%d %H:%M:%S").to_string(),
                "startDateISO" => start.to_rfc3339_opts(SecondsFormat::Millis, true),
                "endDateISO" => end.to_rfc3339_opts(SecondsFormat::Millis, true),
                "experimentId" => experiment_id.to_string(),
                _ => caps[0].to_string(),
            })
            .into_owned()
    }
}

/// A named set of conditions limiting which events are considered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentSpec {
    pub name: String,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// Parameters of a standalone metric-value query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricValueParams {
    pub name: String,
    pub metric: MetricDefinition,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    #[serde(default)]
    pub segment: Option<SegmentSpec>,
    #[serde(default)]
    pub include_by_date: bool,
    #[serde(default)]
    pub extra_user_id_property: Option<String>,
}
