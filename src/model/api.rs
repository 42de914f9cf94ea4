//! Public API representation of a metric.

use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};

use super::metric::*;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiWindowSettings {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "delayValue")]
    pub delay_value: f64,
    #[serde(rename = "delayUnit")]
    pub delay_unit: TimeUnit,
    #[serde(rename = "windowValue")]
    pub window_value: f64,
    #[serde(rename = "windowUnit")]
    pub window_unit: TimeUnit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiCappingSettings {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiRegressionAdjustmentSettings {
    #[serde(rename = "override")]
    pub override_: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub days: Option<u32>,
}

/// Flattened metric as returned to API consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiMetric {
    pub id: String,
    pub name: String,
    pub description: String,
    pub owner: String,
    pub datasource: String,
    pub projects: Vec<String>,
    pub tags: Vec<String>,
    pub metric_type: MetricKind,
    pub events: String,
    pub numerator: ColumnRef,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub denominator: Option<ColumnRef>,
    pub conditions: Vec<Condition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregation: Option<Aggregation>,
    pub window_settings: ApiWindowSettings,
    pub capping_settings: ApiCappingSettings,
    pub prior_settings: PriorSettings,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantile_settings: Option<QuantileSettings>,
    pub risk_threshold_danger: f64,
    pub risk_threshold_success: f64,
    pub min_percent_change: f64,
    pub max_percent_change: f64,
    pub min_sample_size: f64,
    pub regression_adjustment_settings: ApiRegressionAdjustmentSettings,
    pub managed_by: String,
    pub date_created: String,
    pub date_updated: String,
}

fn window_kind_name(kind: WindowKind) -> &'static str {
    match kind {
        WindowKind::None => "none",
        WindowKind::Conversion => "conversion",
        WindowKind::Lookback => "lookback",
    }
}

fn capping_kind_name(kind: CappingKind) -> &'static str {
    match kind {
        CappingKind::None => "none",
        CappingKind::Absolute => "absolute",
    }
}

/// Project a metric into its API shape.
pub fn to_api_metric(metric: &MetricDefinition) -> ApiMetric {
    let regression = ApiRegressionAdjustmentSettings {
        override_: metric.regression_adjustment_override,
        enabled: metric
            .regression_adjustment_override
            .then_some(metric.regression_adjustment_enabled),
        days: (metric.regression_adjustment_override && metric.regression_adjustment_enabled)
            .then_some(metric.regression_adjustment_days),
    };

    let format_date = |date: &Option<chrono::DateTime<chrono::Utc>>| {
        date.map(|d| d.to_rfc3339_opts(SecondsFormat::Millis, true))
            .unwrap_or_default()
    };

    ApiMetric {
        id: metric.id.clone(),
        name: metric.name.clone(),
        description: metric.description.clone(),
        owner: metric.owner.clone(),
        datasource: metric.datasource.clone(),
        projects: metric.projects.clone(),
        tags: metric.tags.clone(),
        metric_type: metric.kind,
        events: metric.events.clone(),
        numerator: metric.numerator.clone(),
        denominator: metric.denominator.clone(),
        conditions: metric.conditions.clone(),
        aggregation: metric.aggregation,
        window_settings: ApiWindowSettings {
            kind: window_kind_name(metric.window_settings.kind).to_string(),
            delay_value: metric.window_settings.delay_value,
            delay_unit: metric.window_settings.delay_unit,
            window_value: metric.window_settings.window_value,
            window_unit: metric.window_settings.window_unit,
        },
        capping_settings: ApiCappingSettings {
            kind: capping_kind_name(metric.capping_settings.kind).to_string(),
            value: metric.capping_settings.value,
        },
        prior_settings: metric.prior_settings.clone(),
        quantile_settings: metric.quantile_settings.clone(),
        risk_threshold_danger: metric.lose_risk,
        risk_threshold_success: metric.win_risk,
        min_percent_change: metric.min_percent_change,
        max_percent_change: metric.max_percent_change,
        min_sample_size: metric.min_sample_size,
        regression_adjustment_settings: regression,
        managed_by: match metric.managed_by {
            ManagedBy::Api => "api".to_string(),
            ManagedBy::Ui => String::new(),
        },
        date_created: format_date(&metric.date_created),
        date_updated: format_date(&metric.date_updated),
    }
}
