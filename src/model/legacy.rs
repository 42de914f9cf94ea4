//! Upgrading stored metric documents written before nested settings existed.
//!
//! Older documents carry flat window/capping fields (`hasConversionWindow`,
//! `conversionWindowValue`, `capping`, ...) and window settings whose delay
//! was stored as `delayHours`. [`LegacyMetricDocument`] accepts every shape
//! ever written; [`upgrade_legacy_metric`] converts it into the current
//! [`MetricDefinition`]. Upgrading an already-current document is a no-op.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::metric::*;

/// Window settings as stored, before `delayValue` replaced `delayHours`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyWindowSettings {
    #[serde(rename = "type", default)]
    pub kind: WindowKind,
    #[serde(default)]
    pub delay_hours: Option<f64>,
    #[serde(default)]
    pub delay_value: Option<f64>,
    #[serde(default)]
    pub delay_unit: Option<TimeUnit>,
    #[serde(default)]
    pub window_value: Option<f64>,
    #[serde(default)]
    pub window_unit: Option<TimeUnit>,
}

/// Any stored revision of a metric document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyMetricDocument {
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
    pub metric_type: MetricKind,
    pub events: String,
    pub numerator: ColumnRef,
    #[serde(default)]
    pub denominator: Option<ColumnRef>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub aggregation: Option<Aggregation>,

    #[serde(default)]
    pub window_settings: Option<LegacyWindowSettings>,
    #[serde(default)]
    pub capping_settings: Option<CappingSettings>,
    #[serde(default)]
    pub prior_settings: Option<PriorSettings>,
    #[serde(default)]
    pub quantile_settings: Option<QuantileSettings>,

    // Flat fields superseded by the nested settings above.
    #[serde(default)]
    pub has_conversion_window: Option<bool>,
    #[serde(default)]
    pub conversion_window_value: Option<f64>,
    #[serde(default)]
    pub conversion_window_unit: Option<TimeUnit>,
    #[serde(default)]
    pub conversion_delay_hours: Option<f64>,
    #[serde(default)]
    pub capping: Option<CappingKind>,
    #[serde(default)]
    pub cap_value: Option<f64>,

    #[serde(default)]
    pub win_risk: Option<f64>,
    #[serde(default)]
    pub lose_risk: Option<f64>,
    #[serde(default)]
    pub min_percent_change: Option<f64>,
    #[serde(default)]
    pub max_percent_change: Option<f64>,
    #[serde(default)]
    pub min_sample_size: Option<f64>,
    #[serde(default)]
    pub regression_adjustment_override: bool,
    #[serde(default)]
    pub regression_adjustment_enabled: bool,
    #[serde(default)]
    pub regression_adjustment_days: u32,
    #[serde(default)]
    pub managed_by: ManagedBy,
    #[serde(default)]
    pub date_created: Option<DateTime<Utc>>,
    #[serde(default)]
    pub date_updated: Option<DateTime<Utc>>,
}

/// Convert any stored revision into the current definition.
///
/// Never fails: missing settings are synthesized from the flat fields or
/// from defaults.
pub fn upgrade_legacy_metric(doc: LegacyMetricDocument) -> MetricDefinition {
    let window_settings = upgrade_window(&doc);
    let capping_settings = doc.capping_settings.clone().unwrap_or_else(|| CappingSettings {
        kind: doc.capping.unwrap_or_default(),
        value: doc.cap_value.unwrap_or(0.0),
    });
    let prior_settings = doc.prior_settings.clone().unwrap_or_default();

    let mut metric = MetricDefinition::new(doc.id, doc.name, doc.metric_type, doc.events, doc.numerator);
    metric.description = doc.description;
    metric.owner = doc.owner;
    metric.datasource = doc.datasource;
    metric.projects = doc.projects;
    metric.tags = doc.tags;
    metric.denominator = doc.denominator;
    metric.conditions = doc.conditions;
    metric.aggregation = doc.aggregation;
    metric.window_settings = window_settings;
    metric.capping_settings = capping_settings;
    metric.prior_settings = prior_settings;
    metric.quantile_settings = doc.quantile_settings;
    if let Some(v) = doc.win_risk {
        metric.win_risk = v;
    }
    if let Some(v) = doc.lose_risk {
        metric.lose_risk = v;
    }
    if let Some(v) = doc.min_percent_change {
        metric.min_percent_change = v;
    }
    if let Some(v) = doc.max_percent_change {
        metric.max_percent_change = v;
    }
    if let Some(v) = doc.min_sample_size {
        metric.min_sample_size = v;
    }
    metric.regression_adjustment_override = doc.regression_adjustment_override;
    metric.regression_adjustment_enabled = doc.regression_adjustment_enabled;
    metric.regression_adjustment_days = doc.regression_adjustment_days;
    metric.managed_by = doc.managed_by;
    metric.date_created = doc.date_created;
    metric.date_updated = doc.date_updated;
    metric
}

fn upgrade_window(doc: &LegacyMetricDocument) -> WindowSettings {
    match &doc.window_settings {
        None => WindowSettings {
            kind: if doc.has_conversion_window.unwrap_or(false) {
                WindowKind::Conversion
            } else {
                WindowKind::None
            },
            window_value: doc
                .conversion_window_value
                .filter(|v| *v != 0.0)
                .unwrap_or(DEFAULT_CONVERSION_WINDOW_HOURS),
            window_unit: doc.conversion_window_unit.unwrap_or_default(),
            delay_value: doc.conversion_delay_hours.unwrap_or(0.0),
            delay_unit: TimeUnit::Hours,
        },
        Some(window) => {
            let (delay_value, delay_unit) = match window.delay_value {
                Some(value) => (value, window.delay_unit.unwrap_or_default()),
                None => (
                    window.delay_hours.unwrap_or(0.0),
                    window.delay_unit.unwrap_or_default(),
                ),
            };
            WindowSettings {
                kind: window.kind,
                delay_value,
                delay_unit,
                window_value: window.window_value.unwrap_or(DEFAULT_CONVERSION_WINDOW_HOURS),
                window_unit: window.window_unit.unwrap_or_default(),
            }
        }
    }
}

impl From<LegacyMetricDocument> for MetricDefinition {
    fn from(doc: LegacyMetricDocument) -> Self {
        upgrade_legacy_metric(doc)
    }
}
