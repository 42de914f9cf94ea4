//! Decoding of raw engine rows into typed summary rows.
//!
//! The raw shapes are what the generated script returns (and what the
//! reference interpreter produces). Sums may come back as `null` when a
//! group has no values; they decode to zero.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::event::value_as_string;
use crate::model::MetricKind;

// ============================================================================
// Raw shapes
// ============================================================================

/// Per-metric summary inside a raw experiment row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMetricSummary {
    pub id: String,
    pub metric_type: MetricKind,
    pub count: u64,
    #[serde(default)]
    pub main_sum: Option<f64>,
    #[serde(default)]
    pub main_sum_squares: Option<f64>,
}

/// One (variation, dimension) group returned by an experiment query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawExperimentRow {
    pub variation: Value,
    #[serde(default)]
    pub dimension: Value,
    pub users: u64,
    #[serde(default)]
    pub metrics: Vec<RawMetricSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDateBucket {
    pub date: String,
    pub count: u64,
    #[serde(default)]
    pub sum: Option<f64>,
    #[serde(default)]
    pub sum_squares: Option<f64>,
}

/// One reducer output of a metric-value query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RawMetricValueRow {
    #[serde(rename = "overall")]
    Overall {
        count: u64,
        #[serde(default)]
        sum: Option<f64>,
        #[serde(default)]
        sum_squares: Option<f64>,
    },
    #[serde(rename = "byDate")]
    ByDate { dates: Vec<RawDateBucket> },
}

// ============================================================================
// Typed rows
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub metric: String,
    pub users: u64,
    pub metric_type: MetricKind,
    pub count: u64,
    pub main_sum: f64,
    pub main_sum_squares: f64,
}

/// Summary statistics for one variation and dimension bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRow {
    pub variation: String,
    pub dimension: String,
    pub users: u64,
    pub metrics: Vec<MetricSummary>,
}

/// Summary statistics for one date, or overall when `date` is empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricValueRow {
    pub date: String,
    pub count: u64,
    pub main_sum: f64,
    pub main_sum_squares: f64,
}

// ============================================================================
// Decoding
// ============================================================================

fn bucket_label(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => value_as_string(Some(other)),
    }
}

pub fn decode_experiment_rows(rows: Vec<RawExperimentRow>) -> Vec<SummaryRow> {
    rows.into_iter()
        .map(|row| {
            let users = row.users;
            SummaryRow {
                variation: bucket_label(&row.variation),
                dimension: bucket_label(&row.dimension),
                users,
                metrics: row
                    .metrics
                    .into_iter()
                    .map(|m| MetricSummary {
                        metric: m.id,
                        users,
                        metric_type: m.metric_type,
                        count: m.count,
                        main_sum: m.main_sum.unwrap_or(0.0),
                        main_sum_squares: m.main_sum_squares.unwrap_or(0.0),
                    })
                    .collect(),
            }
        })
        .collect()
}

/// Decode the JSON body of an experiment query.
pub fn parse_experiment_response(body: Value) -> Result<Vec<SummaryRow>, serde_json::Error> {
    let rows: Vec<RawExperimentRow> = serde_json::from_value(body)?;
    Ok(decode_experiment_rows(rows))
}

/// Overall row first (empty date), then one row per date in date order.
pub fn decode_metric_value_rows(rows: &[RawMetricValueRow]) -> Vec<MetricValueRow> {
    let mut overall = MetricValueRow {
        date: String::new(),
        count: 0,
        main_sum: 0.0,
        main_sum_squares: 0.0,
    };
    let mut dated = Vec::new();

    for row in rows {
        match row {
            RawMetricValueRow::Overall {
                count,
                sum,
                sum_squares,
            } => {
                overall.count = *count;
                overall.main_sum = sum.unwrap_or(0.0);
                overall.main_sum_squares = sum_squares.unwrap_or(0.0);
            }
            RawMetricValueRow::ByDate { dates } => {
                let mut dates = dates.clone();
                dates.sort_by(|a, b| a.date.cmp(&b.date));
                dated.extend(dates.into_iter().map(|d| MetricValueRow {
                    date: d.date,
                    count: d.count,
                    main_sum: d.sum.unwrap_or(0.0),
                    main_sum_squares: d.sum_squares.unwrap_or(0.0),
                }));
            }
        }
    }

    let mut result = Vec::with_capacity(dated.len() + 1);
    result.push(overall);
    result.extend(dated);
    result
}

/// Decode the JSON body of a metric-value query.
///
/// The engine wraps the reducer outputs in an outer array; entries without a
/// recognised `type` (an empty overall summary) are skipped.
pub fn parse_metric_value_response(body: Value) -> Result<Vec<MetricValueRow>, serde_json::Error> {
    let entries = match body {
        Value::Array(mut outer) if !outer.is_empty() => match outer.swap_remove(0) {
            Value::Array(inner) => inner,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    };

    let mut rows = Vec::new();
    for entry in entries {
        if entry.get("type").and_then(Value::as_str).is_none() {
            continue;
        }
        rows.push(serde_json::from_value::<RawMetricValueRow>(entry)?);
    }
    Ok(decode_metric_value_rows(&rows))
}
