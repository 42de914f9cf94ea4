//! Validation of metric definitions.
//!
//! [`validate_metric`] runs the structural and business-rule checks in a
//! fixed order and reports the first violation. [`MetricValidator`] wraps it
//! with a fact-table map fetched at most once per instance.

use async_trait::async_trait;
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;
use tokio::sync::OnceCell;

use crate::model::metric::ROW_COUNT_COLUMN;
use crate::model::{ColumnDatatype, ColumnRef, FactTableMap, FactTableSchema, MetricDefinition, MetricKind};
use crate::plan::aggregate::parse_comparisons;

/// Required shape of metric ids.
static METRIC_ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^fact__[-a-zA-Z0-9_]+$").unwrap());

/// Prefix of generated metric ids.
pub const METRIC_ID_PREFIX: &str = "fact__";

// ============================================================================
// Error Types
// ============================================================================

/// Which side of a ratio a reference belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefSide {
    Numerator,
    Denominator,
}

impl std::fmt::Display for RefSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RefSide::Numerator => f.write_str("numerator"),
            RefSide::Denominator => f.write_str("denominator"),
        }
    }
}

/// A rejected metric definition.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("Could not find {side} fact table '{fact_table_id}'")]
    UnknownFactTable { side: RefSide, fact_table_id: String },

    #[error("Invalid {side} filter id: {filter_id}")]
    UnknownFilter { side: RefSide, filter_id: String },

    #[error("Must specify both \"aggregateFilter\" and \"aggregateFilterColumn\" or neither")]
    IncompleteAggregateFilter,

    #[error("Aggregate filter is only supported for retention and proportion metrics, not {kind}")]
    AggregateFilterNotSupported { kind: MetricKind },

    #[error("Aggregate filter column '{column}' must be a numeric column or \"$$count\"")]
    AggregateFilterColumnTypeInvalid { column: String },

    #[error("Invalid aggregate filter '{part}'")]
    InvalidAggregateFilterExpression { part: String },

    #[error("Denominator required for ratio metric")]
    MissingDenominator,

    #[error("Numerator and denominator must be in the same datasource ('{numerator}' vs '{denominator}')")]
    CrossDatasourceRatio { numerator: String, denominator: String },

    #[error("Denominator not allowed for non-ratio metric")]
    DenominatorNotAllowed,

    #[error("{0} are a premium feature")]
    PremiumFeatureRequired(PremiumFeature),

    #[error("Must specify quantile settings for quantile metrics")]
    MissingQuantileSettings,

    #[error("riskThresholdDanger ({lose_risk}) must be greater than riskThresholdSuccess ({win_risk})")]
    InvalidRiskThresholds { win_risk: f64, lose_risk: f64 },

    #[error("maxPercentChange ({max}) must be greater than minPercentChange ({min})")]
    InvalidPercentChangeThresholds { min: f64, max: f64 },

    #[error("Metric ids must start with 'fact__' and contain only letters, numbers, underscores and dashes: '{0}'")]
    InvalidIdFormat(String),

    #[error("Cannot {0} metric managed by API")]
    ManagedByApi(&'static str),

    #[error("Field '{0}' cannot be changed")]
    ReadonlyField(&'static str),
}

// ============================================================================
// Entitlements
// ============================================================================

/// Licensed features gating some metric kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PremiumFeature {
    QuantileMetrics,
    RetentionMetrics,
}

impl PremiumFeature {
    pub fn as_str(&self) -> &'static str {
        match self {
            PremiumFeature::QuantileMetrics => "quantile-metrics",
            PremiumFeature::RetentionMetrics => "retention-metrics",
        }
    }
}

impl std::fmt::Display for PremiumFeature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PremiumFeature::QuantileMetrics => f.write_str("Quantile metrics"),
            PremiumFeature::RetentionMetrics => f.write_str("Retention metrics"),
        }
    }
}

/// Answers whether the caller's license includes a feature.
pub trait Entitlements: Send + Sync {
    fn has_premium_feature(&self, feature: PremiumFeature) -> bool;
}

/// A fixed set of granted features.
#[derive(Debug, Clone, Default)]
pub struct FeatureSet(BTreeSet<PremiumFeature>);

impl FeatureSet {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn all() -> Self {
        Self([PremiumFeature::QuantileMetrics, PremiumFeature::RetentionMetrics].into())
    }

    pub fn with(mut self, feature: PremiumFeature) -> Self {
        self.0.insert(feature);
        self
    }
}

impl Entitlements for FeatureSet {
    fn has_premium_feature(&self, feature: PremiumFeature) -> bool {
        self.0.contains(&feature)
    }
}

// ============================================================================
// Checks
// ============================================================================

fn lookup_table<'a>(
    tables: &'a FactTableMap,
    fact_table_id: &str,
    side: RefSide,
) -> Result<&'a FactTableSchema, ValidationError> {
    tables
        .get(fact_table_id)
        .ok_or_else(|| ValidationError::UnknownFactTable {
            side,
            fact_table_id: fact_table_id.to_string(),
        })
}

fn check_filters(column_ref: &ColumnRef, table: &FactTableSchema, side: RefSide) -> Result<(), ValidationError> {
    match column_ref.filters.iter().find(|id| !table.has_filter(id)) {
        Some(filter_id) => Err(ValidationError::UnknownFilter {
            side,
            filter_id: filter_id.clone(),
        }),
        None => Ok(()),
    }
}

fn check_aggregate_filter(
    kind: MetricKind,
    numerator: &ColumnRef,
    table: &FactTableSchema,
) -> Result<(), ValidationError> {
    let filter = numerator.aggregate_filter.as_deref().filter(|s| !s.is_empty());
    let column = numerator.aggregate_filter_column.as_deref().filter(|s| !s.is_empty());

    if filter.is_some() != column.is_some() {
        return Err(ValidationError::IncompleteAggregateFilter);
    }
    if !kind.is_binomial() {
        return Err(ValidationError::AggregateFilterNotSupported { kind });
    }
    if let (Some(filter), Some(column)) = (filter, column) {
        let numeric = column == ROW_COUNT_COLUMN
            || table.column_datatype(column) == Some(ColumnDatatype::Number);
        if !numeric {
            return Err(ValidationError::AggregateFilterColumnTypeInvalid {
                column: column.to_string(),
            });
        }
        parse_comparisons(filter).map_err(|part| ValidationError::InvalidAggregateFilterExpression { part })?;
    }
    Ok(())
}

fn check_denominator(
    metric: &MetricDefinition,
    numerator_table: &FactTableSchema,
    tables: &FactTableMap,
) -> Result<(), ValidationError> {
    if metric.kind != MetricKind::Ratio {
        return match &metric.denominator {
            Some(denominator) if !denominator.fact_table_id.is_empty() => {
                Err(ValidationError::DenominatorNotAllowed)
            }
            _ => Ok(()),
        };
    }

    let denominator = metric
        .denominator
        .as_ref()
        .ok_or(ValidationError::MissingDenominator)?;
    if denominator.fact_table_id == metric.numerator.fact_table_id {
        return Ok(());
    }

    let table = lookup_table(tables, &denominator.fact_table_id, RefSide::Denominator)?;
    if table.datasource != numerator_table.datasource {
        return Err(ValidationError::CrossDatasourceRatio {
            numerator: numerator_table.datasource.clone(),
            denominator: table.datasource.clone(),
        });
    }
    check_filters(denominator, table, RefSide::Denominator)
}

/// Validate a metric definition against its fact tables and entitlements.
///
/// Checks run in a fixed order; the first violation is returned.
pub fn validate_metric(
    metric: &MetricDefinition,
    tables: &FactTableMap,
    entitlements: &dyn Entitlements,
) -> Result<(), ValidationError> {
    let numerator_table = lookup_table(tables, &metric.numerator.fact_table_id, RefSide::Numerator)?;
    check_filters(&metric.numerator, numerator_table, RefSide::Numerator)?;

    if metric.numerator.has_aggregate_filter() {
        check_aggregate_filter(metric.kind, &metric.numerator, numerator_table)?;
    }

    check_denominator(metric, numerator_table, tables)?;

    if metric.kind == MetricKind::Quantile {
        if !entitlements.has_premium_feature(PremiumFeature::QuantileMetrics) {
            return Err(ValidationError::PremiumFeatureRequired(PremiumFeature::QuantileMetrics));
        }
        if metric.quantile_settings.is_none() {
            return Err(ValidationError::MissingQuantileSettings);
        }
    }

    if metric.kind == MetricKind::Retention
        && !entitlements.has_premium_feature(PremiumFeature::RetentionMetrics)
    {
        return Err(ValidationError::PremiumFeatureRequired(PremiumFeature::RetentionMetrics));
    }

    if metric.lose_risk < metric.win_risk {
        return Err(ValidationError::InvalidRiskThresholds {
            win_risk: metric.win_risk,
            lose_risk: metric.lose_risk,
        });
    }

    if metric.min_percent_change >= metric.max_percent_change {
        return Err(ValidationError::InvalidPercentChangeThresholds {
            min: metric.min_percent_change,
            max: metric.max_percent_change,
        });
    }

    Ok(())
}

/// Check a metric id against the `fact__<slug>` pattern.
pub fn validate_metric_id(id: &str) -> Result<(), ValidationError> {
    if METRIC_ID_PATTERN.is_match(id) {
        Ok(())
    } else {
        Err(ValidationError::InvalidIdFormat(id.to_string()))
    }
}

// ============================================================================
// Memoized validator
// ============================================================================

/// Source of the fact-table map.
#[async_trait]
pub trait FactTableProvider: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn fetch_fact_tables(&self) -> Result<FactTableMap, Self::Error>;
}

/// Validator holding one lazily fetched fact-table map.
///
/// Intended to live for a single request scope; every call after the first
/// reuses the map.
pub struct MetricValidator<P: FactTableProvider> {
    provider: P,
    tables: OnceCell<FactTableMap>,
}

/// Failure of a memoized validation.
#[derive(Debug, thiserror::Error)]
pub enum ValidatorError<E: std::error::Error + 'static> {
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error("failed to load fact tables: {0}")]
    Fetch(#[source] E),
}

impl<P: FactTableProvider> MetricValidator<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            tables: OnceCell::new(),
        }
    }

    /// The fact-table map, fetched on first use.
    pub async fn fact_tables(&self) -> Result<&FactTableMap, P::Error> {
        self.tables
            .get_or_try_init(|| self.provider.fetch_fact_tables())
            .await
    }

    pub async fn validate(
        &self,
        metric: &MetricDefinition,
        entitlements: &dyn Entitlements,
    ) -> Result<(), ValidatorError<P::Error>> {
        let tables = self.fact_tables().await.map_err(ValidatorError::Fetch)?;
        validate_metric(metric, tables, entitlements)?;
        Ok(())
    }
}
