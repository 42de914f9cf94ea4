use async_trait::async_trait;
use expql::model::{
    fact_table_map, ColumnDatatype, ColumnRef, FactTableMap, FactTableSchema, MetricDefinition,
    MetricKind, QuantileSettings, QuantileType,
};
use expql::validation::{
    validate_metric, FactTableProvider, FeatureSet, MetricValidator, PremiumFeature, RefSide,
    ValidationError, ValidatorError,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn tables() -> FactTableMap {
    fact_table_map([
        FactTableSchema::new("orders", "warehouse")
            .with_filter("paid")
            .with_column("amount", ColumnDatatype::Number)
            .with_column("currency", ColumnDatatype::String),
        FactTableSchema::new("sessions", "warehouse").with_filter("mobile"),
        FactTableSchema::new("clicks", "lake"),
    ])
}

fn metric(kind: MetricKind) -> MetricDefinition {
    MetricDefinition::new("fact__orders", "Orders", kind, "purchase", ColumnRef::new("orders"))
        .with_datasource("warehouse")
}

fn validate(metric: &MetricDefinition) -> Result<(), ValidationError> {
    validate_metric(metric, &tables(), &FeatureSet::all())
}

#[test]
fn test_unknown_numerator_table_and_filter() {
    let mut m = metric(MetricKind::Count);
    m.numerator = ColumnRef::new("missing");
    assert_eq!(
        validate(&m),
        Err(ValidationError::UnknownFactTable {
            side: RefSide::Numerator,
            fact_table_id: "missing".into()
        })
    );

    let mut m = metric(MetricKind::Count);
    m.numerator = ColumnRef::new("orders").with_filter("paid").with_filter("refunded");
    assert_eq!(
        validate(&m),
        Err(ValidationError::UnknownFilter {
            side: RefSide::Numerator,
            filter_id: "refunded".into()
        })
    );
}

#[test]
fn test_ratio_without_denominator() {
    assert_eq!(validate(&metric(MetricKind::Ratio)), Err(ValidationError::MissingDenominator));
}

#[test]
fn test_ratio_across_datasources() {
    let m = metric(MetricKind::Ratio).with_denominator(ColumnRef::new("clicks"));
    assert_eq!(
        validate(&m),
        Err(ValidationError::CrossDatasourceRatio {
            numerator: "warehouse".into(),
            denominator: "lake".into()
        })
    );
}

#[test]
fn test_ratio_denominator_rules() {
    let same_table = metric(MetricKind::Ratio).with_denominator(ColumnRef::new("orders").with_filter("unknown"));
    assert_eq!(validate(&same_table), Ok(()));

    let other_table = metric(MetricKind::Ratio).with_denominator(ColumnRef::new("sessions").with_filter("mobile"));
    assert_eq!(validate(&other_table), Ok(()));

    let bad_filter = metric(MetricKind::Ratio).with_denominator(ColumnRef::new("sessions").with_filter("desktop"));
    assert_eq!(
        validate(&bad_filter),
        Err(ValidationError::UnknownFilter {
            side: RefSide::Denominator,
            filter_id: "desktop".into()
        })
    );

    let missing = metric(MetricKind::Ratio).with_denominator(ColumnRef::new("nope"));
    assert!(matches!(
        validate(&missing),
        Err(ValidationError::UnknownFactTable { side: RefSide::Denominator, .. })
    ));
}

#[test]
fn test_denominator_on_non_ratio() {
    let m = metric(MetricKind::Mean).with_denominator(ColumnRef::new("sessions"));
    assert_eq!(validate(&m), Err(ValidationError::DenominatorNotAllowed));

    let empty = metric(MetricKind::Mean).with_denominator(ColumnRef::default());
    assert_eq!(validate(&empty), Ok(()));
}

#[test]
fn test_risk_ordering() {
    let mut m = metric(MetricKind::Count);
    m.lose_risk = 0.05;
    m.win_risk = 0.1;
    assert!(matches!(validate(&m), Err(ValidationError::InvalidRiskThresholds { .. })));

    m.lose_risk = 0.1;
    assert_eq!(validate(&m), Ok(()));
}

#[test]
fn test_percent_change_ordering() {
    let mut m = metric(MetricKind::Count);
    m.min_percent_change = 0.5;
    m.max_percent_change = 0.5;
    assert!(matches!(
        validate(&m),
        Err(ValidationError::InvalidPercentChangeThresholds { .. })
    ));
}

#[test]
fn test_premium_kinds() {
    let quantile = metric(MetricKind::Quantile);
    assert_eq!(
        validate_metric(&quantile, &tables(), &FeatureSet::none()),
        Err(ValidationError::PremiumFeatureRequired(PremiumFeature::QuantileMetrics))
    );
    assert_eq!(validate(&quantile), Err(ValidationError::MissingQuantileSettings));

    let mut with_settings = quantile.clone();
    with_settings.quantile_settings = Some(QuantileSettings {
        kind: QuantileType::Event,
        quantile: 0.9,
        ignore_zeros: false,
    });
    assert_eq!(validate(&with_settings), Ok(()));

    let retention = metric(MetricKind::Retention);
    assert_eq!(
        validate_metric(&retention, &tables(), &FeatureSet::none()),
        Err(ValidationError::PremiumFeatureRequired(PremiumFeature::RetentionMetrics))
    );
    assert_eq!(
        validate_metric(&retention, &tables(), &FeatureSet::none().with(PremiumFeature::RetentionMetrics)),
        Ok(())
    );
}

#[test]
fn test_aggregate_filter_accepts_valid_expression() {
    let mut m = metric(MetricKind::Proportion);
    m.numerator = m.numerator.with_aggregate_filter("amount", ">= 10, < 500.5");
    assert_eq!(validate(&m), Ok(()));

    let mut m = metric(MetricKind::Retention);
    m.numerator = m.numerator.with_aggregate_filter("$$count", "=1");
    assert_eq!(validate(&m), Ok(()));
}

#[test]
fn test_checks_run_in_order() {
    // Both the aggregate filter and the risk thresholds are wrong; the
    // earlier check wins.
    let mut m = metric(MetricKind::Count);
    m.numerator = m.numerator.with_aggregate_filter("amount", ">1");
    m.lose_risk = 0.0;
    m.win_risk = 1.0;
    assert!(matches!(
        validate(&m),
        Err(ValidationError::AggregateFilterNotSupported { kind: MetricKind::Count })
    ));
}

#[test]
fn test_validation_is_deterministic() {
    let m = metric(MetricKind::Ratio).with_denominator(ColumnRef::new("clicks"));
    let first = validate(&m);
    for _ in 0..5 {
        assert_eq!(validate(&m), first);
    }
}

#[test]
fn test_error_messages() {
    let err = ValidationError::UnknownFilter {
        side: RefSide::Denominator,
        filter_id: "f1".into(),
    };
    assert_eq!(err.to_string(), "Invalid denominator filter id: f1");
    assert_eq!(
        ValidationError::PremiumFeatureRequired(PremiumFeature::QuantileMetrics).to_string(),
        "Quantile metrics are a premium feature"
    );
}

struct CountingProvider {
    calls: Arc<AtomicUsize>,
}

#[derive(Debug, thiserror::Error)]
#[error("fact tables unavailable")]
struct Unavailable;

#[async_trait]
impl FactTableProvider for CountingProvider {
    type Error = Unavailable;

    async fn fetch_fact_tables(&self) -> Result<FactTableMap, Unavailable> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(tables())
    }
}

struct FailingProvider;

#[async_trait]
impl FactTableProvider for FailingProvider {
    type Error = Unavailable;

    async fn fetch_fact_tables(&self) -> Result<FactTableMap, Unavailable> {
        Err(Unavailable)
    }
}

#[tokio::test]
async fn test_validator_fetches_fact_tables_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let validator = MetricValidator::new(CountingProvider { calls: calls.clone() });
    let features = FeatureSet::none();

    validator.validate(&metric(MetricKind::Count), &features).await.unwrap();
    validator.validate(&metric(MetricKind::Mean), &features).await.unwrap();
    let err = validator.validate(&metric(MetricKind::Ratio), &features).await.unwrap_err();

    assert!(matches!(err, ValidatorError::Invalid(ValidationError::MissingDenominator)));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_validator_propagates_fetch_errors() {
    let validator = MetricValidator::new(FailingProvider);
    let err = validator
        .validate(&metric(MetricKind::Count), &FeatureSet::all())
        .await
        .unwrap_err();
    assert!(matches!(err, ValidatorError::Fetch(Unavailable)));
}
