//! Metric, fact table, experiment and event types.

pub mod api;
pub mod event;
pub mod experiment;
pub mod fact_table;
pub mod legacy;
pub mod metric;

pub use api::{to_api_metric, ApiMetric};
pub use event::Event;
pub use experiment::{
    DimensionSpec, EventSettings, ExperimentSettings, MetricOverride, MetricValueParams,
    SegmentSpec,
};
pub use fact_table::{fact_table_map, ColumnDatatype, FactTableMap, FactTableSchema};
pub use legacy::{upgrade_legacy_metric, LegacyMetricDocument};
pub use metric::{
    Aggregation, CappingKind, CappingSettings, ColumnRef, Condition, ConditionOperator,
    ManagedBy, MetricDefinition, MetricKind, PriorSettings, QuantileSettings, QuantileType,
    TimeUnit, WindowKind, WindowSettings,
};
