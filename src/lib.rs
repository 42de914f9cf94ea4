//! # expql
//!
//! Compiles experiment and metric definitions into event-analytics query
//! scripts, and validates metric definitions before they are stored.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │   MetricDefinition / ExperimentSettings / FactTables     │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [validation]
//! ┌─────────────────────────────────────────────────────────┐
//! │        ExperimentPlan / MetricValuePlan  (plan)          │
//! │    predicates, window bounds, aggregation, capping       │
//! └─────────────────────────────────────────────────────────┘
//!              │                               │
//!              ▼ [script]                      ▼ [engine]
//! ┌──────────────────────────┐   ┌──────────────────────────┐
//! │  CompiledQuery (script)  │   │  reference interpreter   │
//! └──────────────────────────┘   └──────────────────────────┘
//!              │ [source: executor]            │
//!              ▼                               ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │          raw rows ──► [decode] ──► SummaryRow            │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! Metric documents are persisted through [`store::MetricRepository`], which
//! upgrades legacy revisions on read and runs the validator on write.

pub mod compile;
pub mod config;
pub mod crypto;
pub mod decode;
pub mod engine;
pub mod model;
pub mod plan;
pub mod script;
pub mod source;
pub mod store;
pub mod validation;
pub mod window;

pub mod prelude {
    pub use crate::compile::{compile_experiment_query, compile_metric_value_query, CompiledQuery};
    pub use crate::decode::{MetricSummary, MetricValueRow, SummaryRow};
    pub use crate::model::{
        ColumnRef, Condition, ConditionOperator, DimensionSpec, Event, EventSettings,
        ExperimentSettings, FactTableSchema, MetricDefinition, MetricKind, MetricValueParams,
    };
    pub use crate::validation::{validate_metric, ValidationError};
}

pub use compile::{compile_experiment_query, compile_metric_value_query, CompiledQuery};
pub use validation::{validate_metric, ValidationError};
