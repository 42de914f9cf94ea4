//! Backend integrations that run compiled scripts.
//!
//! A [`SourceIntegration`] is the full surface a datasource backend may
//! offer. Script-based backends support experiment results and metric value
//! queries only; every other operation keeps the default body and reports
//! [`SourceError::Unimplemented`].

mod analytics;

pub use analytics::{AnalyticsSource, DatasourceDocument, DatasourceSettings};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::crypto::ConnectionParams;
use crate::decode::{MetricValueRow, SummaryRow};
use crate::model::{DimensionSpec, ExperimentSettings, MetricDefinition, MetricValueParams};

pub type SourceResult<T> = Result<T, SourceError>;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("{0} is not supported by this datasource")]
    Unimplemented(&'static str),

    #[error("script execution failed: {0}")]
    Execution(String),

    #[error("unexpected response shape: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Runs a script against the engine and returns its JSON body.
#[async_trait]
pub trait ScriptExecutor: Send + Sync {
    async fn execute(&self, params: &ConnectionParams, script: &str) -> SourceResult<Value>;
}

/// Capabilities advertised to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceProperties {
    pub query_language: String,
    pub metric_caps: bool,
    pub segments: bool,
    pub dimensions: bool,
    pub has_settings: bool,
    pub events: bool,
}

#[async_trait]
pub trait SourceIntegration: Send + Sync {
    async fn get_experiment_results(
        &self,
        settings: &ExperimentSettings,
        metrics: &[MetricDefinition],
        activation: Option<&MetricDefinition>,
        dimension: Option<&DimensionSpec>,
    ) -> SourceResult<Vec<SummaryRow>>;

    async fn run_metric_value_query(&self, params: &MetricValueParams) -> SourceResult<Vec<MetricValueRow>>;

    async fn test_connection(&self) -> SourceResult<bool>;

    fn source_properties(&self) -> SourceProperties;

    /// Connection param keys that must never be echoed back to clients.
    fn sensitive_param_keys(&self) -> &'static [&'static str] {
        &[]
    }

    async fn run_metric_analysis_query(&self, _script: &str) -> SourceResult<Value> {
        Err(SourceError::Unimplemented("metric analysis"))
    }

    async fn run_experiment_units_query(&self, _script: &str) -> SourceResult<Value> {
        Err(SourceError::Unimplemented("experiment units"))
    }

    async fn run_experiment_aggregate_units_query(&self, _script: &str) -> SourceResult<Value> {
        Err(SourceError::Unimplemented("experiment aggregate units"))
    }

    async fn run_experiment_metric_query(&self, _script: &str) -> SourceResult<Value> {
        Err(SourceError::Unimplemented("experiment metric query"))
    }

    async fn run_drop_table_query(&self, _script: &str) -> SourceResult<Value> {
        Err(SourceError::Unimplemented("drop table"))
    }

    async fn run_past_experiment_query(&self, _script: &str) -> SourceResult<Value> {
        Err(SourceError::Unimplemented("past experiments"))
    }

    async fn run_dimension_slices_query(&self, _script: &str) -> SourceResult<Value> {
        Err(SourceError::Unimplemented("dimension slices"))
    }
}
