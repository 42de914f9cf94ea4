//! Script-language analytics backend.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{ScriptExecutor, SourceIntegration, SourceProperties, SourceResult};
use crate::compile::{compile_experiment_query, compile_metric_value_query, CompiledQuery};
use crate::crypto::{decrypt_params, ConnectionParams, KEY_LENGTH};
use crate::decode::{parse_experiment_response, parse_metric_value_response, MetricValueRow, SummaryRow};
use crate::model::{DimensionSpec, EventSettings, ExperimentSettings, MetricDefinition, MetricValueParams};
use crate::script::render_connection_check;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasourceSettings {
    pub events: EventSettings,
}

/// A stored datasource: encrypted params plus event naming.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasourceDocument {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Sealed [`ConnectionParams`], see [`crate::crypto::encrypt_params`].
    pub params: String,
    #[serde(default)]
    pub settings: DatasourceSettings,
}

/// Backend that compiles queries to scripts and hands them to an executor.
pub struct AnalyticsSource<E> {
    datasource: DatasourceDocument,
    params: ConnectionParams,
    decryption_error: bool,
    executor: E,
}

impl<E: ScriptExecutor> AnalyticsSource<E> {
    /// Open a datasource. Params that cannot be decrypted are replaced by
    /// empty ones and flagged with [`Self::decryption_error`].
    pub fn new(mut datasource: DatasourceDocument, key: &[u8; KEY_LENGTH], executor: E) -> Self {
        datasource.settings.events = datasource.settings.events.clone().with_defaults();

        let (params, decryption_error) = match decrypt_params(key, &datasource.params) {
            Ok(params) => (params, false),
            Err(e) => {
                warn!(datasource = %datasource.id, error = %e, "could not decrypt connection params");
                (ConnectionParams::default(), true)
            }
        };

        Self {
            datasource,
            params,
            decryption_error,
            executor,
        }
    }

    pub fn datasource(&self) -> &DatasourceDocument {
        &self.datasource
    }

    pub fn params(&self) -> &ConnectionParams {
        &self.params
    }

    pub fn decryption_error(&self) -> bool {
        self.decryption_error
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// Experiment settings take their event naming from the datasource.
    pub fn experiment_results_query(
        &self,
        settings: &ExperimentSettings,
        metrics: &[MetricDefinition],
        activation: Option<&MetricDefinition>,
        dimension: Option<&DimensionSpec>,
    ) -> CompiledQuery {
        let settings = settings.clone().with_events(&self.datasource.settings.events);
        compile_experiment_query(&settings, metrics, activation, dimension)
    }

    pub fn metric_value_query(&self, params: &MetricValueParams) -> CompiledQuery {
        let mut params = params.clone();
        if params.extra_user_id_property.is_none() {
            params.extra_user_id_property = self.datasource.settings.events.extra_user_id_property.clone();
        }
        compile_metric_value_query(&params)
    }
}

#[async_trait]
impl<E: ScriptExecutor> SourceIntegration for AnalyticsSource<E> {
    async fn get_experiment_results(
        &self,
        settings: &ExperimentSettings,
        metrics: &[MetricDefinition],
        activation: Option<&MetricDefinition>,
        dimension: Option<&DimensionSpec>,
    ) -> SourceResult<Vec<SummaryRow>> {
        let query = self.experiment_results_query(settings, metrics, activation, dimension);
        let body = self.executor.execute(&self.params, query.as_str()).await?;
        let rows = parse_experiment_response(body)?;
        debug!(datasource = %self.datasource.id, rows = rows.len(), "experiment results decoded");
        Ok(rows)
    }

    async fn run_metric_value_query(&self, params: &MetricValueParams) -> SourceResult<Vec<MetricValueRow>> {
        let query = self.metric_value_query(params);
        let body = self.executor.execute(&self.params, query.as_str()).await?;
        Ok(parse_metric_value_response(body)?)
    }

    async fn test_connection(&self) -> SourceResult<bool> {
        let script = render_connection_check(Utc::now().date_naive());
        self.executor.execute(&self.params, &script).await?;
        Ok(true)
    }

    fn source_properties(&self) -> SourceProperties {
        SourceProperties {
            query_language: "javascript".to_string(),
            metric_caps: true,
            segments: true,
            dimensions: true,
            has_settings: true,
            events: true,
        }
    }

    fn sensitive_param_keys(&self) -> &'static [&'static str] {
        &["secret"]
    }
}
