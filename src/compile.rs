//! End-to-end compilation from definitions to engine scripts.
//!
//! ```text
//! ExperimentSettings + [MetricDefinition] ──► ExperimentPlan ──► script
//! MetricValueParams                       ──► MetricValuePlan ──► script
//! ```
//!
//! Compilation is pure and never fails: definitions are expected to have
//! passed [`crate::validation::validate_metric`] first.
//!
//! # Example
//!
//! ```ignore
//! use expql::compile::compile_experiment_query;
//! use expql::model::{ColumnRef, ExperimentSettings, MetricDefinition, MetricKind};
//!
//! let settings = ExperimentSettings::new("checkout-redesign", start, end);
//! let purchases = MetricDefinition::new(
//!     "fact__purchases", "Purchases", MetricKind::Count, "purchase", ColumnRef::new("events"),
//! );
//! let query = compile_experiment_query(&settings, &[purchases], None, None);
//! println!("{}", query);
//! ```

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use tracing::debug;

use crate::model::{DimensionSpec, ExperimentSettings, MetricDefinition, MetricValueParams};
use crate::plan::{ExperimentPlan, MetricValuePlan};
use crate::script;

// ============================================================================
// Result Types
// ============================================================================

/// A rendered engine script.
///
/// Byte-identical for identical inputs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompiledQuery {
    script: String,
}

impl CompiledQuery {
    pub fn new(script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.script
    }

    pub fn into_string(self) -> String {
        self.script
    }

    /// SHA-256 of the script text as 64 lowercase hex characters.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.script.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

impl fmt::Display for CompiledQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.script)
    }
}

// ============================================================================
// Compilation Functions
// ============================================================================

/// Compile an experiment results query.
pub fn compile_experiment_query(
    settings: &ExperimentSettings,
    metrics: &[MetricDefinition],
    activation: Option<&MetricDefinition>,
    dimension: Option<&DimensionSpec>,
) -> CompiledQuery {
    let plan = ExperimentPlan::build(settings, metrics, activation, dimension);
    let query = CompiledQuery::new(script::render_experiment(&plan));
    debug!(
        experiment = %settings.experiment_id,
        metrics = plan.metrics.len(),
        activation = plan.activation.is_some(),
        dimension = plan.dimension.is_some(),
        early_start = plan.has_early_start(),
        fingerprint = %query.fingerprint(),
        "compiled experiment query"
    );
    query
}

/// Compile a standalone metric-value query.
pub fn compile_metric_value_query(params: &MetricValueParams) -> CompiledQuery {
    let plan = MetricValuePlan::build(params);
    let query = CompiledQuery::new(script::render_metric_value(&plan));
    debug!(
        metric = %params.metric.id,
        segment = plan.segment.is_some(),
        by_date = plan.include_by_date,
        fingerprint = %query.fingerprint(),
        "compiled metric value query"
    );
    query
}
