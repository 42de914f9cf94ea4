use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use super::{AllowAll, DocumentStore, Permissions, StoreError, StoreResult};
use crate::model::{to_api_metric, upgrade_legacy_metric, ApiMetric, LegacyMetricDocument, ManagedBy, MetricDefinition};
use crate::validation::{
    validate_metric_id, FactTableProvider, FeatureSet, MetricValidator, ValidationError, ValidatorError,
    METRIC_ID_PREFIX,
};

/// Who is calling, and what they may do.
pub struct RequestContext {
    /// True for requests arriving through the public REST API.
    pub is_api_request: bool,
    pub features: FeatureSet,
    pub permissions: Box<dyn Permissions>,
}

impl RequestContext {
    pub fn new(permissions: impl Permissions + 'static) -> Self {
        Self {
            is_api_request: false,
            features: FeatureSet::none(),
            permissions: Box::new(permissions),
        }
    }

    pub fn api(mut self) -> Self {
        self.is_api_request = true;
        self
    }

    pub fn with_features(mut self, features: FeatureSet) -> Self {
        self.features = features;
        self
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new(AllowAll)
    }
}

/// Metric documents scoped to one request.
///
/// The fact-table map is fetched at most once per repository.
pub struct MetricRepository<S, P: FactTableProvider> {
    store: S,
    validator: MetricValidator<P>,
    context: RequestContext,
}

impl<S: DocumentStore, P: FactTableProvider> MetricRepository<S, P> {
    pub fn new(store: S, provider: P, context: RequestContext) -> Self {
        Self {
            store,
            validator: MetricValidator::new(provider),
            context,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    async fn validate(&self, metric: &MetricDefinition) -> StoreResult<()> {
        match self.validator.validate(metric, &self.context.features).await {
            Ok(()) => Ok(()),
            Err(ValidatorError::Invalid(e)) => Err(e.into()),
            Err(ValidatorError::Fetch(e)) => Err(StoreError::Backend(e.to_string())),
        }
    }

    async fn load(&self, id: &str) -> StoreResult<Option<MetricDefinition>> {
        let Some(doc) = self.store.get(id).await? else {
            return Ok(None);
        };
        let legacy: LegacyMetricDocument = serde_json::from_value(doc)?;
        Ok(Some(upgrade_legacy_metric(legacy)))
    }

    async fn load_existing(&self, id: &str) -> StoreResult<MetricDefinition> {
        self.load(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn guard_api_managed(&self, existing: &MetricDefinition, action: &'static str) -> StoreResult<()> {
        if existing.managed_by == ManagedBy::Api && !self.context.is_api_request {
            return Err(ValidationError::ManagedByApi(action).into());
        }
        Ok(())
    }

    /// Store a new metric. An empty id is replaced by a generated one.
    pub async fn create(&self, mut metric: MetricDefinition) -> StoreResult<MetricDefinition> {
        if metric.id.is_empty() {
            metric.id = format!("{}{}", METRIC_ID_PREFIX, Uuid::new_v4().simple());
        }
        validate_metric_id(&metric.id)?;
        if !self.context.permissions.can_create(&metric) {
            return Err(StoreError::PermissionDenied("create"));
        }
        self.validate(&metric).await?;

        let now = Utc::now();
        metric.date_created = Some(now);
        metric.date_updated = Some(now);
        self.store.insert(&metric.id, serde_json::to_value(&metric)?).await?;

        info!(metric = %metric.id, kind = %metric.kind, "metric created");
        Ok(metric)
    }

    /// Fetch a metric, upgrading older document revisions. Unreadable
    /// metrics are reported as absent.
    pub async fn get(&self, id: &str) -> StoreResult<Option<MetricDefinition>> {
        let metric = self.load(id).await?;
        Ok(metric.filter(|m| self.context.permissions.can_read(m)))
    }

    pub async fn get_api(&self, id: &str) -> StoreResult<Option<ApiMetric>> {
        Ok(self.get(id).await?.as_ref().map(to_api_metric))
    }

    /// All readable metrics in id order.
    pub async fn list(&self) -> StoreResult<Vec<MetricDefinition>> {
        let mut metrics = Vec::new();
        for doc in self.store.list().await? {
            let legacy: LegacyMetricDocument = serde_json::from_value(doc)?;
            let metric = upgrade_legacy_metric(legacy);
            if self.context.permissions.can_read(&metric) {
                metrics.push(metric);
            }
        }
        debug!(count = metrics.len(), "listed metrics");
        Ok(metrics)
    }

    /// Replace a metric with `updated`, keeping its id and creation date.
    pub async fn update(&self, id: &str, mut updated: MetricDefinition) -> StoreResult<MetricDefinition> {
        let existing = self.load_existing(id).await?;
        self.guard_api_managed(&existing, "update")?;
        if updated.datasource != existing.datasource {
            return Err(ValidationError::ReadonlyField("datasource").into());
        }
        updated.id = existing.id.clone();
        if !self.context.permissions.can_update(&existing, &updated) {
            return Err(StoreError::PermissionDenied("update"));
        }
        self.validate(&updated).await?;

        updated.date_created = existing.date_created;
        updated.date_updated = Some(Utc::now());
        self.store.replace(id, serde_json::to_value(&updated)?).await?;

        info!(metric = %id, "metric updated");
        Ok(updated)
    }

    pub async fn delete(&self, id: &str) -> StoreResult<()> {
        let existing = self.load_existing(id).await?;
        self.guard_api_managed(&existing, "delete")?;
        if !self.context.permissions.can_delete(&existing) {
            return Err(StoreError::PermissionDenied("delete"));
        }
        self.store.remove(id).await?;

        info!(metric = %id, "metric deleted");
        Ok(())
    }
}
