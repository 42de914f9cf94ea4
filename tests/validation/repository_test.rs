use async_trait::async_trait;
use expql::model::{fact_table_map, ColumnRef, FactTableMap, FactTableSchema, ManagedBy, MetricDefinition, MetricKind};
use expql::store::{DocumentStore, MemoryStore, MetricRepository, ProjectScoped, RequestContext, StoreError};
use expql::validation::{FactTableProvider, ValidationError};
use serde_json::json;
use std::convert::Infallible;

struct StaticTables;

#[async_trait]
impl FactTableProvider for StaticTables {
    type Error = Infallible;

    async fn fetch_fact_tables(&self) -> Result<FactTableMap, Infallible> {
        Ok(fact_table_map([
            FactTableSchema::new("events", "ds_1").with_filter("web"),
            FactTableSchema::new("orders", "ds_1"),
        ]))
    }
}

fn repo(store: MemoryStore, context: RequestContext) -> MetricRepository<MemoryStore, StaticTables> {
    MetricRepository::new(store, StaticTables, context)
}

fn metric(id: &str) -> MetricDefinition {
    MetricDefinition::new(id, "Purchases", MetricKind::Count, "purchase", ColumnRef::new("events"))
        .with_datasource("ds_1")
}

#[tokio::test]
async fn test_create_assigns_id_and_dates() {
    let repo = repo(MemoryStore::new(), RequestContext::default());

    let created = repo.create(metric("")).await.unwrap();
    assert!(created.id.starts_with("fact__"));
    assert_eq!(created.id.len(), "fact__".len() + 32);
    assert!(created.date_created.is_some());
    assert_eq!(created.date_created, created.date_updated);

    let fetched = repo.get(&created.id).await.unwrap().unwrap();
    assert_eq!(fetched, created);
}

#[tokio::test]
async fn test_create_rejects_bad_ids_and_invalid_metrics() {
    let repo = repo(MemoryStore::new(), RequestContext::default());

    let err = repo.create(metric("purchases")).await.unwrap_err();
    assert!(matches!(err, StoreError::Invalid(ValidationError::InvalidIdFormat(_))));

    let mut bad_filter = metric("fact__bad");
    bad_filter.numerator = ColumnRef::new("events").with_filter("mobile");
    let err = repo.create(bad_filter).await.unwrap_err();
    assert!(matches!(err, StoreError::Invalid(ValidationError::UnknownFilter { .. })));

    repo.create(metric("fact__purchases")).await.unwrap();
    let err = repo.create(metric("fact__purchases")).await.unwrap_err();
    assert!(matches!(err, StoreError::AlreadyExists(_)));
    assert_eq!(repo.store().len().await, 1);
}

#[tokio::test]
async fn test_update_keeps_id_and_creation_date() {
    let repo = repo(MemoryStore::new(), RequestContext::default());
    let created = repo.create(metric("fact__purchases")).await.unwrap();

    let mut changed = metric("fact__ignored");
    changed.name = "All purchases".into();
    changed.numerator = ColumnRef::new("events").with_filter("web");
    let updated = repo.update("fact__purchases", changed).await.unwrap();

    assert_eq!(updated.id, "fact__purchases");
    assert_eq!(updated.name, "All purchases");
    assert_eq!(updated.date_created, created.date_created);
    assert!(repo.get("fact__ignored").await.unwrap().is_none());
}

#[tokio::test]
async fn test_datasource_is_read_only() {
    let repo = repo(MemoryStore::new(), RequestContext::default());
    repo.create(metric("fact__purchases")).await.unwrap();

    let moved = metric("fact__purchases").with_datasource("ds_2");
    let err = repo.update("fact__purchases", moved).await.unwrap_err();
    assert!(matches!(err, StoreError::Invalid(ValidationError::ReadonlyField("datasource"))));
}

#[tokio::test]
async fn test_update_of_missing_metric() {
    let repo = repo(MemoryStore::new(), RequestContext::default());
    let err = repo.update("fact__nope", metric("fact__nope")).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}

fn api_managed_store() -> MemoryStore {
    let mut doc = metric("fact__managed");
    doc.managed_by = ManagedBy::Api;
    MemoryStore::with_documents([("fact__managed".to_string(), serde_json::to_value(&doc).unwrap())])
}

#[tokio::test]
async fn test_api_managed_metrics_need_api_requests() {
    let ui = repo(api_managed_store(), RequestContext::default());
    let err = ui.update("fact__managed", metric("fact__managed")).await.unwrap_err();
    assert!(matches!(err, StoreError::Invalid(ValidationError::ManagedByApi("update"))));
    let err = ui.delete("fact__managed").await.unwrap_err();
    assert!(matches!(err, StoreError::Invalid(ValidationError::ManagedByApi("delete"))));

    let api = repo(api_managed_store(), RequestContext::default().api());
    let mut changed = metric("fact__managed");
    changed.managed_by = ManagedBy::Api;
    changed.name = "Renamed".into();
    assert_eq!(api.update("fact__managed", changed).await.unwrap().name, "Renamed");
    api.delete("fact__managed").await.unwrap();
    assert!(api.store().is_empty().await);
}

#[tokio::test]
async fn test_legacy_documents_are_upgraded_on_read() {
    let legacy = json!({
        "id": "fact__legacy",
        "name": "Legacy",
        "datasource": "ds_1",
        "metricType": "binomial",
        "events": "signup",
        "numerator": {"factTableId": "events"},
        "hasConversionWindow": true,
        "conversionWindowValue": 24
    });
    let repo = repo(
        MemoryStore::with_documents([("fact__legacy".to_string(), legacy)]),
        RequestContext::default(),
    );

    let metric = repo.get("fact__legacy").await.unwrap().unwrap();
    assert_eq!(metric.kind, MetricKind::Proportion);
    assert_eq!(metric.window_settings.window_hours(), 24.0);

    let api = repo.get_api("fact__legacy").await.unwrap().unwrap();
    assert_eq!(api.window_settings.kind, "conversion");
    assert_eq!(repo.list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_project_scoped_permissions() {
    let mut growth = metric("fact__growth");
    growth.projects = vec!["growth".into()];
    let mut billing = metric("fact__billing");
    billing.projects = vec!["billing".into()];
    let shared = metric("fact__shared");

    let store = MemoryStore::new();
    for m in [&growth, &billing, &shared] {
        store.insert(&m.id, serde_json::to_value(m).unwrap()).await.unwrap();
    }
    let repo = repo(store, RequestContext::new(ProjectScoped::new(["growth"])));

    let ids: Vec<String> = repo.list().await.unwrap().into_iter().map(|m| m.id).collect();
    assert_eq!(ids, vec!["fact__growth", "fact__shared"]);
    assert!(repo.get("fact__billing").await.unwrap().is_none());

    let err = repo.delete("fact__billing").await.unwrap_err();
    assert!(matches!(err, StoreError::PermissionDenied("delete")));

    let mut hijack = growth.clone();
    hijack.projects = vec!["billing".into()];
    let err = repo.update("fact__growth", hijack).await.unwrap_err();
    assert!(matches!(err, StoreError::PermissionDenied("update")));

    let mut foreign = metric("fact__foreign");
    foreign.projects = vec!["billing".into()];
    let err = repo.create(foreign).await.unwrap_err();
    assert!(matches!(err, StoreError::PermissionDenied("create")));
}
