//! Persistence of metric definitions.
//!
//! Documents live in a keyed [`DocumentStore`] as JSON. [`MetricRepository`]
//! layers the metric rules on top: id assignment and format, permissions,
//! API ownership, read-only fields, validation, and migration of legacy
//! documents on read.

mod memory;
mod repository;

pub use memory::MemoryStore;
pub use repository::{MetricRepository, RequestContext};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::model::MetricDefinition;
use crate::validation::ValidationError;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("metric '{0}' not found")]
    NotFound(String),

    #[error("metric '{0}' already exists")]
    AlreadyExists(String),

    #[error("permission denied: cannot {0} metric")]
    PermissionDenied(&'static str),

    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error("stored document is malformed: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("store backend error: {0}")]
    Backend(String),
}

/// Keyed JSON document storage.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, id: &str) -> StoreResult<Option<Value>>;

    /// Insert a new document; fails with `AlreadyExists` on a taken id.
    async fn insert(&self, id: &str, doc: Value) -> StoreResult<()>;

    /// Replace an existing document; fails with `NotFound` otherwise.
    async fn replace(&self, id: &str, doc: Value) -> StoreResult<()>;

    /// Returns whether a document was removed.
    async fn remove(&self, id: &str) -> StoreResult<bool>;

    /// All documents in id order.
    async fn list(&self) -> StoreResult<Vec<Value>>;
}

/// Per-caller authorization over metric documents.
pub trait Permissions: Send + Sync {
    fn can_read(&self, metric: &MetricDefinition) -> bool;
    fn can_create(&self, metric: &MetricDefinition) -> bool;
    fn can_update(&self, existing: &MetricDefinition, updated: &MetricDefinition) -> bool;
    fn can_delete(&self, metric: &MetricDefinition) -> bool;
}

/// Grants everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl Permissions for AllowAll {
    fn can_read(&self, _metric: &MetricDefinition) -> bool {
        true
    }

    fn can_create(&self, _metric: &MetricDefinition) -> bool {
        true
    }

    fn can_update(&self, _existing: &MetricDefinition, _updated: &MetricDefinition) -> bool {
        true
    }

    fn can_delete(&self, _metric: &MetricDefinition) -> bool {
        true
    }
}

/// Read access limited to metrics in the given projects.
///
/// A metric with no projects is visible to everyone; writes need read access
/// to both the old and new project sets.
#[derive(Debug, Clone, Default)]
pub struct ProjectScoped {
    pub projects: Vec<String>,
}

impl ProjectScoped {
    pub fn new(projects: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            projects: projects.into_iter().map(Into::into).collect(),
        }
    }

    fn allows(&self, metric: &MetricDefinition) -> bool {
        metric.projects.is_empty() || metric.projects.iter().any(|p| self.projects.contains(p))
    }
}

impl Permissions for ProjectScoped {
    fn can_read(&self, metric: &MetricDefinition) -> bool {
        self.allows(metric)
    }

    fn can_create(&self, metric: &MetricDefinition) -> bool {
        self.allows(metric)
    }

    fn can_update(&self, existing: &MetricDefinition, updated: &MetricDefinition) -> bool {
        self.allows(existing) && self.allows(updated)
    }

    fn can_delete(&self, metric: &MetricDefinition) -> bool {
        self.allows(metric)
    }
}
