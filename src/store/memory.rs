use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use super::{DocumentStore, StoreError, StoreResult};

/// In-process store, used by tests and the CLI.
#[derive(Debug, Default)]
pub struct MemoryStore {
    docs: RwLock<BTreeMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with raw documents, e.g. legacy revisions loaded from disk.
    pub fn with_documents(docs: impl IntoIterator<Item = (String, Value)>) -> Self {
        Self {
            docs: RwLock::new(docs.into_iter().collect()),
        }
    }

    pub async fn len(&self) -> usize {
        self.docs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.docs.read().await.is_empty()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, id: &str) -> StoreResult<Option<Value>> {
        Ok(self.docs.read().await.get(id).cloned())
    }

    async fn insert(&self, id: &str, doc: Value) -> StoreResult<()> {
        let mut docs = self.docs.write().await;
        if docs.contains_key(id) {
            return Err(StoreError::AlreadyExists(id.to_string()));
        }
        docs.insert(id.to_string(), doc);
        Ok(())
    }

    async fn replace(&self, id: &str, doc: Value) -> StoreResult<()> {
        match self.docs.write().await.get_mut(id) {
            Some(slot) => {
                *slot = doc;
                Ok(())
            }
            None => Err(StoreError::NotFound(id.to_string())),
        }
    }

    async fn remove(&self, id: &str) -> StoreResult<bool> {
        Ok(self.docs.write().await.remove(id).is_some())
    }

    async fn list(&self) -> StoreResult<Vec<Value>> {
        Ok(self.docs.read().await.values().cloned().collect())
    }
}
