use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::RwLock;

use super::{ResultStore, ResultSummary, StoreError, StoredResult};

/// Process-local result store. Results do not survive a restart.
#[derive(Clone, Default)]
pub struct InMemoryResultStore {
    entries: Arc<RwLock<HashMap<String, StoredResult>>>,
}

impl InMemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put_at(&self, id: &str, results: &Value, now: DateTime<Utc>) -> StoredResult {
        let stored = StoredResult::new(id, results.clone(), now);
        self.entries
            .write()
            .await
            .insert(id.to_string(), stored.clone());
        stored
    }

    pub async fn get_at(&self, id: &str, now: DateTime<Utc>) -> Option<StoredResult> {
        let mut entries = self.entries.write().await;
        match entries.get(id) {
            Some(stored) if stored.is_expired(now) => {
                entries.remove(id);
                None
            }
            other => other.cloned(),
        }
    }

    pub async fn list_recent_at(&self, limit: usize, now: DateTime<Utc>) -> Vec<ResultSummary> {
        let entries = self.entries.read().await;
        let mut live: Vec<&StoredResult> =
            entries.values().filter(|s| !s.is_expired(now)).collect();
        live.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        live.into_iter().take(limit).map(StoredResult::summary).collect()
    }
}

#[async_trait]
impl ResultStore for InMemoryResultStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn put(&self, id: &str, results: &Value) -> Result<StoredResult, StoreError> {
        Ok(self.put_at(id, results, Utc::now()).await)
    }

    async fn get(&self, id: &str) -> Result<Option<StoredResult>, StoreError> {
        Ok(self.get_at(id, Utc::now()).await)
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<ResultSummary>, StoreError> {
        Ok(self.list_recent_at(limit, Utc::now()).await)
    }
}
