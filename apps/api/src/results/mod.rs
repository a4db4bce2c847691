//! Result Store: compiled optimization results, kept for 30 days.
//!
//! Two backends implement `ResultStore`:
//! - `DynamoResultStore`: the hosted table, used when AWS credentials are configured.
//! - `InMemoryResultStore`: process-local fallback, also used by tests.
//!
//! Both treat an entry past its expiry as absent, whether or not it has been purged yet.

pub mod dynamo;
pub mod handlers;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

pub use dynamo::DynamoResultStore;
pub use memory::InMemoryResultStore;

/// Retention window for stored results.
pub fn result_ttl() -> Duration {
    Duration::days(30)
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Stored result for {id} is corrupt: {detail}")]
    Corrupt { id: String, detail: String },

    #[error("Failed to serialize result: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A persisted result blob plus its bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredResult {
    pub optimization_id: String,
    pub results: Value,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl StoredResult {
    pub fn new(optimization_id: &str, results: Value, now: DateTime<Utc>) -> Self {
        Self {
            optimization_id: optimization_id.to_string(),
            status: status_of(&results).to_string(),
            results,
            created_at: now,
            expires_at: now + result_ttl(),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn summary(&self) -> ResultSummary {
        let score = |field: &str| {
            self.results
                .get("summary")
                .and_then(|s| s.get(field))
                .and_then(Value::as_i64)
        };
        ResultSummary {
            optimization_id: self.optimization_id.clone(),
            created_at: self.created_at,
            status: self.status.clone(),
            profile_score: score("optimization_score"),
            completeness_score: score("profile_completeness"),
        }
    }

    /// The blob as served by `GET /results/{id}`, with `storage_info` attached.
    pub fn into_response_body(self, retrieved_at: DateTime<Utc>) -> Value {
        let storage_info = json!({
            "optimization_id": self.optimization_id,
            "created_at": self.created_at,
            "expires_at": self.expires_at,
            "status": self.status,
            "retrieved_at": retrieved_at,
        });
        match self.results {
            Value::Object(mut map) => {
                map.insert("storage_info".to_string(), storage_info);
                Value::Object(map)
            }
            other => json!({ "results": other, "storage_info": storage_info }),
        }
    }
}

/// One row of `GET /results`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultSummary {
    pub optimization_id: String,
    pub created_at: DateTime<Utc>,
    pub status: String,
    pub profile_score: Option<i64>,
    pub completeness_score: Option<i64>,
}

fn status_of(results: &Value) -> &'static str {
    if results.get("success").and_then(Value::as_bool).unwrap_or(false) {
        "completed"
    } else {
        "failed"
    }
}

/// Keyed, TTL'd result persistence. Carried in `AppState` as `Arc<dyn ResultStore>`.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Backend name for health output and logs.
    fn backend(&self) -> &'static str;

    /// Upserts `results` under `id`, resetting its expiry to 30 days from now.
    async fn put(&self, id: &str, results: &Value) -> Result<StoredResult, StoreError>;

    /// Returns the unexpired result for `id`, if any.
    async fn get(&self, id: &str) -> Result<Option<StoredResult>, StoreError>;

    /// Newest unexpired results first, at most `limit`.
    async fn list_recent(&self, limit: usize) -> Result<Vec<ResultSummary>, StoreError>;
}
