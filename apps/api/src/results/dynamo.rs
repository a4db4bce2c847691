use std::collections::HashMap;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use aws_sdk_dynamodb::error::DisplayErrorContext;
use aws_sdk_dynamodb::types::{
    AttributeDefinition, AttributeValue, BillingMode, KeySchemaElement, KeyType,
    ScalarAttributeType, TableStatus, TimeToLiveSpecification,
};
use aws_sdk_dynamodb::Client;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use tracing::{info, warn};

use super::{ResultStore, ResultSummary, StoreError, StoredResult};

const KEY_ATTR: &str = "optimization_id";
const TTL_ATTR: &str = "ttl";
const TABLE_READY_ATTEMPTS: u32 = 30;

/// DynamoDB-backed result store.
///
/// One item per optimization, keyed by `optimization_id`. The result blob is
/// kept as a JSON string so nested floats and nulls survive unchanged. The
/// table's native TTL on `ttl` purges expired items eventually; reads filter
/// on `ttl` themselves because that purge can lag by days.
#[derive(Clone)]
pub struct DynamoResultStore {
    client: Client,
    table: String,
}

impl DynamoResultStore {
    pub fn new(client: Client, table: impl Into<String>) -> Self {
        Self {
            client,
            table: table.into(),
        }
    }

    /// Creates the table (pay-per-request, hash key `optimization_id`) if it
    /// does not exist, waits for it to become active, and enables TTL.
    pub async fn ensure_table(&self) -> Result<(), StoreError> {
        match self.client.describe_table().table_name(&self.table).send().await {
            Ok(_) => {
                info!("DynamoDB table {} exists", self.table);
                return Ok(());
            }
            Err(err) => {
                let missing = err
                    .as_service_error()
                    .map(|e| e.is_resource_not_found_exception())
                    .unwrap_or(false);
                if !missing {
                    return Err(backend_error(err));
                }
            }
        }

        info!("Creating DynamoDB table {}", self.table);
        let key_def = AttributeDefinition::builder()
            .attribute_name(KEY_ATTR)
            .attribute_type(ScalarAttributeType::S)
            .build()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let key_schema = KeySchemaElement::builder()
            .attribute_name(KEY_ATTR)
            .key_type(KeyType::Hash)
            .build()
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        self.client
            .create_table()
            .table_name(&self.table)
            .attribute_definitions(key_def)
            .key_schema(key_schema)
            .billing_mode(BillingMode::PayPerRequest)
            .send()
            .await
            .map_err(backend_error)?;

        self.wait_until_active().await?;

        let ttl_spec = TimeToLiveSpecification::builder()
            .attribute_name(TTL_ATTR)
            .enabled(true)
            .build()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        if let Err(err) = self
            .client
            .update_time_to_live()
            .table_name(&self.table)
            .time_to_live_specification(ttl_spec)
            .send()
            .await
        {
            // Reads still filter on `ttl`, so a table without native TTL only grows.
            warn!(
                "Could not enable TTL on {}: {}",
                self.table,
                DisplayErrorContext(&err)
            );
        }

        info!("DynamoDB table {} ready", self.table);
        Ok(())
    }

    async fn wait_until_active(&self) -> Result<(), StoreError> {
        for _ in 0..TABLE_READY_ATTEMPTS {
            let output = self
                .client
                .describe_table()
                .table_name(&self.table)
                .send()
                .await
                .map_err(backend_error)?;
            let status = output.table().and_then(|t| t.table_status());
            if status == Some(&TableStatus::Active) {
                return Ok(());
            }
            tokio::time::sleep(StdDuration::from_secs(1)).await;
        }
        Err(StoreError::Backend(format!(
            "table {} did not become active",
            self.table
        )))
    }
}

#[async_trait]
impl ResultStore for DynamoResultStore {
    fn backend(&self) -> &'static str {
        "dynamodb"
    }

    async fn put(&self, id: &str, results: &Value) -> Result<StoredResult, StoreError> {
        let stored = StoredResult::new(id, results.clone(), Utc::now());
        let item = to_item(&stored)?;
        self.client
            .put_item()
            .table_name(&self.table)
            .set_item(Some(item))
            .send()
            .await
            .map_err(backend_error)?;
        info!("Stored result {id} (expires {})", stored.expires_at);
        Ok(stored)
    }

    async fn get(&self, id: &str) -> Result<Option<StoredResult>, StoreError> {
        let output = self
            .client
            .get_item()
            .table_name(&self.table)
            .key(KEY_ATTR, AttributeValue::S(id.to_string()))
            .consistent_read(true)
            .send()
            .await
            .map_err(backend_error)?;

        let Some(item) = output.item() else {
            return Ok(None);
        };
        let stored = from_item(item)?;
        if stored.is_expired(Utc::now()) {
            return Ok(None);
        }
        Ok(Some(stored))
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<ResultSummary>, StoreError> {
        let now = Utc::now();
        let mut summaries = Vec::new();
        let mut start_key: Option<HashMap<String, AttributeValue>> = None;

        loop {
            let output = self
                .client
                .scan()
                .table_name(&self.table)
                .projection_expression(
                    "optimization_id, created_at, #s, profile_score, completeness_score, #t",
                )
                .expression_attribute_names("#s", "status")
                .expression_attribute_names("#t", TTL_ATTR)
                .set_exclusive_start_key(start_key.take())
                .send()
                .await
                .map_err(backend_error)?;

            for item in output.items() {
                match summary_from_item(item, now) {
                    Ok(Some(summary)) => summaries.push(summary),
                    Ok(None) => {}
                    Err(e) => warn!("Skipping unreadable result item: {e}"),
                }
            }

            match output.last_evaluated_key() {
                Some(key) if !key.is_empty() => start_key = Some(key.clone()),
                _ => break,
            }
        }

        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        summaries.truncate(limit);
        Ok(summaries)
    }
}

fn backend_error<E>(err: E) -> StoreError
where
    E: std::error::Error + 'static,
{
    StoreError::Backend(DisplayErrorContext(err).to_string())
}

fn to_item(stored: &StoredResult) -> Result<HashMap<String, AttributeValue>, StoreError> {
    let summary = stored.summary();
    let mut item = HashMap::from([
        (
            KEY_ATTR.to_string(),
            AttributeValue::S(stored.optimization_id.clone()),
        ),
        (
            "results".to_string(),
            AttributeValue::S(serde_json::to_string(&stored.results)?),
        ),
        ("status".to_string(), AttributeValue::S(stored.status.clone())),
        (
            "created_at".to_string(),
            AttributeValue::S(stored.created_at.to_rfc3339()),
        ),
        (
            "expires_at".to_string(),
            AttributeValue::S(stored.expires_at.to_rfc3339()),
        ),
        (
            TTL_ATTR.to_string(),
            AttributeValue::N(stored.expires_at.timestamp().to_string()),
        ),
    ]);
    if let Some(score) = summary.profile_score {
        item.insert("profile_score".to_string(), AttributeValue::N(score.to_string()));
    }
    if let Some(score) = summary.completeness_score {
        item.insert(
            "completeness_score".to_string(),
            AttributeValue::N(score.to_string()),
        );
    }
    Ok(item)
}

fn from_item(item: &HashMap<String, AttributeValue>) -> Result<StoredResult, StoreError> {
    let id = string_attr(item, KEY_ATTR, "?")?;
    let raw = string_attr(item, "results", &id)?;
    let results: Value = serde_json::from_str(&raw).map_err(|e| StoreError::Corrupt {
        id: id.clone(),
        detail: format!("results is not valid JSON: {e}"),
    })?;
    let created_at = time_attr(item, "created_at", &id)?;
    let expires_at = match item.get(TTL_ATTR) {
        Some(_) => ttl_attr(item, &id)?,
        None => time_attr(item, "expires_at", &id)?,
    };
    let status = string_attr(item, "status", &id).unwrap_or_else(|_| "completed".to_string());

    Ok(StoredResult {
        optimization_id: id,
        results,
        status,
        created_at,
        expires_at,
    })
}

/// Builds a listing row from a projected scan item. `None` when expired.
fn summary_from_item(
    item: &HashMap<String, AttributeValue>,
    now: DateTime<Utc>,
) -> Result<Option<ResultSummary>, StoreError> {
    let id = string_attr(item, KEY_ATTR, "?")?;
    if ttl_attr(item, &id)? <= now {
        return Ok(None);
    }
    let number = |name: &str| {
        item.get(name)
            .and_then(|v| v.as_n().ok())
            .and_then(|n| n.parse::<i64>().ok())
    };
    Ok(Some(ResultSummary {
        created_at: time_attr(item, "created_at", &id)?,
        status: string_attr(item, "status", &id).unwrap_or_else(|_| "completed".to_string()),
        profile_score: number("profile_score"),
        completeness_score: number("completeness_score"),
        optimization_id: id,
    }))
}

fn string_attr(
    item: &HashMap<String, AttributeValue>,
    name: &str,
    id: &str,
) -> Result<String, StoreError> {
    item.get(name)
        .and_then(|v| v.as_s().ok())
        .cloned()
        .ok_or_else(|| StoreError::Corrupt {
            id: id.to_string(),
            detail: format!("missing string attribute '{name}'"),
        })
}

fn time_attr(
    item: &HashMap<String, AttributeValue>,
    name: &str,
    id: &str,
) -> Result<DateTime<Utc>, StoreError> {
    let raw = string_attr(item, name, id)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt {
            id: id.to_string(),
            detail: format!("'{name}' is not RFC 3339: {e}"),
        })
}

fn ttl_attr(item: &HashMap<String, AttributeValue>, id: &str) -> Result<DateTime<Utc>, StoreError> {
    item.get(TTL_ATTR)
        .and_then(|v| v.as_n().ok())
        .and_then(|n| n.parse::<i64>().ok())
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        .ok_or_else(|| StoreError::Corrupt {
            id: id.to_string(),
            detail: format!("missing numeric attribute '{TTL_ATTR}'"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn stored_at(now: DateTime<Utc>) -> StoredResult {
        let now = Utc.timestamp_opt(now.timestamp(), 0).single().unwrap();
        StoredResult::new(
            "opt-dynamo1",
            json!({
                "success": true,
                "summary": {"optimization_score": 64, "profile_completeness": 71},
                "content_results": {"sample_posts": [{"engagement": 0.75, "hashtags": null}]}
            }),
            now,
        )
    }

    #[test]
    fn test_item_preserves_blob_and_expiry() {
        let stored = stored_at(Utc::now());
        let item = to_item(&stored).unwrap();
        assert_eq!(
            item.get(TTL_ATTR).unwrap().as_n().unwrap(),
            &stored.expires_at.timestamp().to_string()
        );
        assert_eq!(item.get("profile_score").unwrap().as_n().unwrap(), "64");

        let back = from_item(&item).unwrap();
        assert_eq!(back, stored);
    }

    #[test]
    fn test_summary_from_item_drops_expired() {
        let now = Utc::now();
        let item = to_item(&stored_at(now - Duration::days(31))).unwrap();
        assert_eq!(summary_from_item(&item, now).unwrap(), None);

        let fresh = to_item(&stored_at(now)).unwrap();
        let summary = summary_from_item(&fresh, now).unwrap().unwrap();
        assert_eq!(summary.optimization_id, "opt-dynamo1");
        assert_eq!(summary.completeness_score, Some(71));
    }

    #[test]
    fn test_corrupt_results_attribute_is_reported() {
        let mut item = to_item(&stored_at(Utc::now())).unwrap();
        item.insert("results".to_string(), AttributeValue::S("{not json".to_string()));
        let err = from_item(&item).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { ref id, .. } if id == "opt-dynamo1"));
    }
}
