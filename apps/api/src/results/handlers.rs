use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::AppError;
use crate::progress::is_valid_optimization_id;
use crate::results::ResultSummary;
use crate::state::AppState;

const DEFAULT_LIST_LIMIT: usize = 10;
const MAX_LIST_LIMIT: usize = 100;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct ListResultsResponse {
    pub results: Vec<ResultSummary>,
    pub count: usize,
    pub storage: &'static str,
}

/// GET /results/:optimization_id
pub async fn handle_get_result(
    State(state): State<AppState>,
    Path(optimization_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    if !is_valid_optimization_id(&optimization_id) {
        return Err(AppError::Validation(format!(
            "Invalid optimization id '{optimization_id}'"
        )));
    }

    let stored = state.results.get(&optimization_id).await?.ok_or_else(|| {
        AppError::NotFound(format!(
            "Results for {optimization_id} not found or expired"
        ))
    })?;
    Ok(Json(stored.into_response_body(Utc::now())))
}

/// GET /results?limit=N
pub async fn handle_list_results(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ListResultsResponse>, AppError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);
    let results = state.results.list_recent(limit).await?;
    Ok(Json(ListResultsResponse {
        count: results.len(),
        results,
        storage: state.results.backend(),
    }))
}
