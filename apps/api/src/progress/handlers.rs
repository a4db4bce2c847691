use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::errors::{AppError, FailureKind};
use crate::llm_client::TokenUsage;
use crate::progress::{is_valid_optimization_id, JobStatus, ProgressSnapshot, StepMarker};
use crate::results::StoredResult;
use crate::state::AppState;

/// GET /progress/:optimization_id
///
/// Live jobs are answered from the tracker. Once a job has been pruned (or the
/// process restarted) the stored record answers instead: a compiled result
/// reads as a completed run, a failure record as the failed job it was.
pub async fn handle_get_progress(
    State(state): State<AppState>,
    Path(optimization_id): Path<String>,
) -> Result<Json<ProgressSnapshot>, AppError> {
    if !is_valid_optimization_id(&optimization_id) {
        return Err(AppError::Validation(format!(
            "Invalid optimization id '{optimization_id}'"
        )));
    }

    if let Some(snapshot) = state.progress.get(&optimization_id).await {
        return Ok(Json(snapshot));
    }

    debug!("No live job for {optimization_id}, checking result store");
    match state.results.get(&optimization_id).await? {
        Some(stored) => Ok(Json(snapshot_from_stored(
            &stored,
            &state.config.openai_model,
        ))),
        None => Err(AppError::NotFound(format!(
            "Optimization {optimization_id} not found"
        ))),
    }
}

fn snapshot_from_stored(stored: &StoredResult, model: &str) -> ProgressSnapshot {
    // Failed jobs are stored with the tracker's last snapshot
    if let Some(snapshot) = field::<ProgressSnapshot>(&stored.results, "progress") {
        return snapshot;
    }

    let failed = stored.status == "failed";
    let (current_step, completed_steps, progress_percentage) = if failed {
        (None, Vec::new(), 0.0)
    } else {
        (
            Some(StepMarker::OptimizationCompleted),
            StepMarker::ALL.to_vec(),
            100.0,
        )
    };
    ProgressSnapshot {
        optimization_id: stored.optimization_id.clone(),
        status: if failed {
            JobStatus::Failed
        } else {
            JobStatus::Completed
        },
        current_step,
        completed_steps,
        progress_percentage,
        estimated_remaining_seconds: None,
        step_details: Vec::new(),
        error: field(&stored.results, "error"),
        error_kind: field::<FailureKind>(&stored.results, "error_kind"),
        token_usage: field(&stored.results, "token_usage")
            .unwrap_or_else(|| TokenUsage::new(model)),
        persistence_warning: None,
        created_at: stored.created_at,
        updated_at: Utc::now(),
    }
}

fn field<T: DeserializeOwned>(results: &Value, name: &str) -> Option<T> {
    results
        .get(name)
        .filter(|v| !v.is_null())
        .and_then(|v| serde_json::from_value(v.clone()).ok())
}
