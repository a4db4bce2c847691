use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use serde_json::json;
use tracing::info;

use crate::errors::AppError;
use crate::optimizer::OptimizationRequest;
use crate::state::AppState;

/// POST /optimize-profile
///
/// Multipart fields: `file` (required), `target_role`, `optimization_id`, `api_key`.
/// With an `optimization_id` the job runs in the background and this returns 202;
/// without one the request waits for the full result.
pub async fn handle_optimize_profile(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let mut upload: Option<(String, Bytes)> = None;
    let mut target_role = None;
    let mut optimization_id = None;
    let mut api_key = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Invalid multipart body: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::Validation(format!("Could not read upload: {e}")))?;
                upload = Some((filename, data));
            }
            "target_role" | "optimization_id" | "api_key" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| AppError::Validation(format!("Invalid field '{name}': {e}")))?;
                let value = Some(value.trim().to_string()).filter(|v| !v.is_empty());
                match name.as_str() {
                    "target_role" => target_role = value,
                    "optimization_id" => optimization_id = value,
                    _ => api_key = value,
                }
            }
            _ => {}
        }
    }

    let (filename, pdf) =
        upload.ok_or_else(|| AppError::Validation("No file uploaded".to_string()))?;
    info!(
        "Upload received: {filename} ({} bytes), target role: {}",
        pdf.len(),
        target_role.as_deref().unwrap_or("none")
    );

    let is_async = optimization_id.is_some();
    let request = OptimizationRequest {
        optimization_id,
        filename,
        pdf,
        target_role,
        api_key,
    };

    if is_async {
        let id = state.optimizer.start(request).await?;
        let body = json!({
            "success": true,
            "message": format!("Optimization started. Poll /progress/{id} for updates."),
            "optimization_id": id,
            "status": "processing",
        });
        Ok((StatusCode::ACCEPTED, Json(body)).into_response())
    } else {
        let results = state.optimizer.run(request).await?;
        Ok(Json(results).into_response())
    }
}
