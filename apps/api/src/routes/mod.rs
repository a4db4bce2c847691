pub mod health;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};

use crate::optimizer::handlers::handle_optimize_profile;
use crate::progress::handlers::handle_get_progress;
use crate::results::handlers::{handle_get_result, handle_list_results};
use crate::state::AppState;

/// Room for multipart boundaries and the text fields on top of the file itself.
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

pub fn build_router(state: AppState) -> Router {
    let body_limit = state.config.max_file_size + MULTIPART_OVERHEAD;

    Router::new()
        .route("/", get(health::root_handler))
        .route("/health", get(health::health_handler))
        .route("/optimize-profile", post(handle_optimize_profile))
        .route("/progress/:optimization_id", get(handle_get_progress))
        .route("/results", get(handle_list_results))
        .route("/results/:optimization_id", get(handle_get_result))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}
