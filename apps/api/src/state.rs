use std::sync::Arc;

use crate::config::Config;
use crate::optimizer::Optimizer;
use crate::progress::ProgressTracker;
use crate::results::ResultStore;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub optimizer: Optimizer,
    /// Same tracker the optimizer writes to; handlers only read it.
    pub progress: ProgressTracker,
    /// Pluggable result store. DynamoDB when AWS credentials are set, in-memory otherwise.
    pub results: Arc<dyn ResultStore>,
}
