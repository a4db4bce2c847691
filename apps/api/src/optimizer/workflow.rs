//! Workflow Coordinator: drives collect → analyze → generate → compile for one job.
//!
//! Flow per job:
//! 1. validate upload, id and credential (rejected before any job exists)
//! 2. create the job in the tracker (`pending`), then `optimization_started`
//! 3. run the three stages in order, each bracketed by begin/complete markers
//! 4. compile the result, persist it, mark `optimization_completed`
//!
//! Any stage error is fatal for the job. Nothing is retried. A failed job's
//! final snapshot is persisted too, so the error outlives the tracker.
//!
//! The pipeline always runs on its own task. Dropping the caller (a closed
//! sync request) never cancels a job halfway.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use serde_json::{json, Value};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::errors::AppError;
use crate::llm_client::prompts::PromptStore;
use crate::llm_client::ChatModel;
use crate::optimizer::analyzer::analyze_profile;
use crate::optimizer::collector::collect_profile;
use crate::optimizer::generator::generate_content;
use crate::optimizer::stage::{
    StageContext, StageError, StageOutput, WorkflowPhase, WorkflowState,
};
use crate::optimizer::summary::OptimizationSummary;
use crate::pdf::{validate_upload, TextExtractor};
use crate::progress::{is_valid_optimization_id, ProgressTracker, StepMarker};
use crate::results::ResultStore;

const MIN_API_KEY_LEN: usize = 20;

/// The subset of `Config` the coordinator needs.
#[derive(Debug, Clone)]
pub struct OptimizerSettings {
    pub default_api_key: Option<String>,
    pub max_file_size: usize,
}

impl OptimizerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            default_api_key: config.openai_api_key.clone(),
            max_file_size: config.max_file_size,
        }
    }
}

/// One upload, as received by the HTTP layer.
#[derive(Debug, Clone)]
pub struct OptimizationRequest {
    pub optimization_id: Option<String>,
    pub filename: String,
    pub pdf: Bytes,
    pub target_role: Option<String>,
    pub api_key: Option<String>,
}

/// A validated request with its resolved id and credential.
struct Job {
    id: String,
    api_key: String,
    state: WorkflowState,
}

#[derive(Clone)]
pub struct Optimizer {
    llm: Arc<dyn ChatModel>,
    prompts: Arc<PromptStore>,
    extractor: Arc<dyn TextExtractor>,
    progress: ProgressTracker,
    results: Arc<dyn ResultStore>,
    settings: Arc<OptimizerSettings>,
}

impl Optimizer {
    pub fn new(
        llm: Arc<dyn ChatModel>,
        prompts: Arc<PromptStore>,
        extractor: Arc<dyn TextExtractor>,
        progress: ProgressTracker,
        results: Arc<dyn ResultStore>,
        settings: OptimizerSettings,
    ) -> Self {
        Self {
            llm,
            prompts,
            extractor,
            progress,
            results,
            settings: Arc::new(settings),
        }
    }

    /// Async flow: registers the job and returns its id while the pipeline runs
    /// in the background.
    pub async fn start(&self, request: OptimizationRequest) -> Result<String, AppError> {
        let job = self.prepare(request)?;
        self.progress.create(&job.id, self.llm.model()).await?;

        let id = job.id.clone();
        let optimizer = self.clone();
        tokio::spawn(async move {
            // Outcome is recorded on the tracker; nobody awaits this task
            optimizer.execute(job).await.ok();
        });

        info!("Optimization {id} accepted");
        Ok(id)
    }

    /// Sync flow: same validation and bookkeeping, but waits for the compiled result.
    pub async fn run(&self, request: OptimizationRequest) -> Result<Value, AppError> {
        let job = self.prepare(request)?;
        self.progress.create(&job.id, self.llm.model()).await?;

        let id = job.id.clone();
        let optimizer = self.clone();
        let pipeline = tokio::spawn(async move { optimizer.execute(job).await });
        match pipeline.await {
            Ok(outcome) => outcome.map_err(|err| AppError::Pipeline {
                kind: err.kind,
                message: err.message,
            }),
            Err(e) => Err(AppError::Internal(anyhow::anyhow!(
                "Optimization {id} task aborted: {e}"
            ))),
        }
    }

    fn prepare(&self, request: OptimizationRequest) -> Result<Job, AppError> {
        let id = match request.optimization_id {
            Some(id) if !is_valid_optimization_id(&id) => {
                return Err(AppError::Validation(format!(
                    "Invalid optimization id '{id}': use 6-50 letters, digits, '-' or '_'"
                )));
            }
            Some(id) => id,
            None => Uuid::new_v4().to_string(),
        };

        validate_upload(&request.filename, &request.pdf, self.settings.max_file_size)
            .map_err(|e| AppError::Validation(e.to_string()))?;

        let api_key = self.resolve_api_key(request.api_key.as_deref())?;

        let state = WorkflowState::new(
            id.clone(),
            request.target_role,
            request.pdf,
            self.llm.model(),
        );
        Ok(Job { id, api_key, state })
    }

    /// Caller-supplied key wins over the server default.
    fn resolve_api_key(&self, caller: Option<&str>) -> Result<String, AppError> {
        match caller.map(str::trim).filter(|k| !k.is_empty()) {
            Some(key) if !key.starts_with("sk-") || key.len() < MIN_API_KEY_LEN => {
                Err(AppError::Validation(
                    "Invalid API key format. OpenAI keys start with 'sk-'.".to_string(),
                ))
            }
            Some(key) => Ok(key.to_string()),
            None => self.settings.default_api_key.clone().ok_or_else(|| {
                AppError::Validation(
                    "An OpenAI API key is required. Provide one with the request.".to_string(),
                )
            }),
        }
    }

    /// Runs the pipeline and records the terminal state on the tracker.
    async fn execute(&self, job: Job) -> Result<Value, StageError> {
        let id = job.id.clone();
        let started = Instant::now();

        match self.drive(job).await {
            Ok(results) => {
                info!(
                    "Optimization {id} completed in {:.2}s",
                    started.elapsed().as_secs_f64()
                );
                Ok(results)
            }
            Err(err) => {
                error!(
                    "Optimization {id} failed ({:?}) after {:.2}s: {}",
                    err.kind,
                    started.elapsed().as_secs_f64(),
                    err.message
                );
                if let Err(e) = self.progress.fail(&id, err.kind, &err.message).await {
                    warn!("Could not mark {id} as failed: {e}");
                }
                self.persist_failure(&id, &err).await;
                Err(err)
            }
        }
    }

    async fn drive(&self, job: Job) -> Result<Value, StageError> {
        let Job { id, api_key, state } = job;
        self.progress.start(&id).await?;

        let ctx = StageContext {
            llm: self.llm.as_ref(),
            prompts: self.prompts.as_ref(),
            extractor: self.extractor.as_ref(),
            api_key: &api_key,
        };

        let state = self
            .step(&id, StepMarker::ProfileExtraction, collect_profile(&ctx, state))
            .await?;
        let state = self
            .step(&id, StepMarker::ProfileAnalysis, analyze_profile(&ctx, state))
            .await?;
        let state = self
            .step(&id, StepMarker::ContentGeneration, generate_content(&ctx, state))
            .await?;

        let compile_started = Instant::now();
        let mut state = state.enter(WorkflowPhase::OptimizationCompleted)?;
        state.record(
            "results_compilation",
            compile_started.elapsed().as_secs_f64(),
            None,
        );
        let mut results = compile_results(&state)?;
        info!(
            "Compiled results for {id} (state v{}, {} tokens)",
            state.version, state.token_usage.total_tokens
        );

        let warning = match self.results.put(&id, &results).await {
            Ok(_) => None,
            Err(e) => {
                warn!("Result for {id} not persisted ({}): {e}", self.results.backend());
                Some(format!("Results could not be saved: {e}"))
            }
        };
        self.progress.complete(&id, warning.clone()).await?;

        if let (Some(warning), Value::Object(map)) = (warning, &mut results) {
            map.insert("persistence_warning".to_string(), Value::String(warning));
        }
        Ok(results)
    }

    /// Stores the failed job's final snapshot under the same 30-day expiry as results.
    async fn persist_failure(&self, id: &str, err: &StageError) {
        let record = json!({
            "success": false,
            "status": "failed",
            "optimization_id": id,
            "error": err.message,
            "error_kind": err.kind,
            "progress": self.progress.get(id).await,
        });
        if let Err(e) = self.results.put(id, &record).await {
            warn!("Failure record for {id} not persisted ({}): {e}", self.results.backend());
        }
    }

    /// Brackets one stage with its tracker markers.
    async fn step<F>(&self, id: &str, marker: StepMarker, stage: F) -> Result<WorkflowState, StageError>
    where
        F: Future<Output = Result<StageOutput, StageError>>,
    {
        self.progress.begin_step(id, marker).await?;
        let output = stage.await?;
        self.progress
            .complete_step(id, marker, Some(output.payload), Some(&output.usage))
            .await?;
        Ok(output.state)
    }
}

/// Assembles the response envelope that is stored and returned to clients.
fn compile_results(state: &WorkflowState) -> Result<Value, StageError> {
    let (profile, analysis, content) = match (&state.profile_data, &state.analysis, &state.content)
    {
        (Some(p), Some(a), Some(c)) => (p, a, c),
        _ => return Err(StageError::internal("Error compiling results: stage output missing")),
    };
    let summary = OptimizationSummary::build(profile, analysis, content);

    Ok(json!({
        "success": true,
        "status": "completed",
        "optimization_id": state.optimization_id,
        "profile_data": profile,
        "analysis_results": analysis,
        "content_results": content,
        "summary": summary,
        "recommendations_count": analysis.next_steps.len(),
        "content_ideas_count": content.content_ideas.len(),
        "sample_posts_count": content.sample_posts.len(),
        "step_timings": state.step_timings,
        "token_usage": state.token_usage,
    }))
}
