//! Workflow state and the stage contract shared by the three executors.
//!
//! A stage takes the `WorkflowState` by value and hands back the next
//! version, so any stage can be driven on its own from a hand-built state.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::errors::FailureKind;
use crate::llm_client::prompts::{PromptError, PromptStore};
use crate::llm_client::{ChatModel, LlmError, TokenUsage, Usage};
use crate::optimizer::models::{AnalysisResult, ContentResult, ProfileData};
use crate::pdf::{PdfError, TextExtractor};
use crate::progress::ProgressError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowPhase {
    NotStarted,
    ProfileExtraction,
    ProfileAnalysis,
    ContentGeneration,
    OptimizationCompleted,
}

impl WorkflowPhase {
    /// The only phase reachable from `self`. Completed has no successor.
    pub fn next(self) -> Option<WorkflowPhase> {
        match self {
            WorkflowPhase::NotStarted => Some(WorkflowPhase::ProfileExtraction),
            WorkflowPhase::ProfileExtraction => Some(WorkflowPhase::ProfileAnalysis),
            WorkflowPhase::ProfileAnalysis => Some(WorkflowPhase::ContentGeneration),
            WorkflowPhase::ContentGeneration => Some(WorkflowPhase::OptimizationCompleted),
            WorkflowPhase::OptimizationCompleted => None,
        }
    }
}

/// Everything the pipeline knows about one optimization.
///
/// `version` is bumped on every change so a stale copy is easy to spot in logs.
#[derive(Debug, Clone)]
pub struct WorkflowState {
    pub optimization_id: String,
    pub version: u32,
    pub phase: WorkflowPhase,
    pub target_role: Option<String>,
    pub pdf: Bytes,
    pub profile_data: Option<ProfileData>,
    pub analysis: Option<AnalysisResult>,
    pub content: Option<ContentResult>,
    pub step_timings: BTreeMap<String, f64>,
    pub token_usage: TokenUsage,
}

impl WorkflowState {
    pub fn new(
        optimization_id: impl Into<String>,
        target_role: Option<String>,
        pdf: Bytes,
        model: &str,
    ) -> Self {
        Self {
            optimization_id: optimization_id.into(),
            version: 0,
            phase: WorkflowPhase::NotStarted,
            target_role,
            pdf,
            profile_data: None,
            analysis: None,
            content: None,
            step_timings: BTreeMap::new(),
            token_usage: TokenUsage::new(model),
        }
    }

    /// Moves to `phase`, which must directly follow the current one.
    pub fn enter(mut self, phase: WorkflowPhase) -> Result<Self, StageError> {
        if self.phase.next() != Some(phase) {
            return Err(StageError::internal(format!(
                "cannot enter {phase:?} from {:?}",
                self.phase
            )));
        }
        self.phase = phase;
        self.version += 1;
        Ok(self)
    }

    /// Books a finished step's duration and token usage.
    pub fn record(&mut self, step: &str, seconds: f64, usage: Option<&Usage>) {
        self.step_timings.insert(step.to_string(), seconds);
        if let Some(usage) = usage {
            self.token_usage.add(usage);
        }
        self.version += 1;
    }
}

/// A stage's return: the next state plus what the tracker should record.
#[derive(Debug)]
pub struct StageOutput {
    pub state: WorkflowState,
    pub usage: Usage,
    pub payload: Value,
}

/// Borrowed collaborators for one job's stages.
#[derive(Clone, Copy)]
pub struct StageContext<'a> {
    pub llm: &'a dyn ChatModel,
    pub prompts: &'a PromptStore,
    pub extractor: &'a dyn TextExtractor,
    pub api_key: &'a str,
}

/// A classified, fatal stage failure.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct StageError {
    pub kind: FailureKind,
    pub message: String,
}

impl StageError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Internal, message)
    }

    /// Prefixes the message with the stage it happened in.
    pub fn context(self, stage: &str) -> Self {
        Self {
            kind: self.kind,
            message: format!("Error in {stage}: {}", self.message),
        }
    }
}

/// `map_err` adapter that converts and tags an error with its stage.
pub fn in_stage<E: Into<StageError>>(stage: &'static str) -> impl FnOnce(E) -> StageError {
    move |err| err.into().context(stage)
}

impl From<LlmError> for StageError {
    fn from(err: LlmError) -> Self {
        let kind = if err.is_auth() {
            FailureKind::Authentication
        } else if err.is_rate_limited() {
            FailureKind::RateLimited
        } else if err.is_malformed_output() {
            FailureKind::MalformedOutput
        } else {
            // Some gateways report bad keys as 400s; fall back to the message text
            FailureKind::classify_message(&err.to_string())
        };
        Self::new(kind, err.to_string())
    }
}

impl From<PdfError> for StageError {
    fn from(err: PdfError) -> Self {
        let kind = match err {
            PdfError::NoText | PdfError::Extraction(_) => FailureKind::Extraction,
            _ => FailureKind::InvalidInput,
        };
        Self::new(kind, err.to_string())
    }
}

impl From<PromptError> for StageError {
    fn from(err: PromptError) -> Self {
        Self::internal(err.to_string())
    }
}

impl From<ProgressError> for StageError {
    fn from(err: ProgressError) -> Self {
        Self::internal(err.to_string())
    }
}

impl From<serde_json::Error> for StageError {
    fn from(err: serde_json::Error) -> Self {
        Self::internal(format!("failed to serialize stage input: {err}"))
    }
}
