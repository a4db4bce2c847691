//! Progress Tracker: in-memory job records keyed by optimization id.
//!
//! One writer per job (its pipeline task), any number of polling readers.
//! Every mutation is applied under a single write lock and validated against
//! the fixed marker order, so a reader can never observe a later step marked
//! complete while an earlier one is not.

pub mod handlers;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::errors::FailureKind;
use crate::llm_client::{TokenUsage, Usage};

/// Fallback per-step estimate until a stage has actually been timed.
const DEFAULT_STEP_SECONDS: f64 = 30.0;

// ────────────────────────────────────────────────────────────────────────────
// Markers and statuses
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepMarker {
    OptimizationStarted,
    ProfileExtraction,
    ProfileAnalysis,
    ContentGeneration,
    OptimizationCompleted,
}

impl StepMarker {
    pub const ALL: [StepMarker; 5] = [
        StepMarker::OptimizationStarted,
        StepMarker::ProfileExtraction,
        StepMarker::ProfileAnalysis,
        StepMarker::ContentGeneration,
        StepMarker::OptimizationCompleted,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StepMarker::OptimizationStarted => "optimization_started",
            StepMarker::ProfileExtraction => "profile_extraction",
            StepMarker::ProfileAnalysis => "profile_analysis",
            StepMarker::ContentGeneration => "content_generation",
            StepMarker::OptimizationCompleted => "optimization_completed",
        }
    }

    /// True for the three LLM-backed steps; only these feed the duration estimate.
    fn is_ai_stage(self) -> bool {
        matches!(
            self,
            StepMarker::ProfileExtraction
                | StepMarker::ProfileAnalysis
                | StepMarker::ContentGeneration
        )
    }
}

impl std::fmt::Display for StepMarker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Running,
    Completed,
    Failed,
}

// ────────────────────────────────────────────────────────────────────────────
// Records
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRecord {
    pub step: StepMarker,
    pub status: StageStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
    pub payload: Option<Value>,
    pub error: Option<String>,
}

impl StageRecord {
    fn running(step: StepMarker, now: DateTime<Utc>) -> Self {
        Self {
            step,
            status: StageStatus::Running,
            started_at: now,
            finished_at: None,
            duration_seconds: None,
            payload: None,
            error: None,
        }
    }

    fn finish(&mut self, status: StageStatus, now: DateTime<Utc>) {
        self.status = status;
        self.finished_at = Some(now);
        self.duration_seconds =
            Some((now - self.started_at).num_milliseconds().max(0) as f64 / 1000.0);
    }
}

#[derive(Debug, Clone)]
pub struct JobRecord {
    pub optimization_id: String,
    pub status: JobStatus,
    pub current_step: Option<StepMarker>,
    pub completed_steps: Vec<StepMarker>,
    pub stages: Vec<StageRecord>,
    pub error: Option<String>,
    pub failure_kind: Option<FailureKind>,
    pub token_usage: TokenUsage,
    pub persistence_warning: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    fn new(optimization_id: &str, model: &str, now: DateTime<Utc>) -> Self {
        Self {
            optimization_id: optimization_id.to_string(),
            status: JobStatus::Pending,
            current_step: None,
            completed_steps: Vec::new(),
            stages: Vec::new(),
            error: None,
            failure_kind: None,
            token_usage: TokenUsage::new(model),
            persistence_warning: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn next_marker(&self) -> Option<StepMarker> {
        StepMarker::ALL.get(self.completed_steps.len()).copied()
    }

    fn running_stage_mut(&mut self) -> Option<&mut StageRecord> {
        self.stages
            .last_mut()
            .filter(|s| s.status == StageStatus::Running)
    }

    fn ensure_active(&self) -> Result<(), ProgressError> {
        if self.status.is_terminal() {
            return Err(ProgressError::Terminal {
                id: self.optimization_id.clone(),
                status: self.status,
            });
        }
        Ok(())
    }

    fn ensure_next(&self, marker: StepMarker) -> Result<(), ProgressError> {
        if self.next_marker() != Some(marker) {
            return Err(ProgressError::OutOfOrder {
                id: self.optimization_id.clone(),
                expected: self.next_marker(),
                got: marker,
            });
        }
        Ok(())
    }

    /// Appends a marker that has no duration of its own (start / finish).
    fn record_instant(&mut self, marker: StepMarker, now: DateTime<Utc>) {
        let mut record = StageRecord::running(marker, now);
        record.finish(StageStatus::Completed, now);
        self.stages.push(record);
        self.completed_steps.push(marker);
        self.current_step = Some(marker);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let total = StepMarker::ALL.len();
        let done = self.completed_steps.len();

        let progress_percentage = if self.status == JobStatus::Completed {
            100.0
        } else {
            ((done as f64 / total as f64) * 1000.0).round() / 10.0
        };

        let estimated_remaining_seconds = if self.status.is_terminal() {
            None
        } else {
            let timed: Vec<f64> = self
                .stages
                .iter()
                .filter(|s| s.step.is_ai_stage() && s.status == StageStatus::Completed)
                .filter_map(|s| s.duration_seconds)
                .collect();
            let per_step = if timed.is_empty() {
                DEFAULT_STEP_SECONDS
            } else {
                timed.iter().sum::<f64>() / timed.len() as f64
            };
            Some(((total - done) as f64 * per_step).ceil() as u64)
        };

        ProgressSnapshot {
            optimization_id: self.optimization_id.clone(),
            status: self.status,
            current_step: self.current_step,
            completed_steps: self.completed_steps.clone(),
            progress_percentage,
            estimated_remaining_seconds,
            step_details: self.stages.clone(),
            error: self.error.clone(),
            error_kind: self.failure_kind,
            token_usage: self.token_usage.clone(),
            persistence_warning: self.persistence_warning.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Point-in-time view of a job, as returned to polling clients.
///
/// Also persisted with a failed job's record so the failure outlives the tracker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub optimization_id: String,
    pub status: JobStatus,
    pub current_step: Option<StepMarker>,
    pub completed_steps: Vec<StepMarker>,
    pub progress_percentage: f64,
    pub estimated_remaining_seconds: Option<u64>,
    pub step_details: Vec<StageRecord>,
    pub error: Option<String>,
    pub error_kind: Option<FailureKind>,
    pub token_usage: TokenUsage,
    pub persistence_warning: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum ProgressError {
    #[error("Optimization {0} not found")]
    NotFound(String),

    #[error("Optimization {0} already exists")]
    Duplicate(String),

    #[error("Optimization {id} is already {status:?}")]
    Terminal { id: String, status: JobStatus },

    #[error("Optimization {id}: step {got} out of order (expected {expected:?})")]
    OutOfOrder {
        id: String,
        expected: Option<StepMarker>,
        got: StepMarker,
    },
}

/// Optimization ids are caller-chosen; keep them short and URL-safe.
pub fn is_valid_optimization_id(id: &str) -> bool {
    (6..=50).contains(&id.len())
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

// ────────────────────────────────────────────────────────────────────────────
// Tracker
// ────────────────────────────────────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct ProgressTracker {
    jobs: Arc<RwLock<HashMap<String, JobRecord>>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new job in `pending`. Ids are never reused.
    pub async fn create(&self, id: &str, model: &str) -> Result<(), ProgressError> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(id) {
            return Err(ProgressError::Duplicate(id.to_string()));
        }
        jobs.insert(id.to_string(), JobRecord::new(id, model, Utc::now()));
        Ok(())
    }

    /// `pending → processing`; records the `optimization_started` marker.
    pub async fn start(&self, id: &str) -> Result<(), ProgressError> {
        self.update(id, |job, now| {
            if job.status != JobStatus::Pending {
                return Err(ProgressError::OutOfOrder {
                    id: job.optimization_id.clone(),
                    expected: job.next_marker(),
                    got: StepMarker::OptimizationStarted,
                });
            }
            job.ensure_next(StepMarker::OptimizationStarted)?;
            job.status = JobStatus::Processing;
            job.record_instant(StepMarker::OptimizationStarted, now);
            Ok(())
        })
        .await
    }

    /// Marks `step` as the current, running step. It must be the next marker in order.
    pub async fn begin_step(&self, id: &str, step: StepMarker) -> Result<(), ProgressError> {
        self.update(id, |job, now| {
            job.ensure_active()?;
            job.ensure_next(step)?;
            if job.status != JobStatus::Processing || job.running_stage_mut().is_some() {
                return Err(ProgressError::OutOfOrder {
                    id: job.optimization_id.clone(),
                    expected: job.next_marker(),
                    got: step,
                });
            }
            job.current_step = Some(step);
            job.stages.push(StageRecord::running(step, now));
            Ok(())
        })
        .await
    }

    /// Completes the running step, appends its marker and folds in its token usage.
    pub async fn complete_step(
        &self,
        id: &str,
        step: StepMarker,
        payload: Option<Value>,
        usage: Option<&Usage>,
    ) -> Result<(), ProgressError> {
        self.update(id, |job, now| {
            job.ensure_active()?;
            job.ensure_next(step)?;
            let record = match job.running_stage_mut() {
                Some(record) if record.step == step => record,
                _ => {
                    return Err(ProgressError::OutOfOrder {
                        id: id.to_string(),
                        expected: None,
                        got: step,
                    })
                }
            };
            record.finish(StageStatus::Completed, now);
            record.payload = payload;
            job.completed_steps.push(step);
            if let Some(usage) = usage {
                job.token_usage.add(usage);
            }
            Ok(())
        })
        .await
    }

    /// Final transition to `completed`. A persistence warning, if any, rides along
    /// without affecting the status.
    pub async fn complete(
        &self,
        id: &str,
        persistence_warning: Option<String>,
    ) -> Result<(), ProgressError> {
        self.update(id, |job, now| {
            job.ensure_active()?;
            job.ensure_next(StepMarker::OptimizationCompleted)?;
            if job.running_stage_mut().is_some() {
                return Err(ProgressError::OutOfOrder {
                    id: job.optimization_id.clone(),
                    expected: job.next_marker(),
                    got: StepMarker::OptimizationCompleted,
                });
            }
            job.record_instant(StepMarker::OptimizationCompleted, now);
            job.status = JobStatus::Completed;
            job.persistence_warning = persistence_warning;
            Ok(())
        })
        .await
    }

    /// Fatal transition to `failed`. The running stage, if any, is marked failed too.
    pub async fn fail(
        &self,
        id: &str,
        kind: FailureKind,
        message: &str,
    ) -> Result<(), ProgressError> {
        self.update(id, |job, now| {
            job.ensure_active()?;
            if let Some(record) = job.running_stage_mut() {
                record.finish(StageStatus::Failed, now);
                record.error = Some(message.to_string());
            }
            job.status = JobStatus::Failed;
            job.error = Some(message.to_string());
            job.failure_kind = Some(kind);
            Ok(())
        })
        .await
    }

    pub async fn get(&self, id: &str) -> Option<ProgressSnapshot> {
        self.jobs.read().await.get(id).map(JobRecord::snapshot)
    }

    /// Drops terminal jobs last touched before `max_age` ago. Returns how many were removed.
    pub async fn prune_finished(&self, max_age: Duration) -> usize {
        let cutoff = Utc::now() - max_age;
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|_, job| !(job.status.is_terminal() && job.updated_at < cutoff));
        before - jobs.len()
    }

    async fn update<F>(&self, id: &str, apply: F) -> Result<(), ProgressError>
    where
        F: FnOnce(&mut JobRecord, DateTime<Utc>) -> Result<(), ProgressError>,
    {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| ProgressError::NotFound(id.to_string()))?;

        // Validate on a copy so a rejected update leaves no partial mutation behind
        let mut next = job.clone();
        let now = Utc::now();
        apply(&mut next, now)?;
        next.updated_at = now;
        *job = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "job-123456";

    fn usage(total: u64) -> Usage {
        Usage {
            prompt_tokens: total - 10,
            completion_tokens: 10,
            total_tokens: total,
        }
    }

    async fn tracker_at_analysis() -> ProgressTracker {
        let tracker = ProgressTracker::new();
        tracker.create(ID, "gpt-4o").await.unwrap();
        tracker.start(ID).await.unwrap();
        tracker
            .begin_step(ID, StepMarker::ProfileExtraction)
            .await
            .unwrap();
        tracker
            .complete_step(ID, StepMarker::ProfileExtraction, None, Some(&usage(100)))
            .await
            .unwrap();
        tracker
    }

    fn is_prefix(steps: &[StepMarker]) -> bool {
        steps.len() <= StepMarker::ALL.len() && steps == &StepMarker::ALL[..steps.len()]
    }

    #[tokio::test]
    async fn test_new_job_is_pending_with_zero_progress() {
        let tracker = ProgressTracker::new();
        tracker.create(ID, "gpt-4o").await.unwrap();
        let snap = tracker.get(ID).await.unwrap();
        assert_eq!(snap.status, JobStatus::Pending);
        assert_eq!(snap.progress_percentage, 0.0);
        assert!(snap.completed_steps.is_empty());
        assert_eq!(snap.estimated_remaining_seconds, Some(150));
    }

    #[tokio::test]
    async fn test_unknown_id_is_none() {
        assert!(ProgressTracker::new().get("missing-id").await.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_create_is_rejected() {
        let tracker = ProgressTracker::new();
        tracker.create(ID, "gpt-4o").await.unwrap();
        let err = tracker.create(ID, "gpt-4o").await.unwrap_err();
        assert!(matches!(err, ProgressError::Duplicate(_)));
    }

    #[tokio::test]
    async fn test_full_run_is_monotonic_and_prefix_ordered() {
        let tracker = ProgressTracker::new();
        tracker.create(ID, "gpt-4o").await.unwrap();

        let mut last = -1.0;
        let mut observe = |snap: ProgressSnapshot| {
            assert!(is_prefix(&snap.completed_steps));
            assert!(snap.progress_percentage >= last);
            last = snap.progress_percentage;
        };

        observe(tracker.get(ID).await.unwrap());
        tracker.start(ID).await.unwrap();
        observe(tracker.get(ID).await.unwrap());

        for step in [
            StepMarker::ProfileExtraction,
            StepMarker::ProfileAnalysis,
            StepMarker::ContentGeneration,
        ] {
            tracker.begin_step(ID, step).await.unwrap();
            let snap = tracker.get(ID).await.unwrap();
            assert_eq!(snap.current_step, Some(step));
            observe(snap);
            tracker
                .complete_step(ID, step, None, Some(&usage(100)))
                .await
                .unwrap();
            observe(tracker.get(ID).await.unwrap());
        }

        tracker.complete(ID, None).await.unwrap();
        let snap = tracker.get(ID).await.unwrap();
        assert_eq!(snap.status, JobStatus::Completed);
        assert_eq!(snap.progress_percentage, 100.0);
        assert_eq!(snap.completed_steps, StepMarker::ALL.to_vec());
        assert_eq!(snap.estimated_remaining_seconds, None);
        assert_eq!(snap.token_usage.total_tokens, 300);
        assert_eq!(snap.step_details.len(), 5);
        observe(snap);
    }

    #[tokio::test]
    async fn test_percentage_after_first_stage() {
        let tracker = tracker_at_analysis().await;
        let snap = tracker.get(ID).await.unwrap();
        assert_eq!(snap.status, JobStatus::Processing);
        assert_eq!(snap.progress_percentage, 40.0);
    }

    #[tokio::test]
    async fn test_skipping_a_step_is_rejected_without_mutation() {
        let tracker = tracker_at_analysis().await;
        let err = tracker
            .begin_step(ID, StepMarker::ContentGeneration)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProgressError::OutOfOrder {
                expected: Some(StepMarker::ProfileAnalysis),
                ..
            }
        ));
        let snap = tracker.get(ID).await.unwrap();
        assert_eq!(snap.current_step, Some(StepMarker::ProfileExtraction));
        assert!(is_prefix(&snap.completed_steps));
    }

    #[tokio::test]
    async fn test_completing_a_step_that_never_began_is_rejected() {
        let tracker = tracker_at_analysis().await;
        let err = tracker
            .complete_step(ID, StepMarker::ProfileAnalysis, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ProgressError::OutOfOrder { .. }));
        assert_eq!(tracker.get(ID).await.unwrap().completed_steps.len(), 2);
    }

    #[tokio::test]
    async fn test_cannot_complete_before_all_stages() {
        let tracker = tracker_at_analysis().await;
        let err = tracker.complete(ID, None).await.unwrap_err();
        assert!(matches!(err, ProgressError::OutOfOrder { .. }));
    }

    #[tokio::test]
    async fn test_fail_marks_running_stage_and_freezes_job() {
        let tracker = tracker_at_analysis().await;
        tracker
            .begin_step(ID, StepMarker::ProfileAnalysis)
            .await
            .unwrap();
        let before = tracker.get(ID).await.unwrap().progress_percentage;

        tracker
            .fail(ID, FailureKind::MalformedOutput, "Invalid JSON response from LLM")
            .await
            .unwrap();

        let snap = tracker.get(ID).await.unwrap();
        assert_eq!(snap.status, JobStatus::Failed);
        assert_eq!(snap.error_kind, Some(FailureKind::MalformedOutput));
        assert_eq!(snap.progress_percentage, before);
        assert_eq!(snap.estimated_remaining_seconds, None);
        let last = snap.step_details.last().unwrap();
        assert_eq!(last.step, StepMarker::ProfileAnalysis);
        assert_eq!(last.status, StageStatus::Failed);

        // Terminal states are never revisited
        assert!(matches!(
            tracker.fail(ID, FailureKind::Upstream, "again").await,
            Err(ProgressError::Terminal { .. })
        ));
        assert!(matches!(
            tracker.complete_step(ID, StepMarker::ProfileAnalysis, None, None).await,
            Err(ProgressError::Terminal { .. })
        ));
    }

    #[tokio::test]
    async fn test_completed_job_keeps_persistence_warning() {
        let tracker = ProgressTracker::new();
        tracker.create(ID, "gpt-4o").await.unwrap();
        tracker.start(ID).await.unwrap();
        for step in [
            StepMarker::ProfileExtraction,
            StepMarker::ProfileAnalysis,
            StepMarker::ContentGeneration,
        ] {
            tracker.begin_step(ID, step).await.unwrap();
            tracker.complete_step(ID, step, None, None).await.unwrap();
        }
        tracker
            .complete(ID, Some("DynamoDB unavailable".to_string()))
            .await
            .unwrap();

        let snap = tracker.get(ID).await.unwrap();
        assert_eq!(snap.status, JobStatus::Completed);
        assert!(snap.error.is_none());
        assert_eq!(snap.persistence_warning.as_deref(), Some("DynamoDB unavailable"));
    }

    #[tokio::test]
    async fn test_prune_only_removes_old_terminal_jobs() {
        let tracker = ProgressTracker::new();
        tracker.create("done-job", "gpt-4o").await.unwrap();
        tracker
            .fail("done-job", FailureKind::Upstream, "boom")
            .await
            .unwrap();
        tracker.create("live-job", "gpt-4o").await.unwrap();

        assert_eq!(tracker.prune_finished(Duration::days(1)).await, 0);
        assert_eq!(tracker.prune_finished(Duration::seconds(-1)).await, 1);
        assert!(tracker.get("done-job").await.is_none());
        assert!(tracker.get("live-job").await.is_some());
    }

    #[tokio::test]
    async fn test_concurrent_readers_see_consistent_prefixes() {
        let tracker = ProgressTracker::new();
        tracker.create(ID, "gpt-4o").await.unwrap();

        let reader = {
            let tracker = tracker.clone();
            tokio::spawn(async move {
                let mut last = 0.0;
                for _ in 0..200 {
                    if let Some(snap) = tracker.get(ID).await {
                        assert!(is_prefix(&snap.completed_steps));
                        assert!(snap.progress_percentage >= last);
                        last = snap.progress_percentage;
                    }
                    tokio::task::yield_now().await;
                }
            })
        };

        tracker.start(ID).await.unwrap();
        for step in [
            StepMarker::ProfileExtraction,
            StepMarker::ProfileAnalysis,
            StepMarker::ContentGeneration,
        ] {
            tracker.begin_step(ID, step).await.unwrap();
            tokio::task::yield_now().await;
            tracker.complete_step(ID, step, None, None).await.unwrap();
        }
        tracker.complete(ID, None).await.unwrap();

        reader.await.unwrap();
    }
}
