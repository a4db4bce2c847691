use std::time::Instant;

use serde_json::json;
use tracing::info;

use crate::llm_client::prompts::CONTENT_GENERATOR;
use crate::llm_client::{call_json, ChatRequest};
use crate::optimizer::models::ContentResult;
use crate::optimizer::stage::{
    in_stage, StageContext, StageError, StageOutput, WorkflowPhase, WorkflowState,
};
use crate::progress::StepMarker;

const STAGE: &str = "content generation";

/// Stage 3: profile + analysis → content strategy, ideas, sample posts and calendar.
pub async fn generate_content(
    ctx: &StageContext<'_>,
    state: WorkflowState,
) -> Result<StageOutput, StageError> {
    let mut state = state.enter(WorkflowPhase::ContentGeneration)?;
    let started = Instant::now();

    let (profile, analysis) = match (&state.profile_data, &state.analysis) {
        (Some(profile), Some(analysis)) => (profile, analysis),
        _ => {
            return Err(StageError::internal("profile or analysis missing").context(STAGE));
        }
    };
    let profile_json = serde_json::to_string_pretty(profile).map_err(in_stage(STAGE))?;
    let analysis_json = serde_json::to_string_pretty(analysis).map_err(in_stage(STAGE))?;

    let prompt = ctx
        .prompts
        .render_user_prompt(
            CONTENT_GENERATOR,
            &[
                ("profile_data", &profile_json),
                ("profile_analysis", &analysis_json),
            ],
        )
        .map_err(in_stage(STAGE))?;
    let system = ctx
        .prompts
        .system_prompt(CONTENT_GENERATOR)
        .map_err(in_stage(STAGE))?;

    let (content, usage): (ContentResult, _) = call_json(
        ctx.llm,
        ChatRequest {
            api_key: ctx.api_key,
            system,
            prompt: &prompt,
        },
    )
    .await
    .map_err(in_stage(STAGE))?;

    let seconds = started.elapsed().as_secs_f64();
    info!(
        "Content generated for {} in {:.2}s ({} ideas, {} sample posts)",
        state.optimization_id,
        seconds,
        content.content_ideas.len(),
        content.sample_posts.len()
    );

    let payload = json!({
        "content_ideas_count": content.content_ideas.len(),
        "sample_posts_count": content.sample_posts.len(),
        "calendar_entries": content.weekly_content_calendar.len(),
    });
    state.content = Some(content);
    state.record(StepMarker::ContentGeneration.as_str(), seconds, Some(&usage));

    Ok(StageOutput {
        state,
        usage,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    use crate::errors::FailureKind;
    use crate::llm_client::prompts::PromptStore;
    use crate::llm_client::testing::{Scripted, ScriptedModel};
    use crate::optimizer::models::{AnalysisResult, ProfileData};
    use crate::pdf::testing::FixedText;

    fn analyzed_state() -> WorkflowState {
        let mut state = WorkflowState::new("opt-generate", None, Bytes::new(), "test-model")
            .enter(WorkflowPhase::ProfileExtraction)
            .unwrap()
            .enter(WorkflowPhase::ProfileAnalysis)
            .unwrap();
        state.profile_data = Some(ProfileData::default());
        state.analysis = Some(AnalysisResult {
            overall_score: 55,
            next_steps: vec!["Share project write-ups".to_string()],
            ..AnalysisResult::default()
        });
        state
    }

    #[tokio::test]
    async fn test_generates_content_from_analysis() {
        let llm = ScriptedModel::new(vec![Scripted::Text(
            r#"{"content_strategy": {"posting_frequency": "weekly"},
                "sample_posts": [{"title": "Hello", "content": "First post"}]}"#
                .to_string(),
        )]);
        let prompts = PromptStore::builtin().unwrap();
        let extractor = FixedText("unused");
        let ctx = StageContext {
            llm: &llm,
            prompts: &prompts,
            extractor: &extractor,
            api_key: "sk-test-key-000000000000",
        };

        let output = generate_content(&ctx, analyzed_state()).await.unwrap();
        let content = output.state.content.as_ref().unwrap();
        assert_eq!(content.content_strategy.posting_frequency, "weekly");
        assert_eq!(output.payload["sample_posts_count"], 1);
        assert!(llm.prompts()[0].contains("Share project write-ups"));
    }

    #[tokio::test]
    async fn test_requires_analysis_first() {
        let llm = ScriptedModel::new(vec![]);
        let prompts = PromptStore::builtin().unwrap();
        let extractor = FixedText("unused");
        let ctx = StageContext {
            llm: &llm,
            prompts: &prompts,
            extractor: &extractor,
            api_key: "sk-test-key-000000000000",
        };
        let state = WorkflowState::new("opt-generate", None, Bytes::new(), "test-model");
        let err = generate_content(&ctx, state).await.unwrap_err();
        assert_eq!(err.kind, FailureKind::Internal);
    }
}
