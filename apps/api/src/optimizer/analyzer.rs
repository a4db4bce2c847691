use std::time::Instant;

use serde_json::json;
use tracing::info;

use crate::llm_client::prompts::PROFILE_ANALYZER;
use crate::llm_client::{call_json, ChatRequest};
use crate::optimizer::models::AnalysisResult;
use crate::optimizer::stage::{
    in_stage, StageContext, StageError, StageOutput, WorkflowPhase, WorkflowState,
};
use crate::progress::StepMarker;

const STAGE: &str = "profile analysis";
const DEFAULT_TARGET_ROLE: &str = "General professional development";

/// Stage 2: `ProfileData` + target role → scored `AnalysisResult`.
pub async fn analyze_profile(
    ctx: &StageContext<'_>,
    state: WorkflowState,
) -> Result<StageOutput, StageError> {
    let mut state = state.enter(WorkflowPhase::ProfileAnalysis)?;
    let started = Instant::now();

    let profile = state
        .profile_data
        .as_ref()
        .ok_or_else(|| StageError::internal("profile data missing").context(STAGE))?;
    let profile_json = serde_json::to_string_pretty(profile).map_err(in_stage(STAGE))?;
    let target_role = state
        .target_role
        .as_deref()
        .filter(|r| !r.trim().is_empty())
        .unwrap_or(DEFAULT_TARGET_ROLE);

    let prompt = ctx
        .prompts
        .render_user_prompt(
            PROFILE_ANALYZER,
            &[("target_role", target_role), ("profile_data", &profile_json)],
        )
        .map_err(in_stage(STAGE))?;
    let system = ctx
        .prompts
        .system_prompt(PROFILE_ANALYZER)
        .map_err(in_stage(STAGE))?;

    let (analysis, usage): (AnalysisResult, _) = call_json(
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
        "Profile analyzed for {} in {:.2}s (score {}/100, target role: {target_role})",
        state.optimization_id, seconds, analysis.overall_score
    );

    let payload = json!({
        "overall_score": analysis.overall_score,
        "strengths_count": analysis.strengths.len(),
        "next_steps_count": analysis.next_steps.len(),
    });
    state.analysis = Some(analysis);
    state.record(StepMarker::ProfileAnalysis.as_str(), seconds, Some(&usage));

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
    use crate::optimizer::models::ProfileData;
    use crate::pdf::testing::FixedText;

    fn collected_state(target_role: Option<&str>) -> WorkflowState {
        let mut state = WorkflowState::new(
            "opt-analyze",
            target_role.map(str::to_string),
            Bytes::new(),
            "test-model",
        )
        .enter(WorkflowPhase::ProfileExtraction)
        .unwrap();
        state.profile_data = Some(ProfileData {
            summary: "Compiler pioneer".to_string(),
            ..ProfileData::default()
        });
        state
    }

    async fn run(llm: &ScriptedModel, state: WorkflowState) -> Result<StageOutput, StageError> {
        let prompts = PromptStore::builtin().unwrap();
        let extractor = FixedText("unused");
        let ctx = StageContext {
            llm,
            prompts: &prompts,
            extractor: &extractor,
            api_key: "sk-test-key-000000000000",
        };
        analyze_profile(&ctx, state).await
    }

    #[tokio::test]
    async fn test_analysis_uses_target_role_and_clamps_score() {
        let llm = ScriptedModel::new(vec![Scripted::Text(
            r#"{"overall_score": 140, "next_steps": ["Add a headline"]}"#.to_string(),
        )]);
        let output = run(&llm, collected_state(Some("Staff Engineer"))).await.unwrap();
        assert_eq!(output.state.analysis.as_ref().unwrap().overall_score, 100);
        assert!(llm.prompts()[0].contains("Staff Engineer"));
        assert!(llm.prompts()[0].contains("Compiler pioneer"));
    }

    #[tokio::test]
    async fn test_missing_role_falls_back_to_general() {
        let llm = ScriptedModel::new(vec![Scripted::Text("{}".to_string())]);
        run(&llm, collected_state(None)).await.unwrap();
        assert!(llm.prompts()[0].contains(DEFAULT_TARGET_ROLE));
    }

    #[tokio::test]
    async fn test_prose_response_is_malformed_output() {
        let llm = ScriptedModel::new(vec![Scripted::Text(
            "Here is my analysis of your profile: it is great.".to_string(),
        )]);
        let err = run(&llm, collected_state(None)).await.unwrap_err();
        assert_eq!(err.kind, FailureKind::MalformedOutput);
        assert!(err.message.starts_with("Error in profile analysis"));
    }
}
