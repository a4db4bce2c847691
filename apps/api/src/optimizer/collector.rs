use std::time::Instant;

use serde_json::json;
use tracing::info;

use crate::llm_client::prompts::PROFILE_COLLECTOR;
use crate::llm_client::{call_json, ChatRequest};
use crate::optimizer::models::ProfileData;
use crate::optimizer::stage::{
    in_stage, StageContext, StageError, StageOutput, WorkflowPhase, WorkflowState,
};
use crate::progress::StepMarker;

const STAGE: &str = "profile collection";

/// Stage 1: PDF text → structured `ProfileData`.
pub async fn collect_profile(
    ctx: &StageContext<'_>,
    state: WorkflowState,
) -> Result<StageOutput, StageError> {
    let mut state = state.enter(WorkflowPhase::ProfileExtraction)?;
    let started = Instant::now();

    let text = ctx
        .extractor
        .extract_text(&state.pdf)
        .await
        .map_err(in_stage(STAGE))?;

    let prompt = ctx
        .prompts
        .render_user_prompt(PROFILE_COLLECTOR, &[("pdf_content", &text)])
        .map_err(in_stage(STAGE))?;
    let system = ctx
        .prompts
        .system_prompt(PROFILE_COLLECTOR)
        .map_err(in_stage(STAGE))?;

    let (profile, usage): (ProfileData, _) = call_json(
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
        "Profile collected for {} in {:.2}s ({} experience entries, {} skills)",
        state.optimization_id,
        seconds,
        profile.experience.len(),
        profile.skills.len()
    );

    let payload = json!({
        "name": profile.personal_info.name,
        "experience_count": profile.experience.len(),
        "skills_count": profile.skills.len(),
        "text_length": text.len(),
    });
    state.profile_data = Some(profile);
    state.record(StepMarker::ProfileExtraction.as_str(), seconds, Some(&usage));

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
    use crate::pdf::testing::FixedText;

    fn state() -> WorkflowState {
        WorkflowState::new("opt-collect", None, Bytes::from_static(b"%PDF-1.7"), "test-model")
    }

    #[tokio::test]
    async fn test_collects_profile_from_extracted_text() {
        let llm = ScriptedModel::new(vec![Scripted::Text(
            "```json\n{\"personal_info\": {\"name\": \"Grace Hopper\", \"title\": \"Rear Admiral\"}, \"skills\": [\"COBOL\"]}\n```"
                .to_string(),
        )]);
        let prompts = PromptStore::builtin().unwrap();
        let extractor = FixedText("Grace Hopper\nRear Admiral\nSkills: COBOL");
        let ctx = StageContext {
            llm: &llm,
            prompts: &prompts,
            extractor: &extractor,
            api_key: "sk-test-key-000000000000",
        };

        let output = collect_profile(&ctx, state()).await.unwrap();
        let profile = output.state.profile_data.as_ref().unwrap();
        assert_eq!(profile.personal_info.name, "Grace Hopper");
        assert_eq!(output.state.phase, WorkflowPhase::ProfileExtraction);
        assert_eq!(output.state.token_usage.total_tokens, 150);
        assert!(output.state.step_timings.contains_key("profile_extraction"));
        assert_eq!(output.payload["skills_count"], 1);
        assert!(llm.prompts()[0].contains("Skills: COBOL"));
    }

    #[tokio::test]
    async fn test_blank_pdf_is_an_extraction_failure() {
        let llm = ScriptedModel::new(vec![]);
        let prompts = PromptStore::builtin().unwrap();
        let extractor = FixedText("   ");
        let ctx = StageContext {
            llm: &llm,
            prompts: &prompts,
            extractor: &extractor,
            api_key: "sk-test-key-000000000000",
        };

        let err = collect_profile(&ctx, state()).await.unwrap_err();
        assert_eq!(err.kind, FailureKind::Extraction);
        assert!(llm.prompts().is_empty());
    }
}
