use serde::Serialize;

use crate::optimizer::models::{AnalysisResult, ContentResult, ProfileData};

const MAX_ACTIONS: usize = 5;

/// Sections counted towards profile completeness.
const CORE_SECTIONS: usize = 7;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimizationSummary {
    pub profile_completeness: u8,
    pub optimization_score: u8,
    pub key_improvements: Vec<String>,
    pub content_strategy: Vec<String>,
    pub recommended_actions: Vec<String>,
}

impl OptimizationSummary {
    pub fn build(profile: &ProfileData, analysis: &AnalysisResult, content: &ContentResult) -> Self {
        Self {
            profile_completeness: profile_completeness(profile),
            optimization_score: analysis.overall_score,
            key_improvements: analysis.next_steps.iter().take(3).cloned().collect(),
            content_strategy: content
                .content_strategy
                .content_pillars
                .iter()
                .take(3)
                .cloned()
                .collect(),
            recommended_actions: recommended_actions(analysis, content),
        }
    }
}

/// Percentage of the core sections that carry content, rounded down.
///
/// Personal info only counts with both a name and a title.
pub fn profile_completeness(profile: &ProfileData) -> u8 {
    let info = &profile.personal_info;
    let present = [
        !info.name.trim().is_empty() && !info.title.trim().is_empty(),
        !profile.summary.trim().is_empty(),
        !profile.experience.is_empty(),
        !profile.education.is_empty(),
        !profile.skills.is_empty(),
        !profile.certifications.is_empty(),
        !profile.recommendations.is_empty(),
    ];
    let done = present.iter().filter(|p| **p).count();
    (done * 100 / CORE_SECTIONS) as u8
}

fn recommended_actions(analysis: &AnalysisResult, content: &ContentResult) -> Vec<String> {
    let mut actions: Vec<String> = analysis.next_steps.iter().take(2).cloned().collect();
    let frequency = content.content_strategy.posting_frequency.trim();
    if !frequency.is_empty() {
        actions.push(format!(
            "Start posting {frequency} to build your LinkedIn presence"
        ));
    }
    actions.truncate(MAX_ACTIONS);
    actions
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn profile(value: serde_json::Value) -> ProfileData {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_empty_profile_is_zero_complete() {
        assert_eq!(profile_completeness(&ProfileData::default()), 0);
    }

    #[test]
    fn test_personal_info_needs_name_and_title() {
        let partial = profile(json!({
            "personal_info": {"name": "Ada Lovelace"},
            "summary": "   ",
            "skills": ["Analysis"]
        }));
        // Only skills count: 1 of 7
        assert_eq!(profile_completeness(&partial), 14);

        let full = profile(json!({
            "personal_info": {"name": "Ada Lovelace", "title": "Analyst"},
            "summary": "Engines and numbers",
            "experience": [{}],
            "education": [{}],
            "skills": ["Analysis"],
            "certifications": [{}],
            "recommendations": [{}]
        }));
        assert_eq!(profile_completeness(&full), 100);
    }

    #[test]
    fn test_summary_takes_top_items() {
        let analysis: AnalysisResult = serde_json::from_value(json!({
            "overall_score": 68,
            "next_steps": ["Rewrite headline", "Add metrics", "Request recommendations", "Post weekly"]
        }))
        .unwrap();
        let content: ContentResult = serde_json::from_value(json!({
            "content_strategy": {
                "posting_frequency": "2-3 times per week",
                "content_pillars": ["Leadership", "Data", "Career", "Hiring"]
            }
        }))
        .unwrap();

        let summary = OptimizationSummary::build(&ProfileData::default(), &analysis, &content);
        assert_eq!(summary.optimization_score, 68);
        assert_eq!(summary.key_improvements.len(), 3);
        assert_eq!(summary.content_strategy, vec!["Leadership", "Data", "Career"]);
        assert_eq!(
            summary.recommended_actions,
            vec![
                "Rewrite headline".to_string(),
                "Add metrics".to_string(),
                "Start posting 2-3 times per week to build your LinkedIn presence".to_string(),
            ]
        );
    }

    #[test]
    fn test_actions_without_posting_frequency() {
        let analysis: AnalysisResult =
            serde_json::from_value(json!({"next_steps": ["Only step"]})).unwrap();
        let summary =
            OptimizationSummary::build(&ProfileData::default(), &analysis, &ContentResult::default());
        assert_eq!(summary.recommended_actions, vec!["Only step".to_string()]);
    }
}
