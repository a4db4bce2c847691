//! Typed payloads for the three stage responses.
//!
//! LLM output is loosely shaped. Every field defaults when missing, lists
//! degrade to empty when the model returns something else, and unknown keys
//! are kept in `extra` so nothing the model said is dropped from the result.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

// ────────────────────────────────────────────────────────────────────────────
// Stage 1: profile collection
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersonalInfo {
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub title: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub location: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub email: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub phone: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub linkedin_url: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileData {
    #[serde(default, deserialize_with = "lenient_struct")]
    pub personal_info: PersonalInfo,
    #[serde(default, deserialize_with = "lenient_string")]
    pub summary: String,
    #[serde(default, deserialize_with = "lenient_list")]
    pub experience: Vec<Value>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub education: Vec<Value>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub skills: Vec<Value>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub certifications: Vec<Value>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub recommendations: Vec<Value>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub endorsements: Vec<Value>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub languages: Vec<Value>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub volunteer_experience: Vec<Value>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub publications_projects: Vec<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ────────────────────────────────────────────────────────────────────────────
// Stage 2: profile analysis
// ────────────────────────────────────────────────────────────────────────────

/// A current/suggested pair for a single profile field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    #[serde(default, deserialize_with = "lenient_string")]
    pub current: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub suggested: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub reasoning: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Recommendations {
    #[serde(default, deserialize_with = "lenient_struct")]
    pub headline: Suggestion,
    #[serde(default, deserialize_with = "lenient_struct")]
    pub summary: Suggestion,
    #[serde(default, deserialize_with = "lenient_list")]
    pub experience_optimization: Vec<Value>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub skills_to_add: Vec<String>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub skills_to_emphasize: Vec<String>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub keywords_to_include: Vec<String>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub certifications_to_pursue: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Always within 0..=100.
    #[serde(default, deserialize_with = "lenient_score")]
    pub overall_score: u8,
    #[serde(default, deserialize_with = "lenient_list")]
    pub strengths: Vec<String>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub areas_for_improvement: Vec<String>,
    #[serde(default, deserialize_with = "lenient_struct")]
    pub recommendations: Recommendations,
    #[serde(default)]
    pub industry_insights: Value,
    #[serde(default, deserialize_with = "lenient_list")]
    pub next_steps: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ────────────────────────────────────────────────────────────────────────────
// Stage 3: content generation
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentStrategy {
    #[serde(default, deserialize_with = "lenient_string")]
    pub posting_frequency: String,
    #[serde(default, deserialize_with = "lenient_list")]
    pub best_posting_times: Vec<String>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub content_pillars: Vec<String>,
    #[serde(default)]
    pub hashtag_strategy: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentIdea {
    #[serde(rename = "type", default, deserialize_with = "lenient_string")]
    pub kind: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub topic: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub objective: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub target_audience: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub content: String,
    #[serde(default, deserialize_with = "lenient_list")]
    pub hashtags: Vec<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub call_to_action: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SamplePost {
    #[serde(default, deserialize_with = "lenient_string")]
    pub title: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub content: String,
    #[serde(default, deserialize_with = "lenient_list")]
    pub hashtags: Vec<String>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub engagement_hooks: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalendarEntry {
    #[serde(default, deserialize_with = "lenient_string")]
    pub day: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub content_type: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub topic: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub brief_description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentResult {
    #[serde(default, deserialize_with = "lenient_struct")]
    pub content_strategy: ContentStrategy,
    #[serde(default, deserialize_with = "lenient_list")]
    pub content_ideas: Vec<ContentIdea>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub sample_posts: Vec<SamplePost>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub weekly_content_calendar: Vec<CalendarEntry>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ────────────────────────────────────────────────────────────────────────────
// Lenient field deserializers
// ────────────────────────────────────────────────────────────────────────────

/// Strings pass through, numbers and booleans are stringified, anything else is empty.
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    })
}

/// Non-arrays become empty; array elements that do not fit `T` are skipped.
fn lenient_list<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect(),
        _ => Vec::new(),
    })
}

/// Falls back to `T::default()` when the value is not shaped like `T`.
fn lenient_struct<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

/// Numeric (or numeric string) scores clamped to 0..=100; anything else is 0.
fn lenient_score<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse::<f64>().ok(),
        _ => None,
    };
    Ok(raw
        .filter(|v| v.is_finite())
        .map(|v| v.round().clamp(0.0, 100.0) as u8)
        .unwrap_or(0))
}
