//! Prompt template store.
//!
//! Each agent has a `system_prompt` and a `user_prompt` in a TOML table.
//! The default set ships inside the binary; `PROMPTS_PATH` may point to an override file.
//! User prompts use `{name}` placeholders. Braces that do not wrap a bare
//! identifier (JSON examples, for instance) are left untouched.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

const DEFAULT_PROMPTS: &str = include_str!("../../prompts.toml");

pub const PROFILE_COLLECTOR: &str = "profile_collector";
pub const PROFILE_ANALYZER: &str = "profile_analyzer";
pub const CONTENT_GENERATOR: &str = "content_generator";

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("Failed to read prompts file '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Error parsing prompts TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Prompts not found for agent: {0}")]
    UnknownAgent(String),

    #[error("Missing parameter for prompt formatting: {0}")]
    MissingParameter(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentPrompts {
    pub system_prompt: String,
    pub user_prompt: String,
}

#[derive(Debug, Clone)]
pub struct PromptStore {
    agents: HashMap<String, AgentPrompts>,
}

impl PromptStore {
    /// The compiled-in prompt set.
    pub fn builtin() -> Result<Self, PromptError> {
        Self::from_toml(DEFAULT_PROMPTS)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PromptError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| PromptError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self, PromptError> {
        let agents: HashMap<String, AgentPrompts> = toml::from_str(raw)?;
        let store = Self { agents };
        for agent in [PROFILE_COLLECTOR, PROFILE_ANALYZER, CONTENT_GENERATOR] {
            store.agent(agent)?;
        }
        Ok(store)
    }

    fn agent(&self, name: &str) -> Result<&AgentPrompts, PromptError> {
        self.agents
            .get(name)
            .ok_or_else(|| PromptError::UnknownAgent(name.to_string()))
    }

    pub fn system_prompt(&self, agent: &str) -> Result<&str, PromptError> {
        Ok(&self.agent(agent)?.system_prompt)
    }

    /// Fills the agent's user prompt. Every placeholder in the template must have a value.
    pub fn render_user_prompt(
        &self,
        agent: &str,
        params: &[(&str, &str)],
    ) -> Result<String, PromptError> {
        fill_template(&self.agent(agent)?.user_prompt, params)
    }
}

fn fill_template(template: &str, params: &[(&str, &str)]) -> Result<String, PromptError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) if is_placeholder(&after[..close]) => {
                let name = &after[..close];
                let value = params
                    .iter()
                    .find(|(key, _)| *key == name)
                    .map(|(_, value)| *value)
                    .ok_or_else(|| PromptError::MissingParameter(name.to_string()))?;
                out.push_str(value);
                rest = &after[close + 1..];
            }
            _ => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    Ok(out)
}

fn is_placeholder(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_lowercase() || c == '_')
}
