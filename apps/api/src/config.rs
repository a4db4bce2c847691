use anyhow::{bail, Context, Result};
use tracing::{info, warn};

const DEFAULT_MAX_FILE_SIZE: usize = 10 * 1024 * 1024;

/// Application configuration loaded from environment variables.
/// Fails at startup if a variable is present but malformed.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server-side default credential. Callers may supply their own per request.
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub openai_base_url: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub max_file_size: usize,
    pub allowed_origins: Vec<String>,
    pub host: String,
    pub port: u16,
    pub aws_region: String,
    pub aws_access_key_id: Option<String>,
    pub aws_secret_access_key: Option<String>,
    pub dynamodb_table: String,
    /// Local DynamoDB endpoint (e.g. `http://localhost:8001`). AWS default when unset.
    pub dynamodb_endpoint: Option<String>,
    pub prompts_path: Option<String>,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup. `from_env` passes the process env.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let openai_api_key = var("OPENAI_API_KEY");
        if let Some(key) = &openai_api_key {
            if !key.starts_with("sk-") {
                bail!("OPENAI_API_KEY appears to be invalid (should start with 'sk-')");
            }
        }

        Ok(Config {
            openai_api_key,
            openai_model: var("OPENAI_MODEL").unwrap_or_else(|| "gpt-4o".to_string()),
            openai_base_url: var("OPENAI_BASE_URL")
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string())
                .trim_end_matches('/')
                .to_string(),
            max_tokens: parse_or(var("MAX_TOKENS"), 4000, "MAX_TOKENS")?,
            temperature: parse_or(var("DEFAULT_TEMPERATURE"), 1.0, "DEFAULT_TEMPERATURE")?,
            max_file_size: parse_or(var("MAX_FILE_SIZE"), DEFAULT_MAX_FILE_SIZE, "MAX_FILE_SIZE")?,
            allowed_origins: var("ALLOWED_ORIGINS")
                .unwrap_or_else(|| "http://localhost:3000".to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            host: var("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or(var("PORT"), 8000, "PORT")?,
            aws_region: var("AWS_REGION").unwrap_or_else(|| "us-east-1".to_string()),
            aws_access_key_id: var("AWS_ACCESS_KEY_ID"),
            aws_secret_access_key: var("AWS_SECRET_ACCESS_KEY"),
            dynamodb_table: var("DYNAMODB_TABLE_NAME")
                .unwrap_or_else(|| "linkedin-optimization-results".to_string()),
            dynamodb_endpoint: var("DYNAMODB_ENDPOINT"),
            prompts_path: var("PROMPTS_PATH"),
            rust_log: var("RUST_LOG").unwrap_or_else(|| "info".to_string()),
        })
    }

    /// DynamoDB persistence is only enabled when both AWS credentials are present.
    pub fn storage_enabled(&self) -> bool {
        self.aws_access_key_id.is_some() && self.aws_secret_access_key.is_some()
    }

    /// Logs the effective configuration with secrets masked.
    pub fn log_summary(&self) {
        info!("OpenAI model: {} ({})", self.openai_model, self.openai_base_url);
        info!(
            "Max file size: {:.1} MB, max tokens: {}, temperature: {}",
            self.max_file_size as f64 / 1024.0 / 1024.0,
            self.max_tokens,
            self.temperature
        );
        info!("Allowed origins: {}", self.allowed_origins.join(", "));
        match &self.openai_api_key {
            Some(key) => info!("OpenAI API key: {}", mask_secret(key)),
            None => warn!("OPENAI_API_KEY not set - users must provide their own API key"),
        }
        if self.storage_enabled() {
            info!(
                "DynamoDB table: {} ({})",
                self.dynamodb_table, self.aws_region
            );
        } else {
            warn!("AWS credentials not set - results are kept in memory only");
        }
    }
}

fn parse_or<T>(raw: Option<String>, default: T, key: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match raw {
        Some(value) => value
            .trim()
            .parse::<T>()
            .with_context(|| format!("{key} has an invalid value '{value}'")),
        None => Ok(default),
    }
}

/// Shows the first 8 and last 4 characters of a secret.
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 12 {
        return "***".to_string();
    }
    let head: String = chars[..8].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults_apply_when_env_is_empty() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.openai_model, "gpt-4o");
        assert_eq!(config.max_file_size, 10 * 1024 * 1024);
        assert_eq!(config.port, 8000);
        assert_eq!(config.allowed_origins, vec!["http://localhost:3000"]);
        assert!(config.openai_api_key.is_none());
        assert!(!config.storage_enabled());
    }

    #[test]
    fn test_rejects_server_key_without_sk_prefix() {
        let err = config_from(&[("OPENAI_API_KEY", "not-a-key")]).unwrap_err();
        assert!(err.to_string().contains("sk-"));
    }

    #[test]
    fn test_parses_origins_and_numbers() {
        let config = config_from(&[
            ("ALLOWED_ORIGINS", "https://a.example, https://b.example,"),
            ("MAX_FILE_SIZE", "2048"),
            ("PORT", "9000"),
            ("OPENAI_BASE_URL", "http://localhost:4000/v1/"),
        ])
        .unwrap();
        assert_eq!(
            config.allowed_origins,
            vec!["https://a.example", "https://b.example"]
        );
        assert_eq!(config.max_file_size, 2048);
        assert_eq!(config.port, 9000);
        assert_eq!(config.openai_base_url, "http://localhost:4000/v1");
    }

    #[test]
    fn test_invalid_number_is_an_error() {
        let err = config_from(&[("PORT", "eighty")]).unwrap_err();
        assert!(err.to_string().contains("PORT"));
    }

    #[test]
    fn test_storage_requires_both_credentials() {
        let config = config_from(&[("AWS_ACCESS_KEY_ID", "AKIAEXAMPLE")]).unwrap();
        assert!(!config.storage_enabled());
        let config = config_from(&[
            ("AWS_ACCESS_KEY_ID", "AKIAEXAMPLE"),
            ("AWS_SECRET_ACCESS_KEY", "secret"),
        ])
        .unwrap();
        assert!(config.storage_enabled());
    }

    #[test]
    fn test_mask_secret() {
        assert_eq!(mask_secret("sk-abcdefghijklmnop1234"), "sk-abcde...1234");
        assert_eq!(mask_secret("short"), "***");
    }
}
