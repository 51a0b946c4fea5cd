// src/config/ai.rs
use serde::{Deserialize, Serialize};
use std::{env, fs, path::Path};

pub const DEFAULT_AI_CONFIG_PATH: &str = "config/ai.json";
pub const ENV_AI_CONFIG_PATH: &str = "AI_CONFIG_PATH";
pub const ENV_API_KEY: &str = "EXTRACT_API_KEY";

fn default_endpoint() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_max_output_tokens() -> u32 {
    4_096
}
/// Upper bound for `max_attempts`; backoff doubles per attempt.
pub const MAX_ATTEMPTS: u32 = 5;

fn default_max_attempts() -> u32 {
    2
}
fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_timeout_secs() -> u64 {
    300
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    pub enabled: bool,
    /// OpenAI-compatible chat completions endpoint.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// "ENV" means: read from EXTRACT_API_KEY
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    /// Attempts per extraction call (hard failures only).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Whole-request bound; generous because reasoning models think first.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_endpoint(),
            model: default_model(),
            api_key: String::new(),
            max_output_tokens: default_max_output_tokens(),
            max_attempts: default_max_attempts(),
            connect_timeout_secs: default_connect_timeout_secs(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl ExtractionConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let data = fs::read_to_string(path)?;
        Self::from_json(&data)
    }

    pub fn from_json(data: &str) -> anyhow::Result<Self> {
        let mut cfg: ExtractionConfig = serde_json::from_str(data)?;

        // Resolve api key if "ENV"
        if cfg.api_key.trim().eq_ignore_ascii_case("env") {
            cfg.api_key = match env::var(ENV_API_KEY) {
                Ok(k) => k,
                Err(_) if cfg.enabled => anyhow::bail!("Missing {ENV_API_KEY} env var"),
                Err(_) => String::new(),
            };
        }

        // Sanitize bounds
        cfg.max_attempts = cfg.max_attempts.clamp(1, MAX_ATTEMPTS);
        if cfg.max_output_tokens == 0 {
            cfg.max_output_tokens = default_max_output_tokens();
        }

        Ok(cfg)
    }

    /// $AI_CONFIG_PATH, then config/ai.json; defaults when neither exists.
    pub fn load_default() -> anyhow::Result<Self> {
        let path = env::var(ENV_AI_CONFIG_PATH).unwrap_or_else(|_| DEFAULT_AI_CONFIG_PATH.into());
        if Path::new(&path).exists() {
            Self::load_from_file(&path)
        } else {
            Ok(Self::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[serial_test::serial]
    #[test]
    fn env_key_is_resolved() {
        env::set_var(ENV_API_KEY, "sk-test");
        let cfg = ExtractionConfig::from_json(r#"{"enabled":true,"api_key":"ENV"}"#).unwrap();
        assert_eq!(cfg.api_key, "sk-test");
        assert_eq!(cfg.max_attempts, 2);
        env::remove_var(ENV_API_KEY);
    }

    #[serial_test::serial]
    #[test]
    fn missing_env_key_fails_only_when_enabled() {
        env::remove_var(ENV_API_KEY);
        assert!(ExtractionConfig::from_json(r#"{"enabled":true,"api_key":"env"}"#).is_err());
        let off = ExtractionConfig::from_json(r#"{"enabled":false,"api_key":"env"}"#).unwrap();
        assert!(off.api_key.is_empty());
    }

    #[test]
    fn zero_attempts_is_clamped() {
        let cfg = ExtractionConfig::from_json(r#"{"enabled":false,"max_attempts":0}"#).unwrap();
        assert_eq!(cfg.max_attempts, 1);

        let cfg = ExtractionConfig::from_json(r#"{"enabled":false,"max_attempts":40}"#).unwrap();
        assert_eq!(cfg.max_attempts, MAX_ATTEMPTS);
    }
}
