// src/config/llm.rs
use serde::{Deserialize, Serialize};
use std::{env, fs, path::Path};

pub const DEFAULT_LLM_CONFIG_PATH: &str = "config/llm.json";
pub const ENV_LLM_CONFIG_PATH: &str = "LLM_CONFIG_PATH";
pub const ENV_LLM_API_KEY: &str = "LLM_API_KEY";

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_tokens() -> u32 {
    1000
}
fn default_temperature() -> f32 {
    0.3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub enabled: bool,
    /// "openai" | "mock" (case-insensitive). "openai" covers any compatible endpoint.
    pub provider: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// "ENV" means: read from LLM_API_KEY
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: "openai".to_string(),
            base_url: default_base_url(),
            model: default_model(),
            api_key: String::new(),
            timeout_secs: default_timeout_secs(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

impl LlmConfig {
    /// Load from `LLM_CONFIG_PATH` or `config/llm.json`. A missing file means "disabled".
    pub fn from_env() -> anyhow::Result<Self> {
        let path = env::var(ENV_LLM_CONFIG_PATH).unwrap_or_else(|_| DEFAULT_LLM_CONFIG_PATH.into());
        if !Path::new(&path).exists() {
            return Ok(Self::default());
        }
        Self::load_from_file(path)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let data = fs::read_to_string(path)?;
        Self::from_json_str(&data)
    }

    pub fn from_json_str(data: &str) -> anyhow::Result<Self> {
        let mut cfg: LlmConfig = serde_json::from_str(data)?;

        // Normalize provider
        cfg.provider = cfg.provider.trim().to_lowercase();

        // Resolve api key if "ENV"; only an enabled provider needs one
        if cfg.api_key.trim().eq_ignore_ascii_case("env") {
            cfg.api_key = match env::var(ENV_LLM_API_KEY) {
                Ok(key) => key,
                Err(_) if !cfg.enabled => String::new(),
                Err(_) => anyhow::bail!("Missing {ENV_LLM_API_KEY} env var"),
            };
        }

        if !matches!(cfg.provider.as_str(), "openai" | "mock") {
            anyhow::bail!("Unsupported LLM provider in config: {}", cfg.provider);
        }
        if cfg.timeout_secs == 0 {
            cfg.timeout_secs = default_timeout_secs();
        }
        if !(0.0..=2.0).contains(&cfg.temperature) {
            cfg.temperature = default_temperature();
        }
        cfg.base_url = cfg.base_url.trim_end_matches('/').to_string();

        Ok(cfg)
    }
}
