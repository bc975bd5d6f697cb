// src/config/reasoning.rs
use serde::{Deserialize, Serialize};
use std::{env, path::PathBuf};

pub const DEFAULT_OPENAI_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

fn default_provider() -> String {
    "openai".to_string()
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_api_key() -> String {
    "ENV".to_string()
}
fn default_daily_limit() -> u32 {
    200
}
fn default_cache_dir() -> Option<PathBuf> {
    Some(PathBuf::from("cache/reasoning"))
}
fn default_endpoint() -> String {
    DEFAULT_OPENAI_ENDPOINT.to_string()
}
fn default_true() -> bool {
    true
}

/// `[reasoning]` table of `config/engine.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Only "openai" is wired up (case-insensitive).
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// "ENV" means: read from OPENAI_API_KEY.
    #[serde(default = "default_api_key")]
    pub api_key: String,
    #[serde(default = "default_daily_limit")]
    pub daily_limit: u32,
    /// On-disk verdict cache. Absent disables caching.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: Option<PathBuf>,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Hand the classifier probability to the reasoning prompt. When false both calls run
    /// concurrently.
    #[serde(default = "default_true")]
    pub pass_classifier_score: bool,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: default_provider(),
            model: default_model(),
            api_key: default_api_key(),
            daily_limit: default_daily_limit(),
            cache_dir: default_cache_dir(),
            endpoint: default_endpoint(),
            pass_classifier_score: true,
        }
    }
}

impl ReasoningConfig {
    /// Lowercase the provider name.
    pub fn normalize(&mut self) {
        self.provider = self.provider.trim().to_lowercase();
    }

    /// The literal key, or the provider's env var when configured as "ENV".
    pub fn resolved_api_key(&self) -> anyhow::Result<String> {
        if !self.api_key.trim().eq_ignore_ascii_case("env") {
            return Ok(self.api_key.clone());
        }
        match self.provider.as_str() {
            "openai" => env::var("OPENAI_API_KEY")
                .map_err(|_| anyhow::anyhow!("Missing OPENAI_API_KEY env var")),
            other => anyhow::bail!("Unsupported provider in config: {other}"),
        }
    }
}
