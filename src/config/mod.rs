//! Engine configuration: `config/engine.toml` plus environment overrides.
//!
//! Resolution order: built-in defaults < TOML file < env vars. A missing file at the default
//! location is fine (defaults are used); a missing file named by `PHISHING_CONFIG_PATH` is an
//! error.

pub mod reasoning;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::analyze::fusion::TwoSignalPolicy;
use crate::analyze::similarity::{DEFAULT_EXAMPLE_K, DEFAULT_TOP_K};
use reasoning::ReasoningConfig;

// --- env defaults & names ---
pub const DEFAULT_CONFIG_PATH: &str = "config/engine.toml";

pub const ENV_CONFIG_PATH: &str = "PHISHING_CONFIG_PATH";
pub const ENV_CORPUS_PATH: &str = "PHISHING_CORPUS_PATH";
pub const ENV_TWO_SIGNAL_POLICY: &str = "PHISHING_TWO_SIGNAL_POLICY";
pub const ENV_REASONING_TIMEOUT_MS: &str = "PHISHING_REASONING_TIMEOUT_MS";
pub const ENV_CLASSIFIER_TIMEOUT_MS: &str = "PHISHING_CLASSIFIER_TIMEOUT_MS";

const DEFAULT_EMBEDDING_DIMENSION: usize = 256;
const DEFAULT_CLASSIFIER_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_REASONING_TIMEOUT_MS: u64 = 15_000;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub similarity: SimilarityConfig,
    pub fusion: FusionConfig,
    pub classifier: ClassifierConfig,
    pub reasoning: ReasoningConfig,
    pub timeouts: TimeoutConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimilarityConfig {
    /// Reference corpus JSON. Absent means the built-in seed corpus.
    pub corpus_path: Option<PathBuf>,
    pub top_k: usize,
    pub example_k: usize,
    pub embedding_dimension: usize,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            corpus_path: None,
            top_k: DEFAULT_TOP_K,
            example_k: DEFAULT_EXAMPLE_K,
            embedding_dimension: DEFAULT_EMBEDDING_DIMENSION,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    pub two_signal_policy: TwoSignalPolicy,
    /// Skip external signals when the local score is at or above this value.
    pub early_exit_high: Option<f32>,
    /// Skip external signals when the local score is at or below this value.
    pub early_exit_low: Option<f32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub enabled: bool,
    pub artifact_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub classifier_ms: u64,
    pub reasoning_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            classifier_ms: DEFAULT_CLASSIFIER_TIMEOUT_MS,
            reasoning_ms: DEFAULT_REASONING_TIMEOUT_MS,
        }
    }
}

impl EngineConfig {
    /// Path from `PHISHING_CONFIG_PATH`, else `config/engine.toml`.
    pub fn config_path() -> PathBuf {
        std::env::var(ENV_CONFIG_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    /// Load from the configured path and apply env overrides.
    pub fn load() -> anyhow::Result<Self> {
        let explicit = std::env::var(ENV_CONFIG_PATH).is_ok();
        let path = Self::config_path();
        let mut cfg = if path.exists() || explicit {
            Self::load_from(&path)?
        } else {
            info!(path = %path.display(), "engine config not found; using defaults");
            Self::default()
        };
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading engine config {}", path.display()))?;
        Self::from_toml_str(&raw).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_toml_str(toml_str: &str) -> anyhow::Result<Self> {
        let mut cfg: EngineConfig = toml::from_str(toml_str)?;
        cfg.sanitize();
        Ok(cfg)
    }

    /// Env vars win over the file. Unparseable values are logged and ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Some(p) = env_nonempty(ENV_CORPUS_PATH) {
            self.similarity.corpus_path = Some(PathBuf::from(p));
        }
        if let Some(raw) = env_nonempty(ENV_TWO_SIGNAL_POLICY) {
            match raw.parse::<TwoSignalPolicy>() {
                Ok(p) => self.fusion.two_signal_policy = p,
                Err(e) => warn!(var = ENV_TWO_SIGNAL_POLICY, error = %e, "ignoring env override"),
            }
        }
        if let Some(ms) = parse_millis_env(ENV_REASONING_TIMEOUT_MS) {
            self.timeouts.reasoning_ms = ms;
        }
        if let Some(ms) = parse_millis_env(ENV_CLASSIFIER_TIMEOUT_MS) {
            self.timeouts.classifier_ms = ms;
        }
    }

    pub fn classifier_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.classifier_ms)
    }

    pub fn reasoning_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.reasoning_ms)
    }

    fn sanitize(&mut self) {
        self.reasoning.normalize();

        if self.similarity.top_k == 0 {
            warn!("similarity.top_k must be >= 1; using {DEFAULT_TOP_K}");
            self.similarity.top_k = DEFAULT_TOP_K;
        }
        if self.similarity.embedding_dimension == 0 {
            self.similarity.embedding_dimension = DEFAULT_EMBEDDING_DIMENSION;
        }

        let f = &mut self.fusion;
        f.early_exit_high = f.early_exit_high.map(|v| v.clamp(0.0, 1.0));
        f.early_exit_low = f.early_exit_low.map(|v| v.clamp(0.0, 1.0));
        if let (Some(lo), Some(hi)) = (f.early_exit_low, f.early_exit_high) {
            if lo >= hi {
                warn!(lo, hi, "early-exit thresholds overlap; early exit disabled");
                f.early_exit_low = None;
                f.early_exit_high = None;
            }
        }
    }
}

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_millis_env(name: &str) -> Option<u64> {
    let raw = env_nonempty(name)?;
    match raw.parse::<u64>() {
        Ok(ms) if ms > 0 => Some(ms),
        _ => {
            warn!(var = name, value = %raw, "ignoring env override: expected positive milliseconds");
            None
        }
    }
}
