//! Reasoning adapter: provider abstraction + file cache + daily limit.
//!
//! A provider returns the model's raw answer; `CachingReasoner` turns it into a
//! `ReasoningVerdict` via `parse_reasoning_response`, caches good verdicts on disk and enforces
//! the per-day call budget. Transport problems (`Unavailable`, `Timeout`) are retryable, a
//! malformed answer (`Format`) is not.

use std::fs;
use std::future::Future;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::reasoning::ReasoningConfig;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub const MAX_RATIONALE_CHARS: usize = 300;
const MAX_PROMPT_BODY_CHARS: usize = 4_000;
pub const ENV_REASONING_TEST_MODE: &str = "REASONING_TEST_MODE";

// ------------------------------------------------------------
// Public surface
// ------------------------------------------------------------

/// What the reasoning service gets to see.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReasoningRequest {
    pub body: String,
    pub sender: String,
    pub subject: String,
    /// Classifier probability passed as context. The prompt tells the model not to echo it.
    pub classifier_probability: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningVerdict {
    /// Rounded to 4 decimals.
    pub probability: f32,
    pub rationale: String,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReasoningError {
    #[error("reasoning service unavailable: {0}")]
    Unavailable(String),
    #[error("reasoning service timed out after {0:?}")]
    Timeout(Duration),
    #[error("reasoning response malformed: {0}")]
    Format(String),
}

impl ReasoningError {
    /// Only transport failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ReasoningError::Unavailable(_) | ReasoningError::Timeout(_)
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ReasoningError::Unavailable(_) => "unavailable",
            ReasoningError::Timeout(_) => "timeout",
            ReasoningError::Format(_) => "format",
        }
    }
}

/// Trait object used by the engine.
pub trait ReasoningClient: Send + Sync {
    fn assess<'a>(
        &'a self,
        request: &'a ReasoningRequest,
    ) -> BoxFuture<'a, Result<ReasoningVerdict, ReasoningError>>;
    /// Provider name for logs and /health.
    fn provider_name(&self) -> &'static str;

    fn is_configured(&self) -> bool {
        true
    }
}

pub type DynReasoner = Arc<dyn ReasoningClient>;

/// Bound a call in time.
pub async fn assess_with_timeout(
    client: &dyn ReasoningClient,
    request: &ReasoningRequest,
    limit: Duration,
) -> Result<ReasoningVerdict, ReasoningError> {
    tokio::time::timeout(limit, client.assess(request))
        .await
        .map_err(|_| ReasoningError::Timeout(limit))?
}

/// Factory: build a client according to config and environment.
///
/// * `REASONING_TEST_MODE=mock` → deterministic mock provider behind the caching wrapper.
/// * `enabled = false` → `DisabledReasoner`.
/// * `provider = "openai"` → `OpenAiProvider` behind the caching wrapper.
pub fn build_reasoner(cfg: &ReasoningConfig) -> anyhow::Result<DynReasoner> {
    if std::env::var(ENV_REASONING_TEST_MODE)
        .map(|v| v == "mock")
        .unwrap_or(false)
    {
        let mock = MockProvider::respond(MockProvider::NEUTRAL_ANSWER);
        return Ok(Arc::new(CachingReasoner::new(
            mock,
            cfg.cache_dir.clone(),
            cfg.daily_limit,
        )));
    }

    if !cfg.enabled {
        return Ok(Arc::new(DisabledReasoner));
    }

    match cfg.provider.as_str() {
        "openai" => {
            let api_key = cfg.resolved_api_key()?;
            let provider = OpenAiProvider::new(api_key, &cfg.model, &cfg.endpoint)?;
            Ok(Arc::new(CachingReasoner::new(
                provider,
                cfg.cache_dir.clone(),
                cfg.daily_limit,
            )))
        }
        other => anyhow::bail!("unsupported reasoning provider: {other}"),
    }
}

// ------------------------------------------------------------
// Provider abstraction + concrete providers
// ------------------------------------------------------------

/// Low-level provider: one remote call returning the raw answer text.
pub trait ReasoningProvider: Send + Sync + 'static {
    fn fetch<'a>(&'a self, request: &'a ReasoningRequest) -> BoxFuture<'a, Result<String, ReasoningError>>;
    fn name(&self) -> &'static str;

    /// Model behind the provider. Part of the cache key, so switching models misses the cache.
    fn model(&self) -> &str {
        ""
    }
}

const SYSTEM_PROMPT: &str = "You are an expert in email and SMS security. Assess whether the \
message is phishing or spam. Provide a risk score from 0 (very safe) to 1 (very risky) and a \
brief explanation. Respond only in JSON with keys: risk_score (float), explanation (string).";

pub fn build_prompt(request: &ReasoningRequest) -> String {
    let body: String = request.body.chars().take(MAX_PROMPT_BODY_CHARS).collect();
    let mut out = String::with_capacity(body.len() + 256);
    if !request.sender.is_empty() {
        out.push_str(&format!("Sender: {}\n", request.sender));
    }
    if !request.subject.is_empty() {
        out.push_str(&format!("Subject: {}\n", request.subject));
    }
    out.push_str(&format!("Message body:\n{body}\n"));
    if let Some(p) = request.classifier_probability {
        out.push_str(&format!(
            "A separate statistical classifier estimated a phishing probability of {p:.4}. \
             Use it as context only and do not repeat this number in your answer.\n"
        ));
    }
    out
}

/// OpenAI Chat Completions provider.
pub struct OpenAiProvider {
    http: reqwest::Client,
    api_key: String,
    model: String,
    endpoint: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String, model: &str, endpoint: &str) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("phishing-risk-engine/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            api_key,
            model: model.to_string(),
            endpoint: endpoint.to_string(),
        })
    }
}

impl ReasoningProvider for OpenAiProvider {
    fn fetch<'a>(&'a self, request: &'a ReasoningRequest) -> BoxFuture<'a, Result<String, ReasoningError>> {
        Box::pin(async move {
            if self.api_key.is_empty() {
                return Err(ReasoningError::Unavailable("missing API key".to_string()));
            }

            #[derive(Serialize)]
            struct Msg<'a> {
                role: &'a str,
                content: &'a str,
            }
            #[derive(Serialize)]
            struct Req<'a> {
                model: &'a str,
                messages: Vec<Msg<'a>>,
                temperature: f32,
                max_tokens: u32,
            }
            #[derive(Deserialize)]
            struct Resp {
                choices: Vec<Choice>,
            }
            #[derive(Deserialize)]
            struct Choice {
                message: ChoiceMsg,
            }
            #[derive(Deserialize)]
            struct ChoiceMsg {
                content: Option<String>,
            }

            let user = build_prompt(request);
            let req = Req {
                model: &self.model,
                messages: vec![
                    Msg {
                        role: "system",
                        content: SYSTEM_PROMPT,
                    },
                    Msg {
                        role: "user",
                        content: &user,
                    },
                ],
                temperature: 0.2,
                max_tokens: 256,
            };

            let resp = self
                .http
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .json(&req)
                .send()
                .await
                .map_err(transport_error)?;

            let status = resp.status();
            if !status.is_success() {
                return Err(ReasoningError::Unavailable(format!("HTTP {status}")));
            }
            let body: Resp = resp
                .json()
                .await
                .map_err(|e| ReasoningError::Format(format!("unexpected envelope: {e}")))?;
            body.choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
                .ok_or_else(|| ReasoningError::Format("empty completion".to_string()))
        })
    }

    fn name(&self) -> &'static str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }
}

fn transport_error(e: reqwest::Error) -> ReasoningError {
    if e.is_timeout() {
        ReasoningError::Timeout(Duration::from_secs(30))
    } else {
        ReasoningError::Unavailable(e.to_string())
    }
}

/// Always `Unavailable`; used when reasoning is switched off.
pub struct DisabledReasoner;

impl ReasoningClient for DisabledReasoner {
    fn assess<'a>(
        &'a self,
        _request: &'a ReasoningRequest,
    ) -> BoxFuture<'a, Result<ReasoningVerdict, ReasoningError>> {
        Box::pin(async { Err(ReasoningError::Unavailable("reasoning disabled".to_string())) })
    }

    fn provider_name(&self) -> &'static str {
        "disabled"
    }

    fn is_configured(&self) -> bool {
        false
    }
}

/// Reasoning that was switched on but could not be set up. Stays "configured", so every
/// request records the setup error and the result is marked degraded.
pub struct FailedReasoner(pub ReasoningError);

impl ReasoningClient for FailedReasoner {
    fn assess<'a>(
        &'a self,
        _request: &'a ReasoningRequest,
    ) -> BoxFuture<'a, Result<ReasoningVerdict, ReasoningError>> {
        let err = self.0.clone();
        Box::pin(async move { Err(err) })
    }

    fn provider_name(&self) -> &'static str {
        "failed"
    }
}

/// Scripted provider for tests and local runs.
#[derive(Debug, Clone)]
pub enum MockProvider {
    Respond(String),
    Fail(ReasoningError),
    Slow(Duration, String),
}

impl MockProvider {
    pub const NEUTRAL_ANSWER: &'static str =
        r#"{"risk_score": 0.5, "explanation": "Neutral assessment (mock)."}"#;

    pub fn respond(raw: impl Into<String>) -> Self {
        MockProvider::Respond(raw.into())
    }
}

impl ReasoningProvider for MockProvider {
    fn fetch<'a>(&'a self, _request: &'a ReasoningRequest) -> BoxFuture<'a, Result<String, ReasoningError>> {
        Box::pin(async move {
            match self {
                MockProvider::Respond(raw) => Ok(raw.clone()),
                MockProvider::Fail(e) => Err(e.clone()),
                MockProvider::Slow(delay, raw) => {
                    tokio::time::sleep(*delay).await;
                    Ok(raw.clone())
                }
            }
        })
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

// ------------------------------------------------------------
// Caching wrapper (file cache + daily limit)
// ------------------------------------------------------------

/// Wraps a provider with response parsing, an optional on-disk cache and a daily call budget.
/// Only calls that reach the provider count against the budget; cache hits are free.
pub struct CachingReasoner<P: ReasoningProvider> {
    inner: P,
    cache_dir: Option<PathBuf>,
    daily_limit: u32,
    counter: Arc<Mutex<DailyCounter>>,
}

impl<P: ReasoningProvider> CachingReasoner<P> {
    pub fn new(inner: P, cache_dir: Option<PathBuf>, daily_limit: u32) -> Self {
        let counter = match &cache_dir {
            Some(dir) => {
                if let Err(e) = fs::create_dir_all(dir) {
                    warn!(dir = %dir.display(), error = %e, "reasoning cache dir unavailable");
                }
                load_daily_counter(dir).unwrap_or_default()
            }
            None => DailyCounter::default(),
        };
        Self {
            inner,
            cache_dir,
            daily_limit,
            counter: Arc::new(Mutex::new(counter)),
        }
    }

    /// Calls made against today's budget.
    pub fn calls_today(&self) -> u32 {
        let g = self.lock_counter();
        if g.is_expired() {
            0
        } else {
            g.count
        }
    }

    fn lock_counter(&self) -> MutexGuard<'_, DailyCounter> {
        self.counter.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn persist_counter(&self, dc: &DailyCounter) {
        if let Some(dir) = &self.cache_dir {
            if let Err(e) = save_daily_counter(dir, dc) {
                debug!(error = %e, "daily counter not persisted");
            }
        }
    }

    async fn assess_impl(&self, request: &ReasoningRequest) -> Result<ReasoningVerdict, ReasoningError> {
        let key = cache_key(self.inner.name(), self.inner.model(), request);
        if let Some(hit) = self.cache_dir.as_deref().and_then(|d| read_cache_file(d, &key)) {
            return Ok(hit);
        }

        // Check and reserve under one lock.
        {
            let mut g = self.lock_counter();
            if g.is_expired() {
                g.reset_to_today();
            }
            if g.count >= self.daily_limit {
                return Err(ReasoningError::Unavailable(format!(
                    "daily limit of {} calls reached",
                    self.daily_limit
                )));
            }
            g.count = g.count.saturating_add(1);
            self.persist_counter(&g);
        }

        let raw = match self.inner.fetch(request).await {
            Ok(raw) => raw,
            Err(e) => {
                // No answer came back; the slot is returned.
                self.release_slot();
                return Err(e);
            }
        };

        let verdict = parse_reasoning_response(&raw)?;
        if let Some(dir) = &self.cache_dir {
            if let Err(e) = write_cache_file(dir, &key, &verdict) {
                debug!(error = %e, "reasoning verdict not cached");
            }
        }
        Ok(verdict)
    }

    fn release_slot(&self) {
        let mut g = self.lock_counter();
        if !g.is_expired() && g.count > 0 {
            g.count -= 1;
            self.persist_counter(&g);
        }
    }
}

impl<P: ReasoningProvider> ReasoningClient for CachingReasoner<P> {
    fn assess<'a>(
        &'a self,
        request: &'a ReasoningRequest,
    ) -> BoxFuture<'a, Result<ReasoningVerdict, ReasoningError>> {
        Box::pin(self.assess_impl(request))
    }

    fn provider_name(&self) -> &'static str {
        self.inner.name()
    }
}

// ------------------------------------------------------------
// Response parsing
// ------------------------------------------------------------

const SCORE_KEYS: &[&str] = &["risk_score", "probability", "score"];
const RATIONALE_KEYS: &[&str] = &["explanation", "rationale", "reason"];

/// Parse the model answer. Tolerates code fences and prose around a single JSON object; the
/// score must be a number (or numeric string) within [0,1].
pub fn parse_reasoning_response(raw: &str) -> Result<ReasoningVerdict, ReasoningError> {
    let start = raw
        .find('{')
        .ok_or_else(|| ReasoningError::Format("no JSON object in response".to_string()))?;
    let end = raw
        .rfind('}')
        .filter(|e| *e > start)
        .ok_or_else(|| ReasoningError::Format("unterminated JSON object".to_string()))?;

    let value: Value = serde_json::from_str(&raw[start..=end])
        .map_err(|e| ReasoningError::Format(format!("invalid JSON: {e}")))?;
    let obj = value
        .as_object()
        .ok_or_else(|| ReasoningError::Format("response is not an object".to_string()))?;

    let score = SCORE_KEYS
        .iter()
        .find_map(|k| obj.get(*k))
        .ok_or_else(|| ReasoningError::Format("missing risk_score".to_string()))?;
    let p = match score {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .ok_or_else(|| ReasoningError::Format(format!("risk_score is not numeric: {score}")))?;
    if !p.is_finite() || !(0.0..=1.0).contains(&p) {
        return Err(ReasoningError::Format(format!(
            "risk_score {p} outside [0,1]"
        )));
    }

    let rationale = RATIONALE_KEYS
        .iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_str))
        .map(sanitize_rationale)
        .unwrap_or_default();

    Ok(ReasoningVerdict {
        probability: ((p * 10_000.0).round() / 10_000.0) as f32,
        rationale,
    })
}

/// ASCII-only, single line, collapsed whitespace, at most `MAX_RATIONALE_CHARS`.
pub fn sanitize_rationale(input: &str) -> String {
    let mut out = String::with_capacity(MAX_RATIONALE_CHARS);
    let mut prev_space = false;
    for ch in input.chars() {
        let c = if ch.is_ascii() && !ch.is_ascii_control() { ch } else { ' ' };
        if c == ' ' {
            if !prev_space && !out.is_empty() {
                out.push(' ');
            }
            prev_space = true;
        } else {
            out.push(c);
            prev_space = false;
        }
        if out.len() >= MAX_RATIONALE_CHARS {
            break;
        }
    }
    out.trim().to_string()
}

// ------------------------------------------------------------
// File cache helpers
// ------------------------------------------------------------

fn cache_key(provider: &str, model: &str, request: &ReasoningRequest) -> String {
    let mut h = Sha256::new();
    h.update(provider.as_bytes());
    h.update([0]);
    h.update(model.as_bytes());
    h.update([0]);
    h.update(build_prompt(request).as_bytes());
    let digest = h.finalize();
    digest.iter().take(16).map(|b| format!("{b:02x}")).collect()
}

fn cache_path(dir: &Path, key: &str) -> PathBuf {
    dir.join(format!("{key}.json"))
}

fn read_cache_file(dir: &Path, key: &str) -> Option<ReasoningVerdict> {
    let raw = fs::read_to_string(cache_path(dir, key)).ok()?;
    serde_json::from_str(&raw).ok()
}

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Write to a per-writer temp file, then rename over `path`.
fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
    let tmp = path.with_extension(format!("json.{}.{seq}.tmp", std::process::id()));
    let mut f = fs::File::create(&tmp)?;
    f.write_all(contents)?;
    fs::rename(tmp, path)
}

fn write_cache_file(dir: &Path, key: &str, value: &ReasoningVerdict) -> io::Result<()> {
    let json = serde_json::to_vec(value).map_err(io::Error::other)?;
    write_atomic(&cache_path(dir, key), &json)
}

// ------------------------------------------------------------
// Daily counter
// ------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DailyCounter {
    date: String,
    count: u32,
}

impl Default for DailyCounter {
    fn default() -> Self {
        Self {
            date: today(),
            count: 0,
        }
    }
}

impl DailyCounter {
    fn is_expired(&self) -> bool {
        self.date != today()
    }

    fn reset_to_today(&mut self) {
        self.date = today();
        self.count = 0;
    }
}

fn today() -> String {
    chrono::Utc::now().date_naive().to_string()
}

fn counter_path(dir: &Path) -> PathBuf {
    dir.join("daily_count.json")
}

fn load_daily_counter(dir: &Path) -> io::Result<DailyCounter> {
    let s = fs::read_to_string(counter_path(dir))?;
    serde_json::from_str(&s).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

fn save_daily_counter(dir: &Path, dc: &DailyCounter) -> io::Result<()> {
    let json = serde_json::to_vec(dc).map_err(io::Error::other)?;
    write_atomic(&counter_path(dir), &json)
}
