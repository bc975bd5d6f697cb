// src/lib.rs
// Public library surface for integration tests (and reuse outside the HTTP service).

pub mod analyze;
pub mod api;
pub mod assessment;
pub mod bootstrap;
pub mod config;
pub mod engine;
pub mod handle;
pub mod logging;
pub mod message;
pub mod metrics;

// ---- Re-exports for stable public API ----
pub use crate::api::router;
pub use crate::assessment::{Confidence, Indicator, RiskAssessment, ScoreComponents};
pub use crate::engine::{assess, AssessOptions, EngineContext};
pub use crate::handle::EngineHandle;
pub use crate::message::{Channel, Message};

use axum::Router;
use tracing::info;

use crate::api::AppState;
use crate::config::EngineConfig;
use crate::handle::start_hot_reload_thread;
use crate::metrics::Metrics;

pub const ENV_QUICK_PROBE: &str = "PHISHING_QUICK_PROBE";

/// Build the full HTTP app: engine routes plus `/metrics`.
///
/// Loads `config/engine.toml` (or `PHISHING_CONFIG_PATH`), builds the engine context and, when
/// `PHISHING_HOT_RELOAD=1` in a dev environment, starts the reload watcher.
pub async fn app() -> anyhow::Result<Router> {
    let metrics = Metrics::init()?;
    let cfg = EngineConfig::load()?;
    let ctx = bootstrap::build_context(cfg);
    let handle = EngineHandle::new(ctx);
    start_hot_reload_thread(handle.clone(), EngineConfig::config_path());

    let state = AppState { engine: handle };
    Ok(api::router(state).merge(metrics.router()))
}

/// Call this from the service entrypoint (after tracing init) to run one sample message
/// through a freshly built engine. It won't fail the caller; it just logs the result.
pub async fn run_quick_probe() -> anyhow::Result<()> {
    let cfg = EngineConfig::load()?;
    let ctx = bootstrap::build_context(cfg);
    bootstrap::quick_probe(&ctx).await;
    info!("engine quick probe finished");
    Ok(())
}
