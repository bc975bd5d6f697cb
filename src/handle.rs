// src/handle.rs
//! Thread-safe engine handle with whole-snapshot swaps and optional hot reload.
//!
//! Readers hold the lock only long enough to clone the `Arc`, so a swap never waits on an
//! in-flight request and in-flight requests finish on the snapshot they started with.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::thread;
use std::time::{Duration, SystemTime};

use tracing::{info, warn};

use crate::assessment::{AssessmentError, RiskAssessment};
use crate::bootstrap::build_context;
use crate::config::EngineConfig;
use crate::engine::{assess, AssessOptions, EngineContext, SharedContext};
use crate::message::Message;

pub const ENV_HOT_RELOAD: &str = "PHISHING_HOT_RELOAD";
const POLL: Duration = Duration::from_secs(2);

#[derive(Clone)]
pub struct EngineHandle {
    inner: Arc<RwLock<SharedContext>>,
}

impl EngineHandle {
    pub fn new(ctx: EngineContext) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(ctx))),
        }
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> SharedContext {
        match self.inner.read() {
            Ok(g) => g.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Replace the snapshot. Requests already running keep the old one.
    pub fn swap(&self, ctx: EngineContext) {
        let fresh = Arc::new(ctx);
        match self.inner.write() {
            Ok(mut g) => *g = fresh,
            Err(poisoned) => *poisoned.into_inner() = fresh,
        }
    }

    pub async fn assess(
        &self,
        msg: &Message,
        opts: AssessOptions,
    ) -> Result<RiskAssessment, AssessmentError> {
        let ctx = self.snapshot();
        assess(&ctx, msg, opts).await
    }
}

/// Returns true if we should enable hot reload (dev/local only).
fn hot_reload_enabled() -> bool {
    let want = std::env::var(ENV_HOT_RELOAD)
        .ok()
        .map(|v| v == "1")
        .unwrap_or(false);
    if !want {
        return false;
    }
    // Dev gating
    if cfg!(debug_assertions) {
        return true;
    }
    matches!(
        std::env::var("SHUTTLE_ENV")
            .unwrap_or_default()
            .to_ascii_lowercase()
            .as_str(),
        "local" | "development" | "dev"
    )
}

fn mtime(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Poll the config file and the corpus file every 2s; rebuild and swap the context when
/// either changes.
pub fn start_hot_reload_thread(handle: EngineHandle, config_path: PathBuf) {
    if !hot_reload_enabled() {
        return;
    }
    info!(path = %config_path.display(), "engine hot reload enabled");

    thread::spawn(move || {
        let corpus_path = |h: &EngineHandle| h.snapshot().config.similarity.corpus_path.clone();
        let mut last_cfg = mtime(&config_path);
        let mut last_corpus = corpus_path(&handle).as_deref().and_then(mtime);

        loop {
            thread::sleep(POLL);
            let cfg_now = mtime(&config_path);
            let corpus_now = corpus_path(&handle).as_deref().and_then(mtime);
            let changed = newer(cfg_now, last_cfg) || newer(corpus_now, last_corpus);
            if !changed {
                continue;
            }
            last_cfg = cfg_now;
            last_corpus = corpus_now;

            match EngineConfig::load() {
                Ok(cfg) => {
                    handle.swap(build_context(cfg));
                    info!("engine context reloaded");
                }
                Err(e) => warn!(error = %e, "engine reload skipped; keeping current context"),
            }
        }
    });
}

fn newer(now: Option<SystemTime>, before: Option<SystemTime>) -> bool {
    match (now, before) {
        (Some(n), Some(b)) => n > b,
        (Some(_), None) => true,
        _ => false,
    }
}
