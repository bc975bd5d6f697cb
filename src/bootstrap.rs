// src/bootstrap.rs
//! Build an `EngineContext` from configuration.
//!
//! Nothing here is fatal: a broken corpus falls back to the seed corpus. A classifier or reasoning
//! service that is enabled but cannot be set up becomes a `Failed*` placeholder, so requests
//! record the setup error and come back degraded. Each fallback is logged.

use std::sync::Arc;

use tracing::{info, warn};

use crate::analyze::classifier::{
    ClassifierError, DisabledClassifier, DynClassifier, FailedClassifier, LogisticClassifier,
};
use crate::analyze::corpus::{load_or_seed, seed_corpus, CorpusSource};
use crate::analyze::embedding::{DynEmbedder, HashingEmbedder};
use crate::analyze::reasoning::{build_reasoner, DynReasoner, FailedReasoner, ReasoningError};
use crate::analyze::similarity::SimilarityIndex;
use crate::config::{ClassifierConfig, EngineConfig};
use crate::config::reasoning::ReasoningConfig;
use crate::engine::{assess, AssessOptions, EngineContext};
use crate::message::Message;

pub fn build_context(config: EngineConfig) -> EngineContext {
    let embedder: DynEmbedder = Arc::new(HashingEmbedder::new(
        config.similarity.embedding_dimension,
    ));
    let (index, corpus_source) = build_index(&config, embedder);
    let classifier = build_classifier(&config.classifier);
    let reasoner = reasoner_or_disabled(&config.reasoning);

    info!(
        corpus = ?corpus_source,
        entries = index.len(),
        model = index.model_id(),
        classifier = classifier.name(),
        reasoning = reasoner.provider_name(),
        policy = config.fusion.two_signal_policy.as_str(),
        "engine context built"
    );
    EngineContext::new(config, index, corpus_source, classifier, reasoner)
}

fn build_index(config: &EngineConfig, embedder: DynEmbedder) -> (SimilarityIndex, CorpusSource) {
    let (corpus, source) = load_or_seed(config.similarity.corpus_path.as_deref());
    match SimilarityIndex::build(corpus, embedder.clone()) {
        Ok(index) => (index, source),
        Err(e) => {
            warn!(error = %e, "reference corpus rejected; degraded mode with seed corpus");
            let reason = e.to_string();
            let index = SimilarityIndex::build(seed_corpus(), embedder.clone())
                .unwrap_or_else(|_| SimilarityIndex::empty(embedder));
            (index, CorpusSource::Seed { reason })
        }
    }
}

pub fn build_classifier(cfg: &ClassifierConfig) -> DynClassifier {
    if !cfg.enabled {
        return Arc::new(DisabledClassifier);
    }
    let Some(path) = cfg.artifact_path.as_deref() else {
        warn!("classifier enabled without artifact_path; results will be degraded");
        return Arc::new(FailedClassifier(ClassifierError::Unavailable(
            "classifier enabled without artifact_path".to_string(),
        )));
    };
    match LogisticClassifier::from_path(path) {
        Ok(c) => {
            info!(path = %path.display(), "classifier artifact loaded");
            Arc::new(c)
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "classifier artifact unusable; results will be degraded");
            Arc::new(FailedClassifier(e))
        }
    }
}

fn reasoner_or_disabled(cfg: &ReasoningConfig) -> DynReasoner {
    // Safe diagnostics: only provider + enabled + key length
    info!(
        provider = %cfg.provider,
        enabled = cfg.enabled,
        key_len = cfg.resolved_api_key().map(|k| k.len()).unwrap_or(0),
        "reasoning cfg loaded"
    );
    build_reasoner(cfg).unwrap_or_else(|e| {
        warn!(error = %e, "reasoning setup failed; results will be degraded");
        Arc::new(FailedReasoner(ReasoningError::Unavailable(format!(
            "reasoning setup failed: {e}"
        ))))
    })
}

/// One-off end-to-end check of a freshly built context. Logs the outcome, never fails.
pub async fn quick_probe(ctx: &EngineContext) {
    let sample = Message::email(
        "Your mailbox is almost full. Click here to verify your account: http://mail-upgrade.example.net/login",
        "it-support@example.org",
        Some("Mailbox quota"),
    );
    match assess(ctx, &sample, AssessOptions::default()).await {
        Ok(a) => info!(
            percent = a.percent,
            mode = a.mode.as_str(),
            degraded = a.degraded,
            "engine quick probe"
        ),
        Err(e) => warn!(error = %e, "engine quick probe failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn missing_artifact_is_a_configured_failure() {
        let cfg = ClassifierConfig {
            enabled: true,
            artifact_path: Some(PathBuf::from("models/does-not-exist.json")),
        };
        let clf = build_classifier(&cfg);
        assert!(clf.is_configured());
        assert_eq!(clf.name(), "failed");
    }

    #[test]
    fn disabled_classifier_is_not_configured() {
        assert!(!build_classifier(&ClassifierConfig::default()).is_configured());
    }

    #[test]
    fn bad_corpus_path_uses_seed() {
        let mut cfg = EngineConfig::default();
        cfg.similarity.corpus_path = Some(PathBuf::from("nope/corpus.json"));
        let ctx = build_context(cfg);
        assert!(matches!(ctx.corpus_source, CorpusSource::Seed { .. }));
        assert_eq!(ctx.index.len(), seed_corpus().len());
    }
}
