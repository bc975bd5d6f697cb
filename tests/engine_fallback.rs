// tests/engine_fallback.rs
//
// Degradation paths of a full assessment, driven through the public engine API with stub
// collaborators (no network, no files).
//
// Covered:
// - malformed reasoning answer → three-signal result, no error
// - classifier timeout → degraded, reasoning still used
// - reasoning provider outage → degraded, classifier probability kept
// - empty corpus → neutral similarity
// - invalid UTF-8 body → scored as empty text, note kept

use std::sync::Arc;
use std::time::Duration;

use phishing_risk_engine::analyze::classifier::{DisabledClassifier, DynClassifier, StubClassifier};
use phishing_risk_engine::analyze::corpus::{seed_corpus, CorpusSource, ReferenceCorpus};
use phishing_risk_engine::analyze::embedding::HashingEmbedder;
use phishing_risk_engine::analyze::reasoning::{
    CachingReasoner, DisabledReasoner, DynReasoner, MockProvider, ReasoningError,
};
use phishing_risk_engine::analyze::{FusionMode, SimilarityIndex};
use phishing_risk_engine::assessment::Signal;
use phishing_risk_engine::config::EngineConfig;
use phishing_risk_engine::{assess, AssessOptions, EngineContext, Message};

fn context_with(
    corpus: ReferenceCorpus,
    classifier: DynClassifier,
    reasoner: DynReasoner,
    cfg: EngineConfig,
) -> EngineContext {
    let index = SimilarityIndex::build(corpus, Arc::new(HashingEmbedder::default()))
        .expect("corpus builds");
    EngineContext::new(
        cfg,
        index,
        CorpusSource::Seed {
            reason: "integration test".into(),
        },
        classifier,
        reasoner,
    )
}

fn reasoner(provider: MockProvider) -> DynReasoner {
    Arc::new(CachingReasoner::new(provider, None, 1_000))
}

fn suspicious_email() -> Message {
    Message::email(
        "Dear customer, your account has been suspended. Verify your password at http://192.168.4.20/secure now!",
        "alerts@bank-example.com",
        Some("Account suspended"),
    )
}

#[tokio::test]
async fn malformed_reasoning_answer_is_not_an_error() {
    let ctx = context_with(
        seed_corpus(),
        Arc::new(StubClassifier::Fixed(0.8)),
        reasoner(MockProvider::respond("I think this is probably spam, 90%.")),
        EngineConfig::default(),
    );

    let a = assess(&ctx, &suspicious_email(), AssessOptions::default())
        .await
        .expect("assessment succeeds despite bad reasoning output");

    assert_eq!(a.mode, FusionMode::ThreeSignal);
    assert!(a.degraded);
    assert!(a.components.reasoning.is_none());
    let failure = &a.components.unavailable[0];
    assert_eq!(failure.signal, Signal::Reasoning);
    assert_eq!(failure.kind, "format");
    assert!(a.percent <= 100);
}

#[tokio::test(start_paused = true)]
async fn classifier_timeout_degrades_but_keeps_reasoning() {
    let mut cfg = EngineConfig::default();
    cfg.timeouts.classifier_ms = 50;
    let ctx = context_with(
        seed_corpus(),
        Arc::new(StubClassifier::Slow(Duration::from_secs(10), 0.9)),
        reasoner(MockProvider::respond(MockProvider::NEUTRAL_ANSWER)),
        cfg,
    );

    let a = assess(&ctx, &suspicious_email(), AssessOptions::default())
        .await
        .expect("timeout is absorbed");

    assert_eq!(a.mode, FusionMode::ThreeSignal);
    assert!(a.degraded);
    assert!(a.components.classifier.is_none());
    assert!(a.components.reasoning.is_some());
    assert_eq!(a.components.unavailable.len(), 1);
    assert_eq!(a.components.unavailable[0].signal, Signal::Classifier);
    assert_eq!(a.components.unavailable[0].kind, "timeout");
    assert!(a.explanation.contains("Degraded"), "{}", a.explanation);
}

#[tokio::test]
async fn reasoning_outage_keeps_classifier_probability() {
    let mut cfg = EngineConfig::default();
    cfg.reasoning.pass_classifier_score = false;
    let ctx = context_with(
        seed_corpus(),
        Arc::new(StubClassifier::Fixed(0.25)),
        reasoner(MockProvider::Fail(ReasoningError::Unavailable(
            "connection refused".into(),
        ))),
        cfg,
    );

    let a = assess(&ctx, &suspicious_email(), AssessOptions::default())
        .await
        .unwrap();

    assert_eq!(a.mode, FusionMode::ThreeSignal);
    assert!(a.degraded);
    assert_eq!(a.components.classifier, Some(0.25));
    assert_eq!(a.components.unavailable[0].signal, Signal::Reasoning);
}

#[tokio::test]
async fn empty_corpus_gives_neutral_similarity() {
    let ctx = context_with(
        ReferenceCorpus::default(),
        Arc::new(DisabledClassifier),
        Arc::new(DisabledReasoner),
        EngineConfig::default(),
    );

    let a = assess(
        &ctx,
        &Message::email("See you tomorrow at 10.", "friend@example.org", None::<String>),
        AssessOptions::with_examples(),
    )
    .await
    .unwrap();

    assert_eq!(a.components.similarity, 0.5);
    assert!(!a.degraded);
    assert_eq!(a.similar_examples.as_deref().map(<[_]>::len), Some(0));
}

#[tokio::test]
async fn invalid_utf8_body_is_scored_as_empty() {
    let ctx = context_with(
        seed_corpus(),
        Arc::new(DisabledClassifier),
        Arc::new(DisabledReasoner),
        EngineConfig::default(),
    );
    let msg = Message::email_from_bytes(&[0xc3, 0x28, 0xa0, 0xa1], "x@example.com", None);
    assert_eq!(msg.notes.len(), 1);

    let a = assess(&ctx, &msg, AssessOptions::default()).await.unwrap();
    assert_eq!(a.components.rule, 0.0);
    assert_eq!(a.mode, FusionMode::ThreeSignal);
}
