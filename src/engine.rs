//! Request orchestration.
//!
//! One `assess` call: extract features, run the three local scorers, optionally stop early,
//! query the external classifier and reasoning service under timeouts, then fuse. External
//! failures are recorded on the components and never abort the request.
//!
//! All shared state lives in an immutable `EngineContext`; callers hold it behind an `Arc` and
//! swap whole snapshots (see `handle.rs`).

use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use tracing::{debug, error, info, warn};

use crate::analyze::classifier::{predict_with_timeout, ClassifierInput, DynClassifier};
use crate::analyze::corpus::CorpusSource;
use crate::analyze::features::extract_message;
use crate::analyze::fusion::{assess_components, three_signal, TwoSignalPolicy};
use crate::analyze::patterns::score_features;
use crate::analyze::reasoning::{
    assess_with_timeout, DynReasoner, ReasoningError, ReasoningRequest, ReasoningVerdict,
};
use crate::analyze::rules::rule_hits;
use crate::analyze::similarity::{aggregate, SimilarityIndex};
use crate::assessment::{AssessmentError, RiskAssessment, ScoreComponents, Signal, SignalFailure};
use crate::config::EngineConfig;
use crate::logging::anon_hash;
use crate::message::{Channel, Message};
use crate::metrics as m;

/// Everything a request needs, frozen at build time.
pub struct EngineContext {
    pub config: EngineConfig,
    pub index: SimilarityIndex,
    pub corpus_source: CorpusSource,
    pub classifier: DynClassifier,
    pub reasoner: DynReasoner,
}

impl EngineContext {
    pub fn new(
        config: EngineConfig,
        index: SimilarityIndex,
        corpus_source: CorpusSource,
        classifier: DynClassifier,
        reasoner: DynReasoner,
    ) -> Self {
        gauge!(m::CORPUS_ENTRIES).set(index.len() as f64);
        Self {
            config,
            index,
            corpus_source,
            classifier,
            reasoner,
        }
    }

    pub fn policy(&self) -> TwoSignalPolicy {
        self.config.fusion.two_signal_policy
    }

    fn early_exit(&self, local: f32) -> bool {
        let f = &self.config.fusion;
        f.early_exit_high.is_some_and(|hi| local >= hi)
            || f.early_exit_low.is_some_and(|lo| local <= lo)
    }
}

/// Per-request switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssessOptions {
    /// Attach the nearest corpus examples to the result.
    pub include_examples: bool,
}

impl AssessOptions {
    pub fn with_examples() -> Self {
        Self {
            include_examples: true,
        }
    }
}

/// Score one message against a context snapshot.
pub async fn assess(
    ctx: &EngineContext,
    msg: &Message,
    opts: AssessOptions,
) -> Result<RiskAssessment, AssessmentError> {
    let started = Instant::now();
    let text = msg.scoring_text();
    let id = anon_hash(&text);

    // (1) local signals
    let extraction = extract_message(msg);
    let hits = rule_hits(&text);
    let rule = hits.score();
    let feature = score_features(&text);

    let sim_cfg = &ctx.config.similarity;
    let query = ctx.index.embed(&text);
    let want = if opts.include_examples {
        sim_cfg.top_k.max(sim_cfg.example_k)
    } else {
        sim_cfg.top_k
    };
    let neighbors = ctx.index.neighbors(&query, want);
    let scored: Vec<(u8, f32)> = neighbors
        .iter()
        .take(sim_cfg.top_k)
        .map(|n| (n.label, n.similarity))
        .collect();
    let similarity = aggregate(&scored);

    if ![rule, similarity, feature].iter().all(|s| s.is_finite()) {
        error!(%id, rule, similarity, feature, "local scorers produced non-finite output");
        return Err(AssessmentError::NoSignal);
    }

    let mut components = ScoreComponents::local(rule, similarity, feature);

    // (2) early exit
    let local = three_signal(rule, similarity, feature);
    let early_exit = msg.channel == Channel::Email && ctx.early_exit(local);
    if early_exit {
        counter!(m::EARLY_EXITS).increment(1);
        debug!(%id, local, "local score decisive; external signals skipped");
    }

    // (3) external signals (email only)
    if msg.channel == Channel::Email && !early_exit {
        let input = ClassifierInput {
            features: extraction.vector,
            lexical: lexical_block(ctx, &query),
        };
        let (clf, reasoning) = external_signals(ctx, msg, &input).await;
        components = record(components, &id, clf, reasoning);
    }

    // (4) fuse
    let mut out = assess_components(components, ctx.policy(), &hits, early_exit)?;
    if opts.include_examples {
        let k = sim_cfg.example_k.min(neighbors.len());
        out = out.with_examples(ctx.index.examples(&neighbors[..k]));
    }

    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
    counter!(m::ASSESSMENTS, "mode" => out.mode.as_str()).increment(1);
    histogram!(m::ASSESS_DURATION_MS).record(elapsed_ms);
    info!(
        %id,
        percent = out.percent,
        indicator = %out.indicator,
        mode = out.mode.as_str(),
        degraded = out.degraded,
        early_exit = out.early_exit,
        urls = extraction.urls.detected(),
        skipped_urls = extraction.urls.skipped.len(),
        elapsed_ms,
        "message assessed"
    );
    Ok(out)
}

type ClassifierOutcome = Option<Result<f32, crate::analyze::classifier::ClassifierError>>;
type ReasoningOutcome = Option<Result<ReasoningVerdict, ReasoningError>>;

/// Lexical features for classifiers that want them, taken from the query embedding when the
/// dimensions agree. A mismatch is left for the classifier to reject as a schema error.
fn lexical_block(ctx: &EngineContext, query: &[f32]) -> Option<Vec<f32>> {
    match ctx.classifier.lexical_dimension() {
        Some(d) if d == query.len() => Some(query.to_vec()),
        Some(d) => {
            warn!(
                expected = d,
                embedder = query.len(),
                "classifier lexical dimension differs from embedder"
            );
            None
        }
        None => None,
    }
}

/// Run the configured external adapters. The reasoning call gets the classifier probability as
/// context when enabled, otherwise both calls run concurrently.
async fn external_signals(
    ctx: &EngineContext,
    msg: &Message,
    input: &ClassifierInput,
) -> (ClassifierOutcome, ReasoningOutcome) {
    let clf_timeout = ctx.config.classifier_timeout();
    let rsn_timeout = ctx.config.reasoning_timeout();
    let use_clf = ctx.classifier.is_configured();
    let use_rsn = ctx.reasoner.is_configured();

    let request = |classifier_probability: Option<f32>| ReasoningRequest {
        body: msg.body.clone(),
        sender: msg.sender.clone(),
        subject: msg.subject().to_string(),
        classifier_probability,
    };

    if ctx.config.reasoning.pass_classifier_score {
        let clf = if use_clf {
            Some(predict_with_timeout(ctx.classifier.as_ref(), input, clf_timeout).await)
        } else {
            None
        };
        let rsn = if use_rsn {
            let p = clf.as_ref().and_then(|r| r.as_ref().ok().copied());
            let req = request(p);
            Some(assess_with_timeout(ctx.reasoner.as_ref(), &req, rsn_timeout).await)
        } else {
            None
        };
        (clf, rsn)
    } else {
        let req = request(None);
        let clf_fut = async {
            if use_clf {
                Some(predict_with_timeout(ctx.classifier.as_ref(), input, clf_timeout).await)
            } else {
                None
            }
        };
        let rsn_fut = async {
            if use_rsn {
                Some(assess_with_timeout(ctx.reasoner.as_ref(), &req, rsn_timeout).await)
            } else {
                None
            }
        };
        tokio::join!(clf_fut, rsn_fut)
    }
}

/// Fold adapter outcomes into the components, logging and counting failures.
fn record(
    mut components: ScoreComponents,
    id: &str,
    clf: ClassifierOutcome,
    reasoning: ReasoningOutcome,
) -> ScoreComponents {
    match clf {
        Some(Ok(p)) => components = components.with_classifier(p),
        Some(Err(e)) => {
            warn!(%id, kind = e.kind(), error = %e, "classifier signal unavailable");
            counter!(m::SIGNAL_FAILURES, "signal" => "classifier", "kind" => e.kind())
                .increment(1);
            components = components.with_failure(SignalFailure::new(
                Signal::Classifier,
                e.kind(),
                e.to_string(),
            ));
        }
        None => {}
    }

    match reasoning {
        Some(Ok(v)) => components = components.with_reasoning(v),
        Some(Err(e)) => {
            if let ReasoningError::Format(_) = e {
                error!(%id, error = %e, "reasoning answer unusable");
                counter!(m::REASONING_FORMAT_ERRORS).increment(1);
            } else {
                warn!(%id, kind = e.kind(), retryable = e.is_retryable(), error = %e, "reasoning signal unavailable");
            }
            counter!(m::SIGNAL_FAILURES, "signal" => "reasoning", "kind" => e.kind()).increment(1);
            components = components.with_failure(SignalFailure::new(
                Signal::Reasoning,
                e.kind(),
                e.to_string(),
            ));
        }
        None => {}
    }
    components
}

/// Shared context snapshot, as held by `EngineHandle`.
pub type SharedContext = Arc<EngineContext>;
