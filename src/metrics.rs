use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

pub const URL_PARSE_FAILURES: &str = "phishing_url_parse_failures_total";
pub const REASONING_FORMAT_ERRORS: &str = "phishing_reasoning_format_errors_total";
pub const ASSESSMENTS: &str = "phishing_assessments_total";
pub const SIGNAL_FAILURES: &str = "phishing_signal_failures_total";
pub const EARLY_EXITS: &str = "phishing_early_exit_total";
pub const ASSESS_DURATION_MS: &str = "phishing_assess_duration_ms";
pub const CORPUS_ENTRIES: &str = "phishing_corpus_entries";

static RECORDER: OnceCell<PrometheusHandle> = OnceCell::new();

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder (once per process) and describe the engine series.
    pub fn init() -> anyhow::Result<Self> {
        // Use default buckets to avoid API differences across crate versions.
        let handle = RECORDER
            .get_or_try_init(|| PrometheusBuilder::new().install_recorder())?
            .clone();
        ensure_described();
        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}

pub(crate) fn ensure_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(URL_PARSE_FAILURES, "URLs detected in a body but not parseable.");
        describe_counter!(
            REASONING_FORMAT_ERRORS,
            "Reasoning answers that could not be parsed into a verdict."
        );
        describe_counter!(ASSESSMENTS, "Completed assessments by fusion mode.");
        describe_counter!(
            SIGNAL_FAILURES,
            "External signals that were requested but unusable, by signal and kind."
        );
        describe_counter!(EARLY_EXITS, "Assessments decided by local signals alone.");
        describe_histogram!(ASSESS_DURATION_MS, "End-to-end assessment time in milliseconds.");
        describe_gauge!(CORPUS_ENTRIES, "Entries in the active reference corpus.");
    });
}
