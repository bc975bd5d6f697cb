// tests/reasoning_cache.rs
//
// Caching reasoning client against an on-disk cache directory.
//
// Covered:
// - identical requests are served from the file cache (provider hit once, budget charged once)
// - the daily counter survives a new client on the same directory
// - malformed answers are not cached and still consume budget
// - concurrent misses never overshoot the daily budget; transport failures give the slot back
// - switching the model misses the cache
// - concurrent writers of one key leave a readable entry and no temp files
// - REASONING_TEST_MODE=mock wires the mock provider through the factory

use std::env;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serial_test::serial;

use phishing_risk_engine::analyze::reasoning::{
    build_reasoner, BoxFuture, CachingReasoner, MockProvider, ReasoningClient, ReasoningError,
    ReasoningProvider, ReasoningRequest,
};
use phishing_risk_engine::config::reasoning::ReasoningConfig;

/// Provider that answers with a fixed string and counts how often it was reached.
struct CountingProvider {
    answer: String,
    model: &'static str,
    calls: Arc<AtomicUsize>,
}

impl ReasoningProvider for CountingProvider {
    fn fetch<'a>(
        &'a self,
        _request: &'a ReasoningRequest,
    ) -> BoxFuture<'a, Result<String, ReasoningError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let answer = self.answer.clone();
        Box::pin(async move { Ok(answer) })
    }

    fn name(&self) -> &'static str {
        "counting"
    }

    fn model(&self) -> &str {
        self.model
    }
}

fn fresh_dir(name: &str) -> PathBuf {
    let dir = env::temp_dir().join(format!(
        "phishing_reasoning_{}_{}_{}",
        name,
        std::process::id(),
        std::time::UNIX_EPOCH.elapsed().unwrap().as_nanos()
    ));
    let _ = fs::remove_dir_all(&dir);
    dir
}

fn request(body: &str) -> ReasoningRequest {
    ReasoningRequest {
        body: body.to_string(),
        sender: "billing@example.com".to_string(),
        subject: "Invoice".to_string(),
        classifier_probability: Some(0.4),
    }
}

fn client(answer: &str, dir: &PathBuf, limit: u32) -> (CachingReasoner<CountingProvider>, Arc<AtomicUsize>) {
    client_for_model("m1", answer, dir, limit)
}

fn client_for_model(
    model: &'static str,
    answer: &str,
    dir: &PathBuf,
    limit: u32,
) -> (CachingReasoner<CountingProvider>, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let provider = CountingProvider {
        answer: answer.to_string(),
        model,
        calls: calls.clone(),
    };
    (CachingReasoner::new(provider, Some(dir.clone()), limit), calls)
}

#[tokio::test]
async fn repeated_request_hits_file_cache() {
    let dir = fresh_dir("hit");
    let (c, calls) = client(r#"{"risk_score": 0.8, "explanation": "Invoice lure."}"#, &dir, 10);

    let first = c.assess(&request("Pay invoice 4411 today")).await.unwrap();
    let second = c.assess(&request("Pay invoice 4411 today")).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first.probability, 0.8);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(c.calls_today(), 1);

    let _ = fs::remove_dir_all(dir);
}

#[tokio::test]
async fn daily_counter_is_shared_through_the_cache_dir() {
    let dir = fresh_dir("budget");
    let answer = r#"{"risk_score": 0.2, "explanation": "Looks routine."}"#;

    let (c1, _) = client(answer, &dir, 2);
    c1.assess(&request("one")).await.unwrap();
    c1.assess(&request("two")).await.unwrap();
    drop(c1);

    let (c2, calls) = client(answer, &dir, 2);
    assert_eq!(c2.calls_today(), 2);
    let err = c2.assess(&request("three")).await.unwrap_err();
    assert!(matches!(err, ReasoningError::Unavailable(_)), "{err:?}");
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    // Cached answers are still served once the budget is spent.
    assert!(c2.assess(&request("one")).await.is_ok());

    let _ = fs::remove_dir_all(dir);
}

#[tokio::test]
async fn malformed_answers_are_not_cached() {
    let dir = fresh_dir("format");
    let (c, calls) = client("definitely a scam", &dir, 10);

    for _ in 0..2 {
        let err = c.assess(&request("same body")).await.unwrap_err();
        assert_eq!(err.kind(), "format");
    }
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(c.calls_today(), 2);

    let _ = fs::remove_dir_all(dir);
}

#[tokio::test(start_paused = true)]
async fn concurrent_misses_respect_daily_limit() {
    let c = CachingReasoner::new(
        MockProvider::Slow(
            Duration::from_millis(200),
            MockProvider::NEUTRAL_ANSWER.to_string(),
        ),
        None,
        1,
    );

    let (r1, r2, r3) = (
        request("first body"),
        request("second body"),
        request("third body"),
    );
    let (a, b, d) = tokio::join!(c.assess(&r1), c.assess(&r2), c.assess(&r3));
    let ok = [&a, &b, &d].iter().filter(|r| r.is_ok()).count();
    assert_eq!(ok, 1, "{a:?} {b:?} {d:?}");
    assert_eq!(c.calls_today(), 1);
}

#[tokio::test]
async fn transport_failure_returns_the_slot() {
    let c = CachingReasoner::new(
        MockProvider::Fail(ReasoningError::Unavailable("connection reset".into())),
        None,
        1,
    );
    for _ in 0..3 {
        let err = c.assess(&request("body")).await.unwrap_err();
        assert!(err.is_retryable());
    }
    assert_eq!(c.calls_today(), 0);
}

#[tokio::test]
async fn model_switch_misses_the_cache() {
    let dir = fresh_dir("model");
    let (old, old_calls) =
        client_for_model("m1", r#"{"risk_score": 0.8, "explanation": "old"}"#, &dir, 10);
    assert_eq!(old.assess(&request("same")).await.unwrap().probability, 0.8);
    assert_eq!(old_calls.load(Ordering::SeqCst), 1);
    drop(old);

    let (new, new_calls) =
        client_for_model("m2", r#"{"risk_score": 0.2, "explanation": "new"}"#, &dir, 10);
    assert_eq!(new.assess(&request("same")).await.unwrap().probability, 0.2);
    assert_eq!(new_calls.load(Ordering::SeqCst), 1);

    let _ = fs::remove_dir_all(dir);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_writers_leave_no_temp_files() {
    let dir = fresh_dir("tmp");
    let (c, _) = client(r#"{"risk_score": 0.6, "explanation": "x"}"#, &dir, 100);
    let c = Arc::new(c);

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let c = c.clone();
            tokio::spawn(async move { c.assess(&request("identical")).await })
        })
        .collect();
    for t in tasks {
        assert_eq!(t.await.unwrap().unwrap().probability, 0.6);
    }

    let leftovers: Vec<_> = fs::read_dir(&dir)
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty(), "{leftovers:?}");
    assert_eq!(c.assess(&request("identical")).await.unwrap().probability, 0.6);

    let _ = fs::remove_dir_all(dir);
}

#[tokio::test]
#[serial]
async fn test_mode_mock_is_used_by_factory() {
    let prev = env::var("REASONING_TEST_MODE").ok();
    env::set_var("REASONING_TEST_MODE", "mock");

    let cfg = ReasoningConfig {
        cache_dir: None,
        ..ReasoningConfig::default()
    };
    let reasoner = build_reasoner(&cfg).expect("mock reasoner");
    assert!(reasoner.is_configured());
    assert_eq!(reasoner.provider_name(), "mock");
    let v = reasoner.assess(&request("hello")).await.unwrap();
    assert_eq!(v.probability, 0.5);

    match prev {
        Some(v) => env::set_var("REASONING_TEST_MODE", v),
        None => env::remove_var("REASONING_TEST_MODE"),
    }
}
