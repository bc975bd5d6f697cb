// tests/extraction_robustness.rs
//
// Feature extraction and local scorers on arbitrary input.
// Uses a seeded RNG so failures are reproducible.
//
// Covered:
// - never panics, always 14 features, local scores stay in [0,1]
// - URL features are zero when no URL is present
// - malformed senders and broken URLs are tolerated
// - a bare scheme with no host counts as no URL
// - sender/link registrable-domain match

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use phishing_risk_engine::analyze::features::{extract, FEATURE_COUNT};
use phishing_risk_engine::analyze::{score_features, score_rules};

const ALPHABET: &[&str] = &[
    "a", "Z", "0", "9", "!", "@", ".", " ", "\n", "\t", ":", "/", "[", "]", "é", "ß", "€", "🙂",
    "http://", "https://", "HTTP://", "www.", ".com", ".co.uk", "verify", "URGENT", "click here",
    "password", "$", "%", "\u{0}", "\u{200b}", "re:", "@@", "[::1", ":99999",
];

fn random_text(rng: &mut StdRng, max_tokens: usize) -> String {
    let n = rng.random_range(0..=max_tokens);
    (0..n)
        .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())])
        .collect()
}

#[test]
fn extraction_never_panics_and_scores_stay_bounded() {
    let mut rng = StdRng::seed_from_u64(0x5eed_f00d);
    for _ in 0..2_000 {
        let body = random_text(&mut rng, 60);
        let sender = random_text(&mut rng, 8);
        let subject = if rng.random_bool(0.3) {
            None
        } else {
            Some(random_text(&mut rng, 10))
        };

        let v = extract(&body, &sender, subject.as_deref());
        assert_eq!(v.as_slice().len(), FEATURE_COUNT);
        assert!(v.as_slice().iter().all(|x| x.is_finite() && *x >= 0.0));

        let rule = score_rules(&body);
        let feat = score_features(&body);
        assert!((0.0..=1.0).contains(&rule), "rule {rule} for {body:?}");
        assert!((0.0..=1.0).contains(&feat), "feature {feat} for {body:?}");
    }
}

#[test]
fn texts_without_scheme_have_zero_url_features() {
    let mut rng = StdRng::seed_from_u64(42);
    let plain: Vec<&str> = ALPHABET
        .iter()
        .copied()
        .filter(|t| !t.to_ascii_lowercase().contains("http"))
        .collect();
    for _ in 0..500 {
        let n = rng.random_range(0..40);
        let body: String = (0..n)
            .map(|_| plain[rng.random_range(0..plain.len())])
            .collect();
        let v = extract(&body, "someone@example.com", Some("hello"));
        for name in [
            "num_urls",
            "url_length",
            "num_subdomains",
            "uses_https",
            "sender_matches_url",
            "has_ip_address",
        ] {
            assert_eq!(v.get(name), Some(0.0), "{name} for {body:?}");
        }
    }
}

#[test]
fn malformed_sender_is_tolerated() {
    for sender in ["", "no-at-sign", "trailing@", "@", "Name <>", "a@b@c"] {
        let v = extract(
            "Visit https://mail.paypal.com/verify today",
            sender,
            Some("hi"),
        );
        assert_eq!(v.get("num_urls"), Some(1.0));
        if sender != "a@b@c" {
            assert_eq!(v.get("sender_domain_length"), Some(0.0), "sender {sender:?}");
            assert_eq!(v.get("sender_matches_url"), Some(0.0), "sender {sender:?}");
        }
    }
}

#[test]
fn subdomain_link_matches_sender_registrable_domain() {
    let v = extract(
        "Your statement is ready: https://mail.paypal.com/statement",
        "PayPal <service@paypal.com>",
        Some("Statement"),
    );
    assert_eq!(v.get("sender_matches_url"), Some(1.0));
    assert_eq!(v.get("uses_https"), Some(1.0));
    assert_eq!(v.get("num_subdomains"), Some(1.0));
    assert_eq!(v.get("has_ip_address"), Some(0.0));
}

#[test]
fn lookalike_domain_does_not_match() {
    let v = extract(
        "Confirm now: http://paypal.com.account-check.net/login",
        "service@paypal.com",
        None,
    );
    assert_eq!(v.get("sender_matches_url"), Some(0.0));
    assert_eq!(v.get("uses_https"), Some(0.0));
}

#[test]
fn one_broken_url_does_not_hide_the_others() {
    let v = extract(
        "a http://[::1 b http://10.1.2.3/x c https://ok.example.org",
        "x@example.org",
        None,
    );
    // Only the two parseable links count.
    assert_eq!(v.get("num_urls"), Some(2.0));
    assert_eq!(v.get("has_ip_address"), Some(1.0));
    assert_eq!(v.get("uses_https"), Some(1.0));
    assert_eq!(v.get("sender_matches_url"), Some(1.0));
}

#[test]
fn bare_scheme_counts_as_no_url() {
    let v = extract("go http:// now", "x@example.org", Some("hi"));
    assert_eq!(v.get("num_urls"), Some(0.0));
    assert_eq!(v.get("url_length"), Some(0.0));
    assert_eq!(v.get("uses_https"), Some(0.0));
}
