//! Deterministic feature extraction from message structure.
//!
//! The vector layout (length, order, meaning) is a contract with any fitted classifier.
//! Changing it means bumping `FeatureVector::SCHEMA_VERSION`.

use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::urls::{registrable_domain, scan_urls, sender_domain, UrlScan};
use crate::message::Message;

/// Number of features in schema v1.
pub const FEATURE_COUNT: usize = 14;

/// Fixed-length, fixed-order numeric features for one message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector(pub [f32; FEATURE_COUNT]);

impl FeatureVector {
    pub const SCHEMA_VERSION: u32 = 1;

    pub const NAMES: [&'static str; FEATURE_COUNT] = [
        "body_length",
        "num_digits",
        "subject_length",
        "subject_empty",
        "num_exclamation_marks",
        "num_uppercase_words",
        "is_reply",
        "sender_domain_length",
        "num_urls",
        "url_length",
        "num_subdomains",
        "uses_https",
        "sender_matches_url",
        "has_ip_address",
    ];

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        FEATURE_COUNT
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Lookup by schema name.
    pub fn get(&self, name: &str) -> Option<f32> {
        Self::NAMES
            .iter()
            .position(|n| *n == name)
            .map(|i| self.0[i])
    }

    /// `(name, value)` pairs in schema order.
    pub fn named(&self) -> impl Iterator<Item = (&'static str, f32)> + '_ {
        Self::NAMES.iter().copied().zip(self.0.iter().copied())
    }
}

/// Vector plus the URL scan it was derived from.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub vector: FeatureVector,
    pub urls: UrlScan,
}

/// `extract(body, sender, subject) → FeatureVector`. Never panics.
pub fn extract(body: &str, sender: &str, subject: Option<&str>) -> FeatureVector {
    extract_report(body, sender, subject).vector
}

pub fn extract_message(msg: &Message) -> Extraction {
    extract_report(&msg.body, &msg.sender, msg.subject.as_deref())
}

/// Full extraction, keeping the per-URL outcomes.
pub fn extract_report(body: &str, sender: &str, subject: Option<&str>) -> Extraction {
    let subject = subject.unwrap_or("");
    let sender_dom = sender_domain(sender);
    let sender_reg = sender_dom.and_then(registrable_domain);

    let urls = scan_urls(body);
    if !urls.skipped.is_empty() {
        counter!(crate::metrics::URL_PARSE_FAILURES).increment(urls.skipped.len() as u64);
        debug!(
            target: "phishing::features",
            skipped = urls.skipped.len(),
            detected = urls.detected(),
            "skipped unparseable URLs"
        );
    }

    let mut url_length = 0usize;
    let mut num_subdomains = 0usize;
    let mut uses_https = false;
    let mut sender_matches_url = false;
    let mut has_ip_address = false;
    for u in &urls.parsed {
        url_length = url_length.max(u.raw.chars().count());
        num_subdomains = num_subdomains.max(u.subdomain_depth);
        uses_https |= u.https;
        has_ip_address |= u.is_ip;
        if let Some(reg) = &sender_reg {
            sender_matches_url |= !u.is_ip && *reg == u.registrable;
        }
    }

    let v = [
        body.chars().count() as f32,
        body.chars().filter(|c| c.is_ascii_digit()).count() as f32,
        subject.chars().count() as f32,
        flag(subject.is_empty()),
        body.matches('!').count() as f32,
        body.split_whitespace().filter(|w| is_uppercase_word(w)).count() as f32,
        flag(is_reply(subject)),
        sender_dom.map(|d| d.chars().count()).unwrap_or(0) as f32,
        urls.parsed.len() as f32,
        url_length as f32,
        num_subdomains as f32,
        flag(uses_https),
        flag(sender_matches_url),
        flag(has_ip_address),
    ];

    Extraction {
        vector: FeatureVector(v),
        urls,
    }
}

fn flag(b: bool) -> f32 {
    if b {
        1.0
    } else {
        0.0
    }
}

/// A word counts as uppercase when it has at least one cased letter and no lowercase ones.
pub(crate) fn is_uppercase_word(word: &str) -> bool {
    let mut cased = false;
    for c in word.chars() {
        if c.is_lowercase() {
            return false;
        }
        if c.is_uppercase() {
            cased = true;
        }
    }
    cased
}

fn is_reply(subject: &str) -> bool {
    subject
        .trim_start()
        .get(..3)
        .is_some_and(|p| p.eq_ignore_ascii_case("re:"))
}
