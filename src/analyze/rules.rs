//! Lexical rule scorer: two fixed keyword tiers with weighted hit counts.
//!
//! score = min(1.0, 0.3 * high_hits + 0.1 * medium_hits)
//!
//! Matching is case-insensitive substring containment over the whole text (not tokenized), so
//! overlapping keywords ("account suspended" + "suspended" + "account") each count.

use serde::Serialize;

pub const HIGH_WEIGHT: f32 = 0.3;
pub const MEDIUM_WEIGHT: f32 = 0.1;

pub const HIGH_RISK_KEYWORDS: &[&str] = &[
    "verify your account",
    "account suspended",
    "suspended",
    "urgent",
    "password",
    "bank account",
    "social security",
    "click here",
    "login",
    "confirm your identity",
    "wire transfer",
    "you have won",
    "winner",
    "claim your prize",
    "gift card",
    "bitcoin",
];

pub const MEDIUM_RISK_KEYWORDS: &[&str] = &[
    "free",
    "offer",
    "limited time",
    "act now",
    "congratulations",
    "update",
    "confirm",
    "account",
    "call now",
    "reply",
    "txt",
    "cash",
    "prize",
    "unsubscribe",
    "dear customer",
];

/// Keywords that matched, per tier. Used for the score and the explanation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RuleHits {
    pub high: Vec<&'static str>,
    pub medium: Vec<&'static str>,
}

impl RuleHits {
    pub fn score(&self) -> f32 {
        let raw = HIGH_WEIGHT * self.high.len() as f32 + MEDIUM_WEIGHT * self.medium.len() as f32;
        raw.min(1.0)
    }

    pub fn is_empty(&self) -> bool {
        self.high.is_empty() && self.medium.is_empty()
    }
}

/// `score_rules(text) → [0,1]`.
pub fn score_rules(text: &str) -> f32 {
    rule_hits(text).score()
}

pub fn rule_hits(text: &str) -> RuleHits {
    let text = normalize(text);
    RuleHits {
        high: matching(&text, HIGH_RISK_KEYWORDS),
        medium: matching(&text, MEDIUM_RISK_KEYWORDS),
    }
}

// --- internals ---

fn matching(text: &str, keywords: &[&'static str]) -> Vec<&'static str> {
    keywords
        .iter()
        .copied()
        .filter(|k| text.contains(k))
        .collect()
}

/// Lowercase only. Whitespace is left as written, so "click\nhere" does not hit "click here".
pub(crate) fn normalize(input: &str) -> String {
    input.to_lowercase()
}
