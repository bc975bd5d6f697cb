//! Feature-pattern scorer: ten independent boolean indicators, score = fraction true.
//!
//! A coarse, explainable density measure. It differs from the rule scorer on purpose: every
//! indicator weighs the same and repeated hits do not accumulate.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use super::features::is_uppercase_word;
use super::rules::normalize;

const URGENCY: &[&str] = &[
    "urgent",
    "immediately",
    "asap",
    "right away",
    "act now",
    "expires",
    "expire",
    "limited time",
    "final notice",
    "last chance",
    "within 24 hours",
];
const MONEY: &[&str] = &[
    "win", "winner", "prize", "cash", "reward", "lottery", "free", "claim", "£", "$", "€",
    "bonus", "refund",
];
const THREAT: &[&str] = &[
    "suspend",
    "locked",
    "terminated",
    "legal action",
    "unauthorized",
    "penalty",
    "arrest",
    "blocked",
    "deactivated",
];
const REQUEST: &[&str] = &[
    "click",
    "verify",
    "confirm",
    "update your",
    "log in",
    "login",
    "provide",
    "send us",
    "reply with",
    "call",
];
const SMS_TOKENS: &[&str] = &[
    "txt", "text", "sms", "msg", "reply", "stop", "ringtone", "mobile", "per min", "ppm",
];

/// Word tokens for the SMS token check (short tokens like "txt" must not match inside words).
static WORD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?u)\b\w+\b").expect("word regex"));

const CAPS_RATIO_THRESHOLD: f32 = 0.3;
const SHORT_MESSAGE_WORDS: usize = 10;

/// The ten indicators, in a fixed order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PatternFlags {
    pub urgency: bool,
    pub has_link: bool,
    pub money: bool,
    pub threat: bool,
    pub request: bool,
    pub excessive_caps: bool,
    pub short: bool,
    pub sms_tokens: bool,
    pub has_digits: bool,
    pub non_ascii: bool,
}

impl PatternFlags {
    pub const COUNT: usize = 10;

    pub fn as_array(&self) -> [bool; Self::COUNT] {
        [
            self.urgency,
            self.has_link,
            self.money,
            self.threat,
            self.request,
            self.excessive_caps,
            self.short,
            self.sms_tokens,
            self.has_digits,
            self.non_ascii,
        ]
    }

    pub fn fraction(&self) -> f32 {
        let hits = self.as_array().iter().filter(|b| **b).count();
        hits as f32 / Self::COUNT as f32
    }
}

/// `score_features(text) → [0,1]`.
pub fn score_features(text: &str) -> f32 {
    pattern_flags(text).fraction()
}

pub fn pattern_flags(text: &str) -> PatternFlags {
    let lower = normalize(text);
    let words: Vec<&str> = text.split_whitespace().collect();
    let caps = words.iter().filter(|w| is_uppercase_word(w)).count();
    let caps_ratio = if words.is_empty() {
        0.0
    } else {
        caps as f32 / words.len() as f32
    };

    PatternFlags {
        urgency: contains_any(&lower, URGENCY),
        has_link: lower.contains("http") || lower.contains("www."),
        money: contains_any(&lower, MONEY),
        threat: contains_any(&lower, THREAT),
        request: contains_any(&lower, REQUEST),
        excessive_caps: caps_ratio > CAPS_RATIO_THRESHOLD,
        short: words.len() < SHORT_MESSAGE_WORDS,
        sms_tokens: has_sms_tokens(&lower),
        has_digits: text.chars().any(|c| c.is_ascii_digit()),
        non_ascii: !text.is_ascii(),
    }
}

fn contains_any(text: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| text.contains(n))
}

fn has_sms_tokens(lower: &str) -> bool {
    if SMS_TOKENS
        .iter()
        .filter(|t| t.contains(' '))
        .any(|t| lower.contains(t))
    {
        return true;
    }
    WORD_RE
        .find_iter(lower)
        .any(|m| SMS_TOKENS.contains(&m.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_only_trips_short() {
        let f = pattern_flags("");
        assert!(f.short);
        assert!((f.fraction() - 0.1).abs() < 1e-6);
    }

    #[test]
    fn classic_sms_spam_trips_most_indicators() {
        let text = "URGENT! You WIN £1000 cash. Txt CLAIM to 80082 now to verify before it expires, or account is suspended";
        let f = pattern_flags(text);
        assert!(f.urgency && f.money && f.threat && f.request);
        assert!(f.sms_tokens && f.has_digits && f.non_ascii);
        assert!(!f.has_link);
        assert!(!f.short);
        assert!(!f.excessive_caps);
        assert!((score_features(text) - 0.7).abs() < 1e-6);
    }

    #[test]
    fn sms_token_needs_word_boundary() {
        assert!(!pattern_flags("the context matters").sms_tokens);
        assert!(pattern_flags("reply STOP to opt out").sms_tokens);
    }

    #[test]
    fn caps_ratio_threshold_is_strict() {
        // 3 of 10 words uppercase = 0.3, not above the threshold
        let t = "AAA BBB CCC d e f g h i j";
        assert!(!pattern_flags(t).excessive_caps);
        let t = "AAA BBB CCC DDD e f g h i j";
        assert!(pattern_flags(t).excessive_caps);
    }
}
