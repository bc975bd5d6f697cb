//! Fusion policy: combine component scores into the final score, bucket and explanation.
//!
//! Three-signal: 0.4·rule + 0.4·similarity + 0.2·feature
//! Two-signal:   0.35·classifier + 0.65·reasoning (`Weighted`, default)
//!               0.5·classifier  + 0.5·reasoning  (`Averaged`)
//!
//! Two-signal mode is used only when both external scores are present.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::rules::RuleHits;
use crate::assessment::{Confidence, Indicator, RiskAssessment, ScoreComponents};

pub const RULE_WEIGHT: f32 = 0.4;
pub const SIMILARITY_WEIGHT: f32 = 0.4;
pub const FEATURE_WEIGHT: f32 = 0.2;

const MAX_KEYWORDS_IN_EXPLANATION: usize = 5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TwoSignalPolicy {
    #[default]
    Weighted,
    Averaged,
}

impl TwoSignalPolicy {
    /// `(classifier, reasoning)` weights.
    pub fn weights(self) -> (f32, f32) {
        match self {
            TwoSignalPolicy::Weighted => (0.35, 0.65),
            TwoSignalPolicy::Averaged => (0.5, 0.5),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TwoSignalPolicy::Weighted => "weighted",
            TwoSignalPolicy::Averaged => "averaged",
        }
    }
}

impl FromStr for TwoSignalPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "weighted" => Ok(TwoSignalPolicy::Weighted),
            "averaged" | "average" => Ok(TwoSignalPolicy::Averaged),
            other => Err(format!("unknown two-signal policy `{other}`")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "policy", rename_all = "snake_case")]
pub enum FusionMode {
    ThreeSignal,
    TwoSignal(TwoSignalPolicy),
}

impl FusionMode {
    /// Metric label.
    pub fn as_str(self) -> &'static str {
        match self {
            FusionMode::ThreeSignal => "three_signal",
            FusionMode::TwoSignal(TwoSignalPolicy::Weighted) => "two_signal_weighted",
            FusionMode::TwoSignal(TwoSignalPolicy::Averaged) => "two_signal_averaged",
        }
    }
}

impl fmt::Display for FusionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FusionMode::ThreeSignal => f.write_str("rule/similarity/feature fusion"),
            FusionMode::TwoSignal(p) => write!(f, "classifier/reasoning fusion ({})", p.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FusionError {
    #[error("{} requested but the {signal} score is missing", .mode.as_str())]
    MissingSignal {
        mode: FusionMode,
        signal: &'static str,
    },
}

/// Two-signal when classifier and reasoning are both present, else three-signal.
pub fn select_mode(components: &ScoreComponents, policy: TwoSignalPolicy) -> FusionMode {
    if components.classifier.is_some() && components.reasoning.is_some() {
        FusionMode::TwoSignal(policy)
    } else {
        FusionMode::ThreeSignal
    }
}

pub fn three_signal(rule: f32, similarity: f32, feature: f32) -> f32 {
    (RULE_WEIGHT * rule + SIMILARITY_WEIGHT * similarity + FEATURE_WEIGHT * feature).clamp(0.0, 1.0)
}

/// Final score for `mode`.
pub fn fuse(mode: FusionMode, components: &ScoreComponents) -> Result<f32, FusionError> {
    match mode {
        FusionMode::ThreeSignal => Ok(three_signal(
            components.rule,
            components.similarity,
            components.feature,
        )),
        FusionMode::TwoSignal(policy) => {
            let classifier = components.classifier.ok_or(FusionError::MissingSignal {
                mode,
                signal: "classifier",
            })?;
            let reasoning = components
                .reasoning
                .as_ref()
                .map(|r| r.probability)
                .ok_or(FusionError::MissingSignal {
                    mode,
                    signal: "reasoning",
                })?;
            let (wc, wr) = policy.weights();
            Ok((wc * classifier + wr * reasoning).clamp(0.0, 1.0))
        }
    }
}

/// `round(score × 100)`, half away from zero, clamped to [0,100].
pub fn to_percent(score: f32) -> u8 {
    let p = (f64::from(score) * 100.0).round();
    if p.is_nan() {
        return 0;
    }
    p.clamp(0.0, 100.0) as u8
}

/// Fuse `components` and build the full assessment.
pub fn assess_components(
    components: ScoreComponents,
    policy: TwoSignalPolicy,
    hits: &RuleHits,
    early_exit: bool,
) -> Result<RiskAssessment, FusionError> {
    let mode = select_mode(&components, policy);
    let final_score = fuse(mode, &components)?;
    let percent = to_percent(final_score);
    let indicator = Indicator::from_percent(percent);
    let degraded = !components.unavailable.is_empty();
    let confidence = match Confidence::from_score(final_score) {
        Confidence::High if degraded => Confidence::Medium,
        c => c,
    };
    let explanation = explain(&ExplainParts {
        percent,
        indicator,
        mode,
        components: &components,
        hits,
        early_exit,
    });

    Ok(RiskAssessment {
        final_score,
        percent,
        indicator,
        confidence,
        is_malicious: final_score > 0.5,
        mode,
        explanation,
        components,
        similar_examples: None,
        degraded,
        early_exit,
    })
}

struct ExplainParts<'a> {
    percent: u8,
    indicator: Indicator,
    mode: FusionMode,
    components: &'a ScoreComponents,
    hits: &'a RuleHits,
    early_exit: bool,
}

fn explain(p: &ExplainParts<'_>) -> String {
    let c = p.components;
    let mut out = vec![format!(
        "Risk {}% ({}) from {}.",
        p.percent, p.indicator, p.mode
    )];

    match p.mode {
        FusionMode::TwoSignal(_) => {
            if let (Some(clf), Some(r)) = (c.classifier, c.reasoning.as_ref()) {
                out.push(format!(
                    "Classifier {clf:.2}, reasoning {:.2}.",
                    r.probability
                ));
            }
        }
        FusionMode::ThreeSignal => out.push(format!(
            "Keyword rules {:.2}, similar messages {:.2}, message patterns {:.2}.",
            c.rule, c.similarity, c.feature
        )),
    }

    if !p.hits.is_empty() {
        let kws: Vec<&str> = p
            .hits
            .high
            .iter()
            .chain(p.hits.medium.iter())
            .take(MAX_KEYWORDS_IN_EXPLANATION)
            .copied()
            .collect();
        out.push(format!("Matched keywords: {}.", kws.join(", ")));
    }

    if let Some(r) = c.reasoning.as_ref().filter(|r| !r.rationale.is_empty()) {
        out.push(format!("Reasoning: {}", r.rationale));
    }

    if p.early_exit {
        out.push("External checks skipped: local signals were decisive.".to_string());
    }

    if !c.unavailable.is_empty() {
        let what: Vec<String> = c
            .unavailable
            .iter()
            .map(|f| format!("{} ({})", f.signal.as_str(), f.kind))
            .collect();
        out.push(format!("Degraded: {} unavailable.", what.join(", ")));
    }

    out.join(" ")
}
