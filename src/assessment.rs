//! Assessment output: per-signal components and the final `RiskAssessment`.
//!
//! Everything here is created fresh per request and never mutated after the engine returns it.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::analyze::fusion::FusionMode;
use crate::analyze::reasoning::ReasoningVerdict;
use crate::analyze::similarity::SimilarExample;

/// Percent bucket. Lower bounds are inclusive: 20 is `Low`, 80 is `VeryHigh`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Indicator {
    VeryLow,
    Low,
    Medium,
    High,
    VeryHigh,
}

impl Indicator {
    pub fn from_percent(percent: u8) -> Self {
        match percent {
            0..=19 => Indicator::VeryLow,
            20..=39 => Indicator::Low,
            40..=59 => Indicator::Medium,
            60..=79 => Indicator::High,
            _ => Indicator::VeryHigh,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Indicator::VeryLow => "Very Low",
            Indicator::Low => "Low",
            Indicator::Medium => "Medium",
            Indicator::High => "High",
            Indicator::VeryHigh => "Very High",
        }
    }
}

impl fmt::Display for Indicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
}

impl Confidence {
    /// `High` when the score is more than 0.3 away from the decision boundary.
    pub fn from_score(score: f32) -> Self {
        if (score - 0.5).abs() > 0.3 {
            Confidence::High
        } else {
            Confidence::Medium
        }
    }
}

/// Which external collaborator a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Signal {
    Classifier,
    Reasoning,
}

impl Signal {
    pub fn as_str(self) -> &'static str {
        match self {
            Signal::Classifier => "classifier",
            Signal::Reasoning => "reasoning",
        }
    }
}

/// An external signal that was requested but could not be used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalFailure {
    pub signal: Signal,
    /// `unavailable`, `timeout`, `schema` or `format`.
    pub kind: String,
    pub message: String,
}

impl SignalFailure {
    pub fn new(signal: Signal, kind: &str, message: impl Into<String>) -> Self {
        Self {
            signal,
            kind: kind.to_string(),
            message: message.into(),
        }
    }
}

/// Per-signal scores for one request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreComponents {
    pub rule: f32,
    pub similarity: f32,
    pub feature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classifier: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<ReasoningVerdict>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unavailable: Vec<SignalFailure>,
}

impl ScoreComponents {
    pub fn local(rule: f32, similarity: f32, feature: f32) -> Self {
        Self {
            rule,
            similarity,
            feature,
            ..Self::default()
        }
    }

    pub fn with_classifier(mut self, p: f32) -> Self {
        self.classifier = Some(p);
        self
    }

    pub fn with_reasoning(mut self, verdict: ReasoningVerdict) -> Self {
        self.reasoning = Some(verdict);
        self
    }

    pub fn with_failure(mut self, failure: SignalFailure) -> Self {
        self.unavailable.push(failure);
        self
    }
}

/// Final result handed to presentation layers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskAssessment {
    pub final_score: f32,
    pub percent: u8,
    pub indicator: Indicator,
    pub confidence: Confidence,
    pub is_malicious: bool,
    pub mode: FusionMode,
    pub explanation: String,
    pub components: ScoreComponents,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similar_examples: Option<Vec<SimilarExample>>,
    pub degraded: bool,
    pub early_exit: bool,
}

impl RiskAssessment {
    pub fn with_examples(mut self, examples: Vec<SimilarExample>) -> Self {
        self.similar_examples = Some(examples);
        self
    }
}

#[derive(Debug, Error)]
pub enum AssessmentError {
    #[error("no signal could be computed for this message")]
    NoSignal,
    #[error(transparent)]
    Fusion(#[from] crate::analyze::fusion::FusionError),
}
