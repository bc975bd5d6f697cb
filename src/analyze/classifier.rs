//! External classifier adapter.
//!
//! The engine only sees `RiskClassifier::predict_probability`. Input layout is the 14 structural
//! features (`FeatureVector::NAMES` order) followed, for artifacts that ask for it, by a dense
//! lexical vector of `lexical_dimension` values produced by the engine's embedder.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::features::{FeatureVector, FEATURE_COUNT};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClassifierError {
    #[error("classifier unavailable: {0}")]
    Unavailable(String),
    #[error("classifier timed out after {0:?}")]
    Timeout(Duration),
    #[error("classifier schema mismatch: {0}")]
    Schema(String),
}

impl ClassifierError {
    /// Short label for metrics and `SignalFailure::kind`.
    pub fn kind(&self) -> &'static str {
        match self {
            ClassifierError::Unavailable(_) => "unavailable",
            ClassifierError::Timeout(_) => "timeout",
            ClassifierError::Schema(_) => "schema",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierInput {
    pub features: FeatureVector,
    pub lexical: Option<Vec<f32>>,
}

impl ClassifierInput {
    pub fn structural(features: FeatureVector) -> Self {
        Self {
            features,
            lexical: None,
        }
    }

    /// Features first, then the lexical block.
    pub fn flattened(&self) -> Vec<f32> {
        let mut out = self.features.as_slice().to_vec();
        if let Some(lex) = &self.lexical {
            out.extend_from_slice(lex);
        }
        out
    }
}

#[async_trait]
pub trait RiskClassifier: Send + Sync {
    async fn predict_probability(&self, input: &ClassifierInput) -> Result<f32, ClassifierError>;

    fn name(&self) -> &'static str;

    /// Number of lexical values the classifier expects after the structural features.
    fn lexical_dimension(&self) -> Option<usize> {
        None
    }

    /// `false` for the placeholder used when nothing is configured; the engine then does not
    /// treat the missing score as a failure.
    fn is_configured(&self) -> bool {
        true
    }
}

pub type DynClassifier = Arc<dyn RiskClassifier>;

/// Bound the call in time and reject non-probabilities.
pub async fn predict_with_timeout(
    classifier: &dyn RiskClassifier,
    input: &ClassifierInput,
    limit: Duration,
) -> Result<f32, ClassifierError> {
    let p = tokio::time::timeout(limit, classifier.predict_probability(input))
        .await
        .map_err(|_| ClassifierError::Timeout(limit))??;
    if !p.is_finite() || !(0.0..=1.0).contains(&p) {
        return Err(ClassifierError::Unavailable(format!(
            "{} returned {p}, outside [0,1]",
            classifier.name()
        )));
    }
    Ok(p)
}

// ------------------------------------------------------------
// Logistic artifact
// ------------------------------------------------------------

/// Serialized linear model. `weights` covers the structural features and then the lexical block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticArtifact {
    pub schema_version: u32,
    pub feature_names: Vec<String>,
    pub weights: Vec<f32>,
    pub bias: f32,
    #[serde(default)]
    pub lexical_dimension: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct LogisticClassifier {
    artifact: LogisticArtifact,
}

impl LogisticClassifier {
    pub fn new(artifact: LogisticArtifact) -> Result<Self, ClassifierError> {
        if artifact.schema_version != FeatureVector::SCHEMA_VERSION {
            return Err(ClassifierError::Schema(format!(
                "artifact fitted on feature schema v{}, extractor produces v{}",
                artifact.schema_version,
                FeatureVector::SCHEMA_VERSION
            )));
        }
        let names_match = artifact.feature_names.len() == FEATURE_COUNT
            && artifact
                .feature_names
                .iter()
                .zip(FeatureVector::NAMES.iter())
                .all(|(a, b)| a == b);
        if !names_match {
            return Err(ClassifierError::Schema(
                "feature_names differ from the extractor's feature order".to_string(),
            ));
        }
        let expected = FEATURE_COUNT + artifact.lexical_dimension.unwrap_or(0);
        if artifact.weights.len() != expected {
            return Err(ClassifierError::Schema(format!(
                "expected {expected} weights, artifact has {}",
                artifact.weights.len()
            )));
        }
        Ok(Self { artifact })
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ClassifierError> {
        let artifact: LogisticArtifact = serde_json::from_str(raw)
            .map_err(|e| ClassifierError::Schema(format!("unreadable artifact: {e}")))?;
        Self::new(artifact)
    }

    pub fn from_path(path: &Path) -> Result<Self, ClassifierError> {
        let raw = fs::read_to_string(path).map_err(|e| {
            ClassifierError::Unavailable(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&raw)
    }

    fn logit(&self, x: &[f32]) -> f32 {
        self.artifact
            .weights
            .iter()
            .zip(x)
            .fold(self.artifact.bias, |acc, (w, v)| acc + w * v)
    }
}

#[async_trait]
impl RiskClassifier for LogisticClassifier {
    async fn predict_probability(&self, input: &ClassifierInput) -> Result<f32, ClassifierError> {
        let want = self.artifact.lexical_dimension.unwrap_or(0);
        let got = input.lexical.as_ref().map_or(0, Vec::len);
        if want != got {
            return Err(ClassifierError::Schema(format!(
                "expected {want} lexical values, got {got}"
            )));
        }
        let z = self.logit(&input.flattened());
        Ok(sigmoid(z))
    }

    fn name(&self) -> &'static str {
        "logistic"
    }

    fn lexical_dimension(&self) -> Option<usize> {
        self.artifact.lexical_dimension
    }
}

fn sigmoid(z: f32) -> f32 {
    1.0 / (1.0 + (-z).exp())
}

// ------------------------------------------------------------
// Disabled + stub
// ------------------------------------------------------------

/// Used when no artifact is configured. Always `Unavailable`.
pub struct DisabledClassifier;

#[async_trait]
impl RiskClassifier for DisabledClassifier {
    async fn predict_probability(&self, _input: &ClassifierInput) -> Result<f32, ClassifierError> {
        Err(ClassifierError::Unavailable("classifier disabled".to_string()))
    }

    fn name(&self) -> &'static str {
        "disabled"
    }

    fn is_configured(&self) -> bool {
        false
    }
}

/// Classifier that was enabled but could not be loaded. Reported as configured so each request
/// records the load error instead of silently dropping the signal.
pub struct FailedClassifier(pub ClassifierError);

#[async_trait]
impl RiskClassifier for FailedClassifier {
    async fn predict_probability(&self, _input: &ClassifierInput) -> Result<f32, ClassifierError> {
        Err(self.0.clone())
    }

    fn name(&self) -> &'static str {
        "failed"
    }
}

/// Scripted classifier for tests and local runs.
#[derive(Debug, Clone)]
pub enum StubClassifier {
    Fixed(f32),
    Failing(ClassifierError),
    Slow(Duration, f32),
}

#[async_trait]
impl RiskClassifier for StubClassifier {
    async fn predict_probability(&self, _input: &ClassifierInput) -> Result<f32, ClassifierError> {
        match self {
            StubClassifier::Fixed(p) => Ok(*p),
            StubClassifier::Failing(e) => Err(e.clone()),
            StubClassifier::Slow(delay, p) => {
                tokio::time::sleep(*delay).await;
                Ok(*p)
            }
        }
    }

    fn name(&self) -> &'static str {
        "stub"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(weights: Vec<f32>, bias: f32) -> LogisticArtifact {
        LogisticArtifact {
            schema_version: FeatureVector::SCHEMA_VERSION,
            feature_names: FeatureVector::NAMES.iter().map(|s| s.to_string()).collect(),
            weights,
            bias,
            lexical_dimension: None,
        }
    }

    #[tokio::test]
    async fn zero_model_is_one_half() {
        let clf = LogisticClassifier::new(artifact(vec![0.0; FEATURE_COUNT], 0.0)).unwrap();
        let input = ClassifierInput::structural(FeatureVector::default());
        let p = clf.predict_probability(&input).await.unwrap();
        assert!((p - 0.5).abs() < 1e-6);
    }

    #[tokio::test]
    async fn ip_host_weight_pushes_probability_up() {
        let mut w = vec![0.0; FEATURE_COUNT];
        w[13] = 4.0;
        let clf = LogisticClassifier::new(artifact(w, -1.0)).unwrap();
        let mut fv = FeatureVector::default();
        fv.0[13] = 1.0;
        let p = clf
            .predict_probability(&ClassifierInput::structural(fv))
            .await
            .unwrap();
        assert!(p > 0.9, "p = {p}");
    }

    #[test]
    fn schema_mismatches_are_typed() {
        let mut a = artifact(vec![0.0; FEATURE_COUNT], 0.0);
        a.schema_version = 99;
        assert!(matches!(
            LogisticClassifier::new(a),
            Err(ClassifierError::Schema(_))
        ));

        let short = artifact(vec![0.0; 3], 0.0);
        assert!(matches!(
            LogisticClassifier::new(short),
            Err(ClassifierError::Schema(_))
        ));

        let mut renamed = artifact(vec![0.0; FEATURE_COUNT], 0.0);
        renamed.feature_names.swap(0, 1);
        assert!(matches!(
            LogisticClassifier::new(renamed),
            Err(ClassifierError::Schema(_))
        ));
    }

    #[tokio::test]
    async fn missing_lexical_block_is_schema_error() {
        let mut a = artifact(vec![0.0; FEATURE_COUNT + 4], 0.0);
        a.lexical_dimension = Some(4);
        let clf = LogisticClassifier::new(a).unwrap();
        let err = clf
            .predict_probability(&ClassifierInput::structural(FeatureVector::default()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "schema");
    }

    #[tokio::test(start_paused = true)]
    async fn slow_classifier_times_out() {
        let clf = StubClassifier::Slow(Duration::from_secs(5), 0.9);
        let input = ClassifierInput::structural(FeatureVector::default());
        let err = predict_with_timeout(&clf, &input, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert_eq!(err, ClassifierError::Timeout(Duration::from_millis(100)));
    }

    #[tokio::test]
    async fn out_of_range_output_is_rejected() {
        let clf = StubClassifier::Fixed(1.5);
        let input = ClassifierInput::structural(FeatureVector::default());
        let err = predict_with_timeout(&clf, &input, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "unavailable");
    }
}
