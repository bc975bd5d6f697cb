//! Reference corpus loading (labeled examples for similarity lookup).
//!
//! JSON shape:
//! {
//!   "embedding_model": "hashing-v1-256",   // optional; required when embeddings are present
//!   "dimension": 256,                       // optional
//!   "entries": [ { "text": "...", "label": 1, "embedding": [ ... ] } ]
//! }
//!
//! Entries without an `embedding` are embedded at index build time. A missing or broken file is
//! not fatal for the engine: `load_or_seed` falls back to the built-in seed corpus.

use std::fs;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

static SEED: Lazy<Result<ReferenceCorpus, CorpusError>> = Lazy::new(|| {
    let raw = include_str!("../../data/seed_corpus.json");
    ReferenceCorpus::from_json_str(raw, Path::new("<seed>"))
});

#[derive(Debug, Error, Clone)]
pub enum CorpusError {
    #[error("cannot read corpus at {path}: {message}")]
    Io { path: PathBuf, message: String },
    #[error("cannot parse corpus at {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("entry {index}: label must be 0 or 1, got {label}")]
    InvalidLabel { index: usize, label: u8 },
    #[error("entry {index}: embedding has dimension {found}, expected {expected}")]
    DimensionMismatch {
        index: usize,
        expected: usize,
        found: usize,
    },
    #[error("corpus embedded with `{corpus}` but the embedder is `{embedder}`")]
    ModelMismatch { corpus: String, embedder: String },
    #[error("corpus has precomputed embeddings but no embedding_model header")]
    MissingModel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorpusRecord {
    pub text: String,
    pub label: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReferenceCorpus {
    #[serde(default)]
    pub embedding_model: Option<String>,
    #[serde(default)]
    pub dimension: Option<usize>,
    #[serde(default)]
    pub entries: Vec<CorpusRecord>,
}

/// Where the loaded corpus came from (reported on /health and in logs).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CorpusSource {
    File { path: String },
    Seed { reason: String },
}

impl ReferenceCorpus {
    pub fn from_json_str(raw: &str, origin: &Path) -> Result<Self, CorpusError> {
        let corpus: ReferenceCorpus =
            serde_json::from_str(raw).map_err(|e| CorpusError::Parse {
                path: origin.to_path_buf(),
                message: e.to_string(),
            })?;
        corpus.validate()?;
        Ok(corpus)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn has_embeddings(&self) -> bool {
        self.entries.iter().any(|e| e.embedding.is_some())
    }

    /// Labels are binary; precomputed embeddings share one dimension and name their model.
    pub fn validate(&self) -> Result<(), CorpusError> {
        let mut dim = self.dimension;
        for (index, e) in self.entries.iter().enumerate() {
            if e.label > 1 {
                return Err(CorpusError::InvalidLabel {
                    index,
                    label: e.label,
                });
            }
            if let Some(emb) = &e.embedding {
                match dim {
                    Some(expected) if expected != emb.len() => {
                        return Err(CorpusError::DimensionMismatch {
                            index,
                            expected,
                            found: emb.len(),
                        })
                    }
                    Some(_) => {}
                    None => dim = Some(emb.len()),
                }
            }
        }
        if self.has_embeddings() && self.embedding_model.is_none() {
            return Err(CorpusError::MissingModel);
        }
        Ok(())
    }
}

/// Read and validate a corpus file.
pub fn load_corpus(path: &Path) -> Result<ReferenceCorpus, CorpusError> {
    let raw = fs::read_to_string(path).map_err(|e| CorpusError::Io {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    ReferenceCorpus::from_json_str(&raw, path)
}

/// Built-in seed corpus (small, labeled, no precomputed embeddings).
pub fn seed_corpus() -> ReferenceCorpus {
    match &*SEED {
        Ok(c) => c.clone(),
        Err(e) => {
            warn!(error = %e, "seed corpus unreadable; similarity will use an empty corpus");
            ReferenceCorpus::default()
        }
    }
}

/// Load `path` if given, otherwise (or on any error) fall back to the seed corpus.
pub fn load_or_seed(path: Option<&Path>) -> (ReferenceCorpus, CorpusSource) {
    let Some(path) = path else {
        info!("no corpus path configured; using built-in seed corpus");
        return (
            seed_corpus(),
            CorpusSource::Seed {
                reason: "not configured".to_string(),
            },
        );
    };
    match load_corpus(path) {
        Ok(c) => {
            info!(path = %path.display(), entries = c.len(), "reference corpus loaded");
            (
                c,
                CorpusSource::File {
                    path: path.display().to_string(),
                },
            )
        }
        Err(e) => {
            warn!(error = %e, "reference corpus unavailable; degraded mode with seed corpus");
            (
                seed_corpus(),
                CorpusSource::Seed {
                    reason: e.to_string(),
                },
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_corpus_is_balanced_and_valid() {
        let c = seed_corpus();
        assert!(c.len() >= 20);
        let spam = c.entries.iter().filter(|e| e.label == 1).count();
        assert_eq!(spam * 2, c.len());
        assert!(c.validate().is_ok());
    }

    #[test]
    fn rejects_non_binary_labels() {
        let raw = r#"{"entries":[{"text":"a","label":2}]}"#;
        let err = ReferenceCorpus::from_json_str(raw, Path::new("t")).unwrap_err();
        assert!(matches!(err, CorpusError::InvalidLabel { index: 0, label: 2 }));
    }

    #[test]
    fn rejects_mixed_dimensions() {
        let raw = r#"{"embedding_model":"m","entries":[
            {"text":"a","label":0,"embedding":[1.0,0.0]},
            {"text":"b","label":1,"embedding":[1.0]}]}"#;
        let err = ReferenceCorpus::from_json_str(raw, Path::new("t")).unwrap_err();
        assert!(matches!(err, CorpusError::DimensionMismatch { index: 1, .. }));
    }

    #[test]
    fn embeddings_require_model_header() {
        let raw = r#"{"entries":[{"text":"a","label":0,"embedding":[1.0]}]}"#;
        let err = ReferenceCorpus::from_json_str(raw, Path::new("t")).unwrap_err();
        assert!(matches!(err, CorpusError::MissingModel));
    }

    #[test]
    fn missing_file_falls_back_to_seed() {
        let (c, src) = load_or_seed(Some(Path::new("definitely/not/here.json")));
        assert_eq!(c, seed_corpus());
        assert!(matches!(src, CorpusSource::Seed { .. }));
    }
}
