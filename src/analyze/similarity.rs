//! Nearest-neighbor similarity scorer over the labeled reference corpus.
//!
//! score = Σ(label_i · sim_i) / Σ(sim_i) over the top-k neighbors by cosine similarity,
//! or the neutral 0.5 when the weights sum to zero (empty corpus, orthogonal query).
//!
//! The index is immutable once built. Growing the corpus means building a new index
//! (`with_appended`) and swapping it in; there is no update/delete path.

use serde::Serialize;

use super::corpus::{CorpusError, CorpusRecord, ReferenceCorpus};
use super::embedding::DynEmbedder;

pub const NEUTRAL_SCORE: f32 = 0.5;
pub const DEFAULT_TOP_K: usize = 3;
pub const DEFAULT_EXAMPLE_K: usize = 5;

/// A corpus entry ranked against a query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub index: usize,
    pub label: u8,
    pub similarity: f32,
}

/// Retrieved example for presentation: `(text, similarity, label)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarExample {
    pub text: String,
    pub similarity: f32,
    pub label: u8,
}

pub struct SimilarityIndex {
    embedder: DynEmbedder,
    entries: Vec<CorpusRecord>,
    embeddings: Vec<Vec<f32>>,
}

impl std::fmt::Debug for SimilarityIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimilarityIndex")
            .field("model", &self.embedder.model_id())
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl SimilarityIndex {
    /// Build from a corpus, embedding entries that carry no precomputed vector.
    pub fn build(corpus: ReferenceCorpus, embedder: DynEmbedder) -> Result<Self, CorpusError> {
        corpus.validate()?;
        if corpus.has_embeddings() {
            let model = corpus.embedding_model.clone().unwrap_or_default();
            if model != embedder.model_id() {
                return Err(CorpusError::ModelMismatch {
                    corpus: model,
                    embedder: embedder.model_id().to_string(),
                });
            }
        }

        let dim = embedder.dimension();
        let mut embeddings = Vec::with_capacity(corpus.entries.len());
        let mut entries = corpus.entries;
        for (index, e) in entries.iter_mut().enumerate() {
            let v = match e.embedding.take() {
                Some(v) if v.len() != dim => {
                    return Err(CorpusError::DimensionMismatch {
                        index,
                        expected: dim,
                        found: v.len(),
                    })
                }
                Some(v) => v,
                None => embedder.embed(&e.text),
            };
            embeddings.push(v);
        }

        Ok(Self {
            embedder,
            entries,
            embeddings,
        })
    }

    pub fn empty(embedder: DynEmbedder) -> Self {
        Self {
            embedder,
            entries: Vec::new(),
            embeddings: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn model_id(&self) -> &str {
        self.embedder.model_id()
    }

    pub fn embed(&self, text: &str) -> Vec<f32> {
        self.embedder.embed(text)
    }

    /// `nearest(text, k) → [(label, similarity)]`, descending similarity.
    pub fn nearest(&self, text: &str, k: usize) -> Vec<(u8, f32)> {
        let q = self.embedder.embed(text);
        self.neighbors(&q, k)
            .into_iter()
            .map(|n| (n.label, n.similarity))
            .collect()
    }

    /// Similarity-weighted label average of the top `k` neighbors.
    pub fn score(&self, text: &str, k: usize) -> f32 {
        aggregate(&self.nearest(text, k))
    }

    /// Top `k` corpus entries for display.
    pub fn similar_examples(&self, text: &str, k: usize) -> Vec<SimilarExample> {
        let q = self.embedder.embed(text);
        self.examples(&self.neighbors(&q, k))
    }

    pub fn examples(&self, neighbors: &[Neighbor]) -> Vec<SimilarExample> {
        neighbors
            .iter()
            .filter_map(|n| {
                self.entries.get(n.index).map(|e| SimilarExample {
                    text: e.text.clone(),
                    similarity: n.similarity,
                    label: n.label,
                })
            })
            .collect()
    }

    /// Rank all entries against an already-embedded query. Ties keep corpus order.
    pub fn neighbors(&self, query: &[f32], k: usize) -> Vec<Neighbor> {
        let mut ranked: Vec<Neighbor> = self
            .embeddings
            .iter()
            .zip(&self.entries)
            .enumerate()
            .map(|(index, (emb, e))| Neighbor {
                index,
                label: e.label,
                similarity: cosine_similarity(query, emb).unwrap_or(0.0),
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then(a.index.cmp(&b.index))
        });
        ranked.truncate(k);
        ranked
    }

    /// New index containing this corpus plus `extra`. The receiver is left untouched.
    pub fn with_appended(&self, extra: Vec<CorpusRecord>) -> Result<Self, CorpusError> {
        let mut entries = self.entries.clone();
        for (e, emb) in entries.iter_mut().zip(&self.embeddings) {
            e.embedding = Some(emb.clone());
        }
        entries.extend(extra);
        let corpus = ReferenceCorpus {
            embedding_model: Some(self.embedder.model_id().to_string()),
            dimension: Some(self.embedder.dimension()),
            entries,
        };
        Self::build(corpus, self.embedder.clone())
    }
}

/// Σ(label·sim) / Σ(sim), with negative similarities contributing no weight.
pub fn aggregate(neighbors: &[(u8, f32)]) -> f32 {
    let mut num = 0.0f32;
    let mut den = 0.0f32;
    for &(label, sim) in neighbors {
        let w = if sim.is_finite() { sim.max(0.0) } else { 0.0 };
        num += f32::from(label) * w;
        den += w;
    }
    if den > 0.0 {
        (num / den).clamp(0.0, 1.0)
    } else {
        NEUTRAL_SCORE
    }
}

/// Cosine similarity; `None` for mismatched lengths, empty or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let x64 = f64::from(x);
        let y64 = f64::from(y);
        dot += x64 * y64;
        norm_a += x64 * x64;
        norm_b += y64 * y64;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        return None;
    }
    Some((dot / denom) as f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::corpus::seed_corpus;
    use crate::analyze::embedding::HashingEmbedder;
    use std::sync::Arc;

    fn seed_index() -> SimilarityIndex {
        SimilarityIndex::build(seed_corpus(), Arc::new(HashingEmbedder::default())).unwrap()
    }

    #[test]
    fn empty_corpus_is_neutral() {
        let idx = SimilarityIndex::empty(Arc::new(HashingEmbedder::default()));
        assert!(idx.nearest("anything", 3).is_empty());
        assert_eq!(idx.score("anything", 3), NEUTRAL_SCORE);
    }

    #[test]
    fn zero_weights_are_neutral() {
        assert_eq!(aggregate(&[(1, 0.0), (0, 0.0)]), NEUTRAL_SCORE);
        assert_eq!(aggregate(&[]), NEUTRAL_SCORE);
    }

    #[test]
    fn weighted_label_average() {
        let s = aggregate(&[(1, 0.9), (0, 0.3), (1, 0.6)]);
        assert!((s - 1.5 / 1.8).abs() < 1e-6);
    }

    #[test]
    fn nearest_is_sorted_and_idempotent() {
        let idx = seed_index();
        let q = "Congratulations you have won a prize, txt CLAIM now";
        let a = idx.nearest(q, 5);
        let b = idx.nearest(q, 5);
        assert_eq!(a, b);
        assert_eq!(a.len(), 5);
        assert!(a.windows(2).all(|w| w[0].1 >= w[1].1));
        assert_eq!(idx.score(q, 3), idx.score(q, 3));
    }

    #[test]
    fn spammy_query_leans_spam() {
        let idx = seed_index();
        let spam = idx.score("You have won a cash prize! Txt CLAIM to 80082 to claim your reward", 3);
        let ham = idx.score("are we still on for lunch tomorrow? let me know", 3);
        assert!(spam > 0.5, "spam score {spam}");
        assert!(ham < 0.5, "ham score {ham}");
    }

    #[test]
    fn model_mismatch_is_rejected() {
        let raw = r#"{"embedding_model":"other-model","entries":[{"text":"a","label":0,"embedding":[1.0]}]}"#;
        let corpus = ReferenceCorpus::from_json_str(raw, std::path::Path::new("t")).unwrap();
        let err = SimilarityIndex::build(corpus, Arc::new(HashingEmbedder::new(1))).unwrap_err();
        assert!(matches!(err, CorpusError::ModelMismatch { .. }));
    }

    #[test]
    fn append_builds_a_new_snapshot() {
        let idx = seed_index();
        let before = idx.len();
        let grown = idx
            .with_appended(vec![CorpusRecord {
                text: "Reset your crypto wallet seed phrase here".into(),
                label: 1,
                embedding: None,
            }])
            .unwrap();
        assert_eq!(idx.len(), before);
        assert_eq!(grown.len(), before + 1);
    }
}
