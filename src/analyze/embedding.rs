//! Embedding provider contract and the built-in hashing embedder.
//!
//! The similarity index only ever talks to `Embedder`. Corpus and queries must be embedded by
//! the same provider/version; `model_id()` is what the corpus header is checked against.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

/// `embed(text) → fixed-dimension vector`.
pub trait Embedder: Send + Sync {
    /// Provider + version identifier, e.g. `hashing-v1-256`.
    fn model_id(&self) -> &str;
    fn dimension(&self) -> usize;
    fn embed(&self, text: &str) -> Vec<f32>;
}

pub type DynEmbedder = Arc<dyn Embedder>;

static TOKEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?u)\b\w+\b").expect("token regex"));

/// Deterministic feature-hashing embedder over unigrams and bigrams (signed buckets, L2
/// normalized). Stable across processes and platforms, so precomputed corpus embeddings stay
/// valid.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
    model_id: String,
}

impl HashingEmbedder {
    pub const DEFAULT_DIMENSION: usize = 256;
    const BIGRAM_WEIGHT: f32 = 0.5;

    pub fn new(dimension: usize) -> Self {
        let dimension = dimension.max(1);
        Self {
            dimension,
            model_id: format!("hashing-v1-{dimension}"),
        }
    }

    fn add(&self, out: &mut [f32], feature: &str, weight: f32) {
        let h = bucket_hash(feature);
        let bucket = (h % self.dimension as u64) as usize;
        let sign = if h >> 63 == 0 { 1.0 } else { -1.0 };
        out[bucket] += sign * weight;
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DIMENSION)
    }
}

impl Embedder for HashingEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        let mut out = vec![0.0f32; self.dimension];
        let tokens: Vec<String> = TOKEN_RE
            .find_iter(text)
            .map(|m| m.as_str().to_lowercase())
            .collect();

        for t in &tokens {
            self.add(&mut out, t, 1.0);
        }
        for pair in tokens.windows(2) {
            let bigram = format!("{} {}", pair[0], pair[1]);
            self.add(&mut out, &bigram, Self::BIGRAM_WEIGHT);
        }

        let norm = out.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in out.iter_mut() {
                *x /= norm;
            }
        }
        out
    }
}

/// First 8 bytes of SHA-256, big endian.
fn bucket_hash(feature: &str) -> u64 {
    let digest = Sha256::digest(feature.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(head)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embeddings_are_unit_length_and_deterministic() {
        let e = HashingEmbedder::new(64);
        let a = e.embed("Claim your FREE prize now");
        let b = e.embed("claim your free prize now");
        assert_eq!(a.len(), 64);
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn empty_text_is_zero_vector() {
        let e = HashingEmbedder::default();
        assert!(e.embed("  ...  ").iter().all(|x| *x == 0.0));
        assert_eq!(e.model_id(), "hashing-v1-256");
    }
}
