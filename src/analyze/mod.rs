// src/analyze/mod.rs
//! Scoring pipeline building blocks.
//!
//! Local, pure scorers: `features`, `rules`, `patterns`, `similarity` (over `corpus` embedded by
//! an `embedding::Embedder`). External collaborators behind traits: `classifier`, `reasoning`.
//! `fusion` turns the component scores into a `RiskAssessment`.

pub mod classifier;
pub mod corpus;
pub mod embedding;
pub mod features;
pub mod fusion;
pub mod patterns;
pub mod reasoning;
pub mod rules;
pub mod similarity;
pub mod urls;

pub use crate::analyze::features::{extract, FeatureVector};
pub use crate::analyze::fusion::{fuse, FusionMode, TwoSignalPolicy};
pub use crate::analyze::patterns::score_features;
pub use crate::analyze::rules::score_rules;
pub use crate::analyze::similarity::SimilarityIndex;
