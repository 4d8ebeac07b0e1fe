//! Bounded cosine similarity.
//!
//! Native cosine similarity lives in [-1, 1]; scores are remapped with
//! `(cos + 1) / 2` so 0 is opposite, 0.5 orthogonal and 1 identical.

use crate::types::{Embedding, MatchThreshold, SimilarityScore};
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimilarityError {
    #[error("embedding dimension mismatch: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },
}

/// Similarity of two embeddings in [0, 1].
///
/// A zero-norm vector on either side scores 0.0 and therefore never matches.
/// Exactly symmetric: `similarity(a, b) == similarity(b, a)`.
pub fn similarity(a: &Embedding, b: &Embedding) -> Result<SimilarityScore, SimilarityError> {
    if a.dim() != b.dim() {
        return Err(SimilarityError::DimensionMismatch {
            left: a.dim(),
            right: b.dim(),
        });
    }

    let scale_a = max_abs(a);
    let scale_b = max_abs(b);
    if scale_a == 0.0 || scale_b == 0.0 {
        return Ok(SimilarityScore::MIN);
    }

    // Each side is scaled into [-1, 1] so squaring cannot overflow or underflow.
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.values.iter().zip(b.values.iter()) {
        let (x, y) = (x / scale_a, y / scale_b);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if !denom.is_finite() {
        return Ok(SimilarityScore::MIN);
    }

    let cos = dot / denom;
    // Rounding can push |cos| a hair past 1; `SimilarityScore::new` clamps.
    Ok(SimilarityScore::new((cos + 1.0) / 2.0))
}

fn max_abs(embedding: &Embedding) -> f64 {
    embedding
        .values
        .iter()
        .fold(0.0f64, |acc, v| acc.max(v.abs()))
}

/// Inclusive threshold test: `score >= threshold`.
pub fn is_match(score: SimilarityScore, threshold: MatchThreshold) -> bool {
    score.value() >= threshold.value()
}
