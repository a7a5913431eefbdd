//! Gallery matching by cosine similarity.
//!
//! Matching is an exhaustive linear scan. The matcher never applies a
//! threshold: it reports the closest candidate and its score so callers can
//! show a "closest guess" even when identification fails.

use crate::types::{Embedding, Identity, MatchResult};

/// Score reported when the gallery is empty. Real scores never go below it,
/// and an empty gallery is the only case that pairs it with no identity.
pub const NO_MATCH_SCORE: f32 = -1.0;

/// Cosine similarity of two vectors.
///
/// Returns a value in [-1, 1]. Vectors of different length, a zero
/// magnitude on either side, or non-finite components all yield exactly 0.0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    let similarity = dot / (norm_a.sqrt() * norm_b.sqrt());
    if !similarity.is_finite() {
        return 0.0;
    }
    // Rounding can push |dot| a hair past the magnitude product.
    similarity.clamp(-1.0, 1.0)
}

/// Strategy for picking the closest gallery entry to a probe.
pub trait Matcher {
    fn best_match(&self, probe: &Embedding, gallery: &[Identity]) -> MatchResult;
}

/// Cosine matcher. Visits every gallery entry; a candidate replaces the
/// current best only on strict improvement, so the first of several tied
/// entries wins.
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn best_match(&self, probe: &Embedding, gallery: &[Identity]) -> MatchResult {
        let mut best: Option<(usize, f32)> = None;

        for (i, candidate) in gallery.iter().enumerate() {
            if candidate.embedding.len() != probe.len() {
                tracing::warn!(
                    identity_id = %candidate.identity_id,
                    stored = candidate.embedding.len(),
                    probe = probe.len(),
                    "embedding dimension mismatch, scoring 0"
                );
            }
            let score = probe.similarity(&candidate.embedding);
            let improves = match best {
                Some((_, best_score)) => score > best_score,
                None => true,
            };
            if improves {
                best = Some((i, score));
            }
        }

        match best {
            Some((idx, score)) => MatchResult {
                identity: Some(gallery[idx].clone()),
                similarity: score,
            },
            None => MatchResult {
                identity: None,
                similarity: NO_MATCH_SCORE,
            },
        }
    }
}

/// Closest identity to `query` among `gallery`, with its score.
pub fn find_best_match(query: &Embedding, gallery: &[Identity]) -> MatchResult {
    CosineMatcher.best_match(query, gallery)
}
