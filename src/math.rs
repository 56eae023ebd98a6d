//! Math utilities for vector operations

use crate::EMBEDDING_DIM;

/// Cosine similarity for L2-normalized vectors (just dot product).
/// Uses SIMD acceleration when available.
///
/// Returns `None` on a dimension mismatch so callers can skip corrupt rows
/// instead of panicking.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.len() != EMBEDDING_DIM {
        return None;
    }
    use simsimd::SpatialSimilarity;
    let score = f32::dot(a, b).unwrap_or_else(|| {
        // Fallback for unsupported architectures
        a.iter().zip(b).map(|(x, y)| x * y).sum::<f32>() as f64
    }) as f32;
    Some(score)
}

/// L2-normalize a vector in place semantics (returns the normalized copy).
/// Zero vectors are returned unchanged.
pub fn normalize_l2(v: Vec<f32>) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0.0 {
        v
    } else {
        v.into_iter().map(|x| x / norm).collect()
    }
}

/// Min-max normalize scores into [0, 1]. A constant slice maps to all 1.0
/// (every candidate equally supported by the fused ranking).
pub fn min_max_normalize(scores: &[f32]) -> Vec<f32> {
    let min = scores.iter().copied().fold(f32::INFINITY, f32::min);
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if !min.is_finite() || !max.is_finite() || (max - min).abs() < f32::EPSILON {
        return vec![1.0; scores.len()];
    }
    scores.iter().map(|s| (s - min) / (max - min)).collect()
}
