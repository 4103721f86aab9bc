//! Similarity metrics and vector helpers.

use serde::{Deserialize, Serialize};

/// The scoring function a collection uses for search. Higher is always better.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// Dot product of L2-normalized vectors, in `[-1, 1]`.
    #[default]
    Cosine,
    /// Negated euclidean distance, in `(-inf, 0]`.
    Euclidean,
    /// Raw dot product.
    Dot,
}

impl DistanceMetric {
    /// Score `a` against `b`. Both slices must have the same length.
    pub fn score(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            DistanceMetric::Cosine => cosine_similarity(a, b),
            DistanceMetric::Euclidean => -euclidean_distance(a, b),
            DistanceMetric::Dot => dot(a, b),
        }
    }
}

/// Dot product of two vectors.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// L2 norm of a vector.
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 if either vector has zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let norm_a = l2_norm(a);
    let norm_b = l2_norm(b);
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot(a, b) / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

/// Euclidean distance between two vectors.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum::<f32>().sqrt()
}

/// Rescale `v` to unit L2 norm in place. Zero vectors are left unchanged.
pub fn normalize(v: &mut [f32]) {
    let norm = l2_norm(v);
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        assert_eq!(DistanceMetric::Cosine.score(&[1.0, 0.0], &[1.0, 0.0]), 1.0);
        let v = [0.3, -0.7, 0.2];
        assert!((DistanceMetric::Cosine.score(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_handles_zero_vectors() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn euclidean_is_negative_distance() {
        let score = DistanceMetric::Euclidean.score(&[0.0, 0.0], &[3.0, 4.0]);
        assert!((score + 5.0).abs() < 1e-6);
        assert_eq!(DistanceMetric::Euclidean.score(&[1.0, 2.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn dot_is_unnormalized() {
        assert_eq!(DistanceMetric::Dot.score(&[2.0, 3.0], &[4.0, 5.0]), 23.0);
    }

    #[test]
    fn normalize_leaves_zero_vector() {
        let mut zero = vec![0.0, 0.0];
        normalize(&mut zero);
        assert_eq!(zero, vec![0.0, 0.0]);

        let mut v = vec![3.0, 4.0];
        normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }
}
