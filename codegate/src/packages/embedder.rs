//! A deterministic hashed character-trigram embedder. Good enough to put
//! near-identical package names (typosquats included) close together in
//! cosine space without shipping a model.

use sha2::{Digest, Sha256};

pub const EMBEDDING_DIM: usize = 256;

pub struct PackageEmbedder {
    dim: usize,
}

impl PackageEmbedder {
    pub fn new() -> Self {
        Self { dim: EMBEDDING_DIM }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// L2-normalized bag of hashed character trigrams over the lowercased,
    /// boundary-padded identifier.
    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dim];
        let normalized = format!("##{}##", text.to_lowercase());
        let chars: Vec<char> = normalized.chars().collect();
        if chars.len() < 3 {
            return vector;
        }
        for window in chars.windows(3) {
            let gram: String = window.iter().collect();
            let digest = Sha256::digest(gram.as_bytes());
            let hash = u64::from_le_bytes(digest[..8].try_into().expect("digest is 32 bytes"));
            let bucket = (hash % self.dim as u64) as usize;
            let sign = if (hash >> 63) == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        vector
    }
}

impl Default for PackageEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use floating_distance::Metric;

    #[test]
    fn embedding_is_deterministic_and_normalized() {
        let embedder = PackageEmbedder::new();
        let a = embedder.embed("requests");
        let b = embedder.embed("requests");
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn near_names_score_higher_than_far_names() {
        let embedder = PackageEmbedder::new();
        let target = embedder.embed("invokehttp");
        let near = embedder.embed("invoke-http");
        let far = embedder.embed("numpy");
        let metric = Metric::Cosine;
        let near_score = metric.measure::<f32>(&target, &near);
        let far_score = metric.measure::<f32>(&target, &far);
        assert!(
            near_score > far_score,
            "near {} should beat far {}",
            near_score,
            far_score
        );
    }

    #[test]
    fn case_is_folded() {
        let embedder = PackageEmbedder::new();
        assert_eq!(embedder.embed("Requests"), embedder.embed("requests"));
    }
}
