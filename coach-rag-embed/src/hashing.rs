//! Deterministic feature-hashing embedder.
//!
//! Produces bag-of-words style vectors without any model files: every
//! lowercased word and word bigram is hashed with FNV into one of `dimension`
//! buckets, with the top hash bit choosing the sign. Texts sharing vocabulary
//! get high cosine similarity, which is enough for tests and offline runs
//! where the ONNX model is not available.

use crate::error::Result;
use crate::provider::{EmbeddingProvider, EmbeddingResult, l2_normalize};
use async_trait::async_trait;
use fnv::FnvHasher;
use std::hash::Hasher;

const UNIGRAM_WEIGHT: f32 = 1.0;
const BIGRAM_WEIGHT: f32 = 0.5;

/// Embedding provider based on feature hashing.
#[derive(Debug, Clone)]
pub struct HashEmbedProvider {
    dimension: usize,
    model_id: String,
}

impl HashEmbedProvider {
    /// `dimension` must be positive; zero is bumped to one.
    pub fn new(dimension: usize) -> Self {
        let dimension = dimension.max(1);
        Self {
            dimension,
            model_id: format!("hash-{dimension}"),
        }
    }

    fn bucket(&self, feature: &str) -> (usize, f32) {
        let mut hasher = FnvHasher::default();
        hasher.write(feature.as_bytes());
        let hash = hasher.finish();
        let sign = if hash >> 63 == 1 { -1.0 } else { 1.0 };
        ((hash % self.dimension as u64) as usize, sign)
    }

    /// Embed one text synchronously.
    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let lowered = text.to_lowercase();
        let tokens: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .collect();

        let mut vector = vec![0.0f32; self.dimension];
        for token in &tokens {
            let (i, sign) = self.bucket(token);
            vector[i] += sign * UNIGRAM_WEIGHT;
        }
        for pair in tokens.windows(2) {
            let (i, sign) = self.bucket(&format!("{} {}", pair[0], pair[1]));
            vector[i] += sign * BIGRAM_WEIGHT;
        }

        if vector.iter().all(|v| *v == 0.0) {
            // No usable features; fall back to a fixed unit vector
            vector[0] = 1.0;
        }
        l2_normalize(&mut vector);
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedProvider {
    async fn embed_batch(&self, texts: &[String]) -> Result<EmbeddingResult> {
        Ok(EmbeddingResult::new(
            texts.iter().map(|t| self.embed_one(t)).collect(),
        ))
    }

    fn embedding_dimension(&self) -> usize {
        self.dimension
    }

    fn provider_name(&self) -> &str {
        "hash"
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}
