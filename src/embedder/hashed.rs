//! Deterministic local embedder based on feature hashing.
//!
//! Each lowercase alphanumeric token is hashed with three seeds; every hash
//! picks a bucket and a sign. Buckets are summed and the result is
//! L2-normalized, so cosine similarity reduces to a dot product and rewards
//! shared vocabulary. No network and no model files: identical input always
//! yields an identical vector.

use anyhow::Result;
use async_trait::async_trait;

use super::EmbeddingProvider;

/// Default vector width for the hashed embedder.
pub const DEFAULT_HASHED_DIMENSIONS: usize = 256;

const HASH_SEEDS: [u64; 3] = [
    0x517c_c1b7_2722_0a95,
    0x6d0f_27bd_ceb7_b067,
    0x9e37_79b1_85eb_ca87,
];

/// Feature-hashing embedder with a fixed output dimension.
#[derive(Debug, Clone)]
pub struct HashedEmbedder {
    dimensions: usize,
    model_id: String,
}

impl HashedEmbedder {
    /// Builds an embedder producing `dimensions`-wide vectors.
    pub fn new(dimensions: usize) -> Self {
        let dimensions = dimensions.max(1);
        Self {
            dimensions,
            model_id: format!("hashed-v1@{dimensions}"),
        }
    }

    /// Synchronous embedding used by the async trait impl.
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions];
        for token in tokenize(text) {
            for &seed in HASH_SEEDS.iter() {
                let hash = feature_hash(token.as_bytes(), seed);
                let bucket = (hash as usize) % self.dimensions;
                let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
                vector[bucket] += sign;
            }
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in vector.iter_mut() {
                *value /= norm;
            }
        }
        vector
    }
}

impl Default for HashedEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_HASHED_DIMENSIONS)
    }
}

#[async_trait]
impl EmbeddingProvider for HashedEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn batch_size(&self) -> usize {
        64
    }

    async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(inputs.iter().map(|input| self.embed_text(input)).collect())
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|ch: char| !ch.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(|token| token.to_lowercase())
}

fn feature_hash(data: &[u8], seed: u64) -> u64 {
    let mut hash = seed ^ data.len() as u64;
    for &byte in data {
        hash ^= (byte as u64).wrapping_mul(0x1000_0000_01b3);
        hash = hash.rotate_left(13).wrapping_mul(0xff51_afd7_ed55_8ccd);
    }
    hash ^ (hash >> 33)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dot(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[tokio::test(flavor = "current_thread")]
    async fn identical_text_embeds_identically() {
        let embedder = HashedEmbedder::default();
        let a = embedder.embed("AI voice assistants").await.unwrap();
        let b = embedder.embed("AI voice assistants").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), DEFAULT_HASHED_DIMENSIONS);
    }

    #[test]
    fn vectors_are_unit_length_and_case_insensitive() {
        let embedder = HashedEmbedder::new(64);
        let upper = embedder.embed_text("Voice Assistants");
        let lower = embedder.embed_text("voice assistants");
        assert_eq!(upper, lower);
        assert!((dot(&upper, &upper) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn shared_vocabulary_scores_higher() {
        let embedder = HashedEmbedder::default();
        let query = embedder.embed_text("voice assistants for clinics");
        let related = embedder.embed_text("builds voice assistants that answer clinic calls");
        let unrelated = embedder.embed_text("penetration testing and networking");
        assert!(dot(&query, &related) > dot(&query, &unrelated));
    }

    #[test]
    fn empty_text_is_zero_vector() {
        let embedder = HashedEmbedder::new(8);
        assert!(embedder.embed_text("  ").iter().all(|v| *v == 0.0));
    }
}
