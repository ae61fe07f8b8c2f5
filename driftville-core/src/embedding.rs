//! Vector embedding abstraction layer.
//!
//! The metrics engine embeds short texts (topics, state summaries,
//! justifications) through [`EmbeddingService`]. The HTTP implementation
//! lives in `driftville-llm`; [`BagOfWordsEmbedder`] hashes terms into a
//! fixed-size vector and needs no network, so offline audits and tests
//! are deterministic.

use std::future::Future;

use crate::error::Result;
use crate::types::Embedding;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Turn texts into vectors, one per input, in input order.
pub trait EmbeddingService: Send + Sync {
    /// Embed a batch of texts.
    ///
    /// # Errors
    ///
    /// Returns [`crate::DriftvilleError::Embedding`] if the provider fails
    /// or returns a different number of vectors than texts.
    fn embed(&self, texts: &[String]) -> impl Future<Output = Result<Vec<Embedding>>> + Send;

    /// A human-readable name for the model.
    fn model_name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Cosine similarity
// ---------------------------------------------------------------------------

/// Compute the cosine similarity between two embedding vectors.
///
/// Returns a value in \[-1.0, 1.0\].  Returns `0.0` if the dimensions
/// differ or either vector has zero magnitude.
#[must_use]
pub fn cosine_similarity(a: &Embedding, b: &Embedding) -> f32 {
    if a.0.len() != b.0.len() {
        return 0.0;
    }

    let mut dot = 0.0_f32;
    let mut mag_a = 0.0_f32;
    let mut mag_b = 0.0_f32;

    for (x, y) in a.0.iter().zip(b.0.iter()) {
        dot += x * y;
        mag_a += x * x;
        mag_b += y * y;
    }

    let denom = mag_a.sqrt() * mag_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

// ---------------------------------------------------------------------------
// Hashed bag-of-words provider
// ---------------------------------------------------------------------------

/// Deterministic term-frequency embedder using FNV-1a feature hashing.
#[derive(Debug, Clone)]
pub struct BagOfWordsEmbedder {
    dims: usize,
}

impl BagOfWordsEmbedder {
    /// Create an embedder with `dimensions` buckets (at least one).
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self { dims: dimensions.max(1) }
    }

    /// Embed one text synchronously.
    #[must_use]
    pub fn embed_one(&self, text: &str) -> Embedding {
        let mut v = vec![0.0_f32; self.dims];
        for word in text.split_whitespace() {
            let word = word
                .trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase();
            if word.is_empty() {
                continue;
            }
            #[allow(clippy::cast_possible_truncation)]
            let bucket = (fnv1a(word.as_bytes()) % self.dims as u64) as usize;
            v[bucket] += 1.0;
        }
        Embedding(v)
    }
}

impl Default for BagOfWordsEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EmbeddingService for BagOfWordsEmbedder {
    fn embed(&self, texts: &[String]) -> impl Future<Output = Result<Vec<Embedding>>> + Send {
        let vectors = texts.iter().map(|t| self.embed_one(t)).collect();
        std::future::ready(Ok(vectors))
    }

    fn model_name(&self) -> &str {
        "bag-of-words-fnv1a"
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    bytes
        .iter()
        .fold(OFFSET, |hash, &b| (hash ^ u64::from(b)).wrapping_mul(PRIME))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_identical_vectors() {
        let a = Embedding(vec![1.0, 0.0, 0.0]);
        let b = Embedding(vec![1.0, 0.0, 0.0]);
        let sim = cosine_similarity(&a, &b);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_orthogonal_vectors() {
        let a = Embedding(vec![1.0, 0.0]);
        let b = Embedding(vec![0.0, 1.0]);
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn cosine_mismatched_dimensions() {
        let a = Embedding(vec![1.0, 0.0]);
        let b = Embedding(vec![1.0, 0.0, 0.0]);
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[test]
    fn bag_of_words_is_deterministic_and_case_blind() {
        let e = BagOfWordsEmbedder::new(64);
        assert_eq!(e.embed_one("Quarterly Report"), e.embed_one("quarterly report!"));
        let sim = cosine_similarity(&e.embed_one("quarterly report"), &e.embed_one("report quarterly"));
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn empty_text_embeds_to_zero_vector() {
        let e = BagOfWordsEmbedder::new(8);
        assert!(e.embed_one("   ").0.iter().all(|&x| x == 0.0));
    }

    #[tokio::test]
    async fn batch_keeps_input_order() {
        let e = BagOfWordsEmbedder::new(32);
        let texts = vec!["coffee".to_string(), "window shopping".to_string()];
        let out = e.embed(&texts).await.expect("embed");
        assert_eq!(out.len(), 2);
        assert_eq!(out[1], e.embed_one("window shopping"));
    }
}
