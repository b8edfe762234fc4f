//! Embedding provider trait and vector utilities.
//!
//! Defines the [`EmbeddingProvider`] trait that all embedding backends
//! implement, the deterministic [`HashEmbedder`], and pure helper functions
//! for vector serialization and similarity computation.
//!
//! Network and model-backed providers (OpenAI, Ollama, fastembed) live in
//! the `knowledge-harness` app crate.

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::text::words;

/// Trait for embedding providers.
///
/// `embed` is order-preserving: the i-th vector belongs to the i-th text,
/// and every vector has exactly [`dims`](EmbeddingProvider::dims) entries.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;
    /// Embed a batch of texts.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Check a provider response against the request it answered.
pub fn check_batch(vectors: &[Vec<f32>], expected: usize, dims: usize) -> Result<()> {
    if vectors.len() != expected {
        bail!(
            "embedding count mismatch: expected {}, got {}",
            expected,
            vectors.len()
        );
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
        bail!(
            "embedding dimension mismatch: expected {}, got {}",
            dims,
            bad.len()
        );
    }
    Ok(())
}

/// Deterministic feature-hashing embedder.
///
/// Each word and each adjacent word pair is hashed with FNV-1a into signed
/// buckets, then the vector is L2-normalized. Texts sharing words end up
/// with positive cosine similarity. Needs no model download or network.
pub struct HashEmbedder {
    dims: usize,
}

impl HashEmbedder {
    pub const MODEL_NAME: &'static str = "fnv1a-hash";

    pub fn new(dims: usize) -> Self {
        Self { dims }
    }

    /// Embed a single text.
    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.dims];
        if self.dims == 0 {
            return embedding;
        }

        let tokens = words(text);
        for token in &tokens {
            accumulate(&mut embedding, token.as_bytes(), 1.0);
        }
        for pair in tokens.windows(2) {
            let bigram = format!("{} {}", pair[0], pair[1]);
            accumulate(&mut embedding, bigram.as_bytes(), 0.5);
        }

        l2_normalize(&mut embedding);
        embedding
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(384)
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    fn model_name(&self) -> &str {
        Self::MODEL_NAME
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

// A handful of signed buckets per feature keeps collisions from cancelling
// out whole words in small dimensions.
const PROBES: u64 = 4;

fn accumulate(embedding: &mut [f32], feature: &[u8], weight: f32) {
    let base = fnv1a(feature);
    for probe in 0..PROBES {
        let h = fnv1a(&[base.to_le_bytes(), probe.to_le_bytes()].concat());
        let sign = if h & 1 == 0 { weight } else { -weight };
        let slot = ((h >> 1) as usize) % embedding.len();
        embedding[slot] += sign;
    }
}

fn fnv1a(data: &[u8]) -> u64 {
    const FNV_OFFSET: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;

    let mut hash = FNV_OFFSET;
    for byte in data {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// # Example
///
/// ```rust
/// use knowledge_harness_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` for empty vectors, zero
/// vectors, or vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
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

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    (dot / denom).clamp(-1.0, 1.0)
}

/// Map a signed cosine onto `[0, 1]`. Monotonic; opposite vectors score 0.
pub fn similarity_score(cosine: f32) -> f64 {
    (cosine as f64).max(0.0).min(1.0)
}
