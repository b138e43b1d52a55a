//! chunkctx-embed
//!
//! Embedding providers and token counters. The real embedding model lives
//! behind an external service; this crate ships a deterministic hashing
//! embedder for local runs and tests, and wraps any `Embedder` in a bounded
//! retry policy.
use std::hash::{Hash, Hasher};

use chunkctx_core::config::EmbeddingSettings;
use chunkctx_core::error::{Error, Result};
use chunkctx_core::traits::Embedder;
use twox_hash::XxHash64;

pub mod retry;
pub mod tokenize;

pub use retry::{RetryPolicy, RetryingEmbedder};
pub use tokenize::{counter_from_settings, HeuristicTokenCounter, TokenizerCounter};

/// Bag-of-words feature hashing into `dim` buckets, L2-normalized.
///
/// Texts sharing words land close to each other, which is enough to drive
/// the pipeline end to end without a model.
pub struct HashEmbedder {
    dim: usize,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Result<Self> {
        if dim == 0 {
            return Err(Error::InvalidArgument("embedding dimension must be at least 1".into()));
        }
        Ok(Self { dim })
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dim];
        let words = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_lowercase);
        for word in words {
            let mut hasher = XxHash64::with_seed(0);
            word.hash(&mut hasher);
            let h = hasher.finish();
            let idx = (h % self.dim as u64) as usize;
            let val = 0.5 + (((h >> 32) as u32) as f32) / (u32::MAX as f32);
            v[idx] += val;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt().max(1e-6);
        for x in &mut v {
            *x /= norm;
        }
        v
    }
}

impl Embedder for HashEmbedder {
    fn dim(&self) -> usize { self.dim }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

/// The embedder binaries use: the hashing embedder behind the configured retry policy.
pub fn get_default_embedder(settings: &EmbeddingSettings) -> Result<RetryingEmbedder<HashEmbedder>> {
    let inner = HashEmbedder::new(settings.dimension)?;
    Ok(RetryingEmbedder::new(inner, RetryPolicy::from_settings(settings)))
}
