//! Nearest-neighbor retrieval with id resolution through the corpus store.

use chunkctx_core::config::RetrievalSettings;
use chunkctx_core::error::{Error, Result};
use chunkctx_core::traits::{CorpusStore, VectorSearch};
use chunkctx_core::types::ScoredChunk;
use tracing::{debug, warn};

pub struct RetrievalEngine<I, S> where I: VectorSearch, S: CorpusStore {
    index: I,
    store: S,
    settings: RetrievalSettings,
}

impl<I, S> RetrievalEngine<I, S> where I: VectorSearch, S: CorpusStore {
    pub fn new(index: I, store: S, settings: RetrievalSettings) -> Self { Self { index, store, settings } }

    pub fn index(&self) -> &I { &self.index }

    pub fn store(&self) -> &S { &self.store }

    pub fn settings(&self) -> &RetrievalSettings { &self.settings }

    /// Result count for a query: an explicit number in the text, else the default.
    pub fn requested_k(&self, query_text: &str) -> usize {
        extract_top_k(query_text, self.settings.default_k, self.settings.max_explicit_k)
    }

    /// Up to `requested_k` resolved chunks, nearest first.
    ///
    /// The index is asked for `requested_k + over_fetch_margin` neighbors.
    /// Ids the store cannot resolve are logged and dropped without using up
    /// a result slot.
    pub fn retrieve(&self, query_vector: &[f32], requested_k: usize) -> Result<Vec<ScoredChunk>> {
        if requested_k == 0 {
            return Err(Error::InvalidArgument("requested_k must be at least 1".into()));
        }
        let fetch = requested_k.saturating_add(self.settings.over_fetch_margin);
        let neighbors = self.index.search(query_vector, fetch)?;

        let mut out = Vec::with_capacity(requested_k);
        let mut dropped = 0usize;
        for n in neighbors {
            if out.len() == requested_k {
                break;
            }
            if n.id < 0 {
                dropped += 1;
                continue;
            }
            match self.store.get_chunk(n.id) {
                Ok(Some(chunk)) => out.push(ScoredChunk { chunk: chunk.without_embedding(), distance: n.distance }),
                Ok(None) => {
                    dropped += 1;
                    warn!(error = %Error::UnresolvedMatch(n.id), "dropping neighbor");
                }
                Err(e) => {
                    dropped += 1;
                    warn!(chunk_id = n.id, error = %e, "chunk lookup failed; dropping neighbor");
                }
            }
        }
        debug!(requested_k, fetch, returned = out.len(), dropped, "retrieval finished");
        Ok(out)
    }
}

/// First standalone integer in `query`, if it lies in `1..=max_k`; `default_k` otherwise.
///
/// Digits glued to letters ("top10", "10th") do not count.
pub fn extract_top_k(query: &str, default_k: usize, max_k: usize) -> usize {
    query
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .find(|tok| !tok.is_empty() && tok.chars().all(|c| c.is_ascii_digit()))
        .and_then(|tok| tok.parse::<usize>().ok())
        .filter(|k| (1..=max_k).contains(k))
        .unwrap_or(default_k)
}
