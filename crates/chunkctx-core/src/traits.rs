use std::sync::Arc;

use crate::error::Result;
use crate::types::{Chunk, ChunkId, Neighbor};

/// Turns text into fixed-length vectors.
///
/// Every vector returned by one embedder has length `dim()`. Implementations
/// report retryable failures as `Error::TransientProvider`.
pub trait Embedder: Send + Sync {
    fn dim(&self) -> usize;
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut out = self.embed_batch(&[text.to_string()])?;
        out.pop()
            .ok_or_else(|| crate::error::Error::TransientProvider("embedder returned no vector".into()))
    }
}

/// Read access to the persisted chunk collection.
///
/// Rows may disappear between index build and query time; `get_chunk`
/// returns `Ok(None)` for those rather than an error.
pub trait CorpusStore: Send + Sync {
    fn get_chunk(&self, id: ChunkId) -> Result<Option<Chunk>>;
    /// Live chunks of one source, in `chunk_index` order.
    fn list_chunks_for(&self, source_name: &str) -> Result<Vec<Chunk>>;
    /// `(id, embedding)` for every live chunk that has been embedded.
    fn list_all_embedded_chunks(&self) -> Result<Vec<(ChunkId, Vec<f32>)>>;

    fn list_embedded_ids(&self) -> Result<Vec<ChunkId>> {
        Ok(self.list_all_embedded_chunks()?.into_iter().map(|(id, _)| id).collect())
    }
}

/// Nearest-neighbor lookup keyed by chunk id.
///
/// Results are ascending by squared Euclidean distance and never contain
/// the `-1` "no match" id.
pub trait VectorSearch: Send + Sync {
    fn dim(&self) -> usize;
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>>;
}

impl<T: VectorSearch + ?Sized> VectorSearch for Arc<T> {
    fn dim(&self) -> usize { (**self).dim() }
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> { (**self).search(query, k) }
}

impl<T: CorpusStore + ?Sized> CorpusStore for Arc<T> {
    fn get_chunk(&self, id: ChunkId) -> Result<Option<Chunk>> { (**self).get_chunk(id) }
    fn list_chunks_for(&self, source_name: &str) -> Result<Vec<Chunk>> { (**self).list_chunks_for(source_name) }
    fn list_all_embedded_chunks(&self) -> Result<Vec<(ChunkId, Vec<f32>)>> { (**self).list_all_embedded_chunks() }
    fn list_embedded_ids(&self) -> Result<Vec<ChunkId>> { (**self).list_embedded_ids() }
}

/// Measures text length in language-model tokens.
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;
}
