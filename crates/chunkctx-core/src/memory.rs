//! In-memory `CorpusStore`, used by tests and by tools that stage a corpus
//! before it is persisted.

use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::error::{Error, Result};
use crate::traits::CorpusStore;
use crate::types::{Chunk, ChunkId, NewChunk};

#[derive(Debug, Default)]
pub struct MemoryCorpus {
    rows: RwLock<BTreeMap<ChunkId, Chunk>>,
}

impl MemoryCorpus {
    pub fn new() -> Self { Self::default() }

    pub fn from_chunks(chunks: impl IntoIterator<Item = Chunk>) -> Self {
        let rows = chunks.into_iter().map(|c| (c.id, c)).collect();
        Self { rows: RwLock::new(rows) }
    }

    /// Stores a chunk under its own id, replacing any previous row.
    pub fn insert(&self, chunk: Chunk) -> Result<()> {
        self.write()?.insert(chunk.id, chunk);
        Ok(())
    }

    /// Appends a new chunk with the next free id and returns that id.
    pub fn push(&self, chunk: NewChunk, embedding: Option<Vec<f32>>) -> Result<ChunkId> {
        let mut rows = self.write()?;
        let id = rows.keys().next_back().map_or(1, |last| last + 1);
        rows.insert(
            id,
            Chunk {
                id,
                source_name: chunk.source_name,
                chunk_index: chunk.chunk_index,
                text: chunk.text,
                embedding,
                token_count: chunk.token_count,
            },
        );
        Ok(id)
    }

    pub fn remove(&self, id: ChunkId) -> Result<Option<Chunk>> {
        Ok(self.write()?.remove(&id))
    }

    pub fn len(&self) -> Result<usize> { Ok(self.read()?.len()) }

    pub fn is_empty(&self) -> Result<bool> { Ok(self.read()?.is_empty()) }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, BTreeMap<ChunkId, Chunk>>> {
        self.rows.write().map_err(|_| Error::Storage("memory corpus lock poisoned".into()))
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, BTreeMap<ChunkId, Chunk>>> {
        self.rows.read().map_err(|_| Error::Storage("memory corpus lock poisoned".into()))
    }
}

impl CorpusStore for MemoryCorpus {
    fn get_chunk(&self, id: ChunkId) -> Result<Option<Chunk>> {
        Ok(self.read()?.get(&id).cloned())
    }

    fn list_chunks_for(&self, source_name: &str) -> Result<Vec<Chunk>> {
        let mut chunks: Vec<Chunk> = self.read()?.values().filter(|c| c.source_name == source_name).cloned().collect();
        chunks.sort_by_key(|c| (c.chunk_index, c.id));
        Ok(chunks)
    }

    fn list_all_embedded_chunks(&self) -> Result<Vec<(ChunkId, Vec<f32>)>> {
        Ok(self
            .read()?
            .values()
            .filter_map(|c| c.embedding.as_ref().map(|v| (c.id, v.clone())))
            .collect())
    }

    fn list_embedded_ids(&self) -> Result<Vec<ChunkId>> {
        Ok(self.read()?.values().filter(|c| c.embedding.is_some()).map(|c| c.id).collect())
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{catch_unwind, AssertUnwindSafe};

    use super::*;

    #[test]
    fn poisoned_lock_is_reported_not_hidden() {
        let corpus = MemoryCorpus::new();
        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = corpus.rows.write().unwrap();
            panic!("writer died");
        }));
        assert!(matches!(corpus.len(), Err(Error::Storage(_))));
        assert!(matches!(corpus.is_empty(), Err(Error::Storage(_))));
        assert!(matches!(corpus.get_chunk(1), Err(Error::Storage(_))));
    }
}
