//! In-memory IVF-flat index over chunk embeddings.
//!
//! Vectors are partitioned into inverted lists by a k-means coarse quantizer.
//! Each list stores the chunk id next to the full vector, so results are
//! always keyed by corpus id and never by insertion position. The index is
//! immutable once built and can be shared across threads.

use chunkctx_core::error::{Error, Result};
use chunkctx_core::traits::VectorSearch;
use chunkctx_core::types::{ChunkId, Neighbor};

use crate::distance::squared_l2;

/// Padding id `search_raw` uses when fewer than `k` vectors were reachable.
pub const NO_MATCH: ChunkId = -1;

/// One partition: ids and their row-major vectors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InvertedList {
    pub(crate) ids: Vec<ChunkId>,
    pub(crate) vectors: Vec<f32>,
}

impl InvertedList {
    pub fn len(&self) -> usize { self.ids.len() }

    pub fn is_empty(&self) -> bool { self.ids.is_empty() }

    pub(crate) fn push(&mut self, id: ChunkId, vector: &[f32]) {
        self.ids.push(id);
        self.vectors.extend_from_slice(vector);
    }

    fn iter<'a>(&'a self, dim: usize) -> impl Iterator<Item = (ChunkId, &'a [f32])> + 'a {
        self.ids.iter().copied().zip(self.vectors.chunks_exact(dim))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorIndex {
    pub(crate) dim: usize,
    pub(crate) nprobe: usize,
    pub(crate) centroids: Vec<Vec<f32>>,
    pub(crate) lists: Vec<InvertedList>,
    /// blake3 over the sorted id set the index was built from.
    pub(crate) fingerprint: [u8; 32],
}

impl VectorIndex {
    pub fn dim(&self) -> usize { self.dim }

    pub fn nlist(&self) -> usize { self.centroids.len() }

    pub fn nprobe(&self) -> usize { self.nprobe }

    pub fn fingerprint(&self) -> &[u8; 32] { &self.fingerprint }

    pub fn len(&self) -> usize { self.lists.iter().map(InvertedList::len).sum() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Same index probing a different number of lists per query.
    pub fn with_nprobe(mut self, nprobe: usize) -> Self {
        self.nprobe = nprobe.clamp(1, self.nlist().max(1));
        self
    }

    pub fn contains(&self, id: ChunkId) -> bool {
        self.lists.iter().any(|l| l.ids.contains(&id))
    }

    /// Up to `k` nearest chunk ids by squared Euclidean distance, ascending.
    ///
    /// Never contains `NO_MATCH`. Ties are broken by chunk id.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        let mut hits = self.search_raw(query, k)?;
        hits.retain(|n| n.id != NO_MATCH);
        Ok(hits)
    }

    /// Exactly `k` slots; slots nothing could fill carry `NO_MATCH` and `f32::MAX`.
    pub fn search_raw(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        if k == 0 {
            return Err(Error::InvalidArgument("k must be at least 1".into()));
        }
        if query.len() != self.dim {
            return Err(Error::DimensionMismatch { expected: self.dim, actual: query.len(), chunk_id: None });
        }
        if query.iter().any(|x| !x.is_finite()) {
            return Err(Error::InvalidArgument("query vector contains a non-finite value".into()));
        }

        let mut candidates: Vec<Neighbor> = Vec::new();
        for (probed, list_idx) in self.probe_order(query).into_iter().enumerate() {
            // Keep probing past nprobe until k candidates are in hand.
            if probed >= self.nprobe && candidates.len() >= k {
                break;
            }
            candidates.extend(
                self.lists[list_idx]
                    .iter(self.dim)
                    .map(|(id, v)| Neighbor { id, distance: squared_l2(query, v) }),
            );
        }

        candidates.sort_by(|a, b| a.distance.total_cmp(&b.distance).then(a.id.cmp(&b.id)));
        candidates.truncate(k);
        candidates.resize(k, Neighbor { id: NO_MATCH, distance: f32::MAX });
        Ok(candidates)
    }

    fn probe_order(&self, query: &[f32]) -> Vec<usize> {
        let mut order: Vec<(f32, usize)> =
            self.centroids.iter().enumerate().map(|(i, c)| (squared_l2(query, c), i)).collect();
        order.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        order.into_iter().map(|(_, i)| i).collect()
    }
}

impl VectorSearch for VectorIndex {
    fn dim(&self) -> usize { self.dim }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> { VectorIndex::search(self, query, k) }
}

/// Fingerprint of an id set, independent of input order.
pub fn fingerprint_ids(ids: &[ChunkId]) -> [u8; 32] {
    let mut sorted = ids.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    let mut hasher = blake3::Hasher::new();
    for id in sorted {
        hasher.update(&id.to_le_bytes());
    }
    *hasher.finalize().as_bytes()
}
