//! Index construction: parameter sizing, coarse-quantizer training and list assignment.
//!
//! Typical flow:
//! 1) Read `(id, vector)` pairs for every live embedded chunk from the store
//! 2) Validate dimensions against the first vector (abort or skip per policy)
//! 3) Size `nlist` from the corpus, train centroids, assign every vector to its list
use chunkctx_core::config::{IndexSettings, MismatchPolicy};
use chunkctx_core::error::{Error, Result};
use chunkctx_core::traits::CorpusStore;
use chunkctx_core::types::ChunkId;
use tracing::{debug, info, warn};

use crate::distance::nearest_centroid;
use crate::index::{fingerprint_ids, InvertedList, VectorIndex, NO_MATCH};
use crate::kmeans;

#[derive(Debug, Clone, PartialEq)]
pub struct IvfParams {
    pub nprobe: usize,
    pub max_train_points: usize,
    pub kmeans_iterations: usize,
    pub min_points_per_list: usize,
    pub seed: u64,
    pub on_dimension_mismatch: MismatchPolicy,
}

impl Default for IvfParams {
    fn default() -> Self { Self::from_settings(&IndexSettings::default()) }
}

impl IvfParams {
    pub fn from_settings(s: &IndexSettings) -> Self {
        Self {
            nprobe: s.nprobe.max(1),
            max_train_points: s.max_train_points,
            kmeans_iterations: s.kmeans_iterations,
            min_points_per_list: s.min_points_per_list.max(1),
            seed: s.seed,
            on_dimension_mismatch: s.on_dimension_mismatch,
        }
    }

    /// A single list: every search is exhaustive.
    pub fn exact() -> Self {
        Self { min_points_per_list: usize::MAX, ..Self::default() }
    }

    /// Number of inverted lists for `total` vectors.
    ///
    /// Roughly `4 * sqrt(n)`, capped so each list keeps at least
    /// `min_points_per_list` vectors; small corpora get one list.
    pub fn nlist_for(&self, total: usize) -> usize {
        if total < self.min_points_per_list.saturating_mul(2) {
            return 1;
        }
        let sqrt_n = (total as f64).sqrt() as usize;
        let nlist = std::cmp::min(4 * sqrt_n, 65_536);
        nlist.clamp(1, total / self.min_points_per_list)
    }
}

/// Builds an index from `(chunk id, embedding)` pairs.
///
/// Fails with `EmptyCorpus` when no usable vector remains, with
/// `DimensionMismatch` when a vector's length differs from the first one and
/// with `InvalidArgument` when a vector holds NaN or infinity. Under the
/// `Skip` policy those last two vectors are left out instead.
pub fn build(entries: Vec<(ChunkId, Vec<f32>)>, params: &IvfParams) -> Result<VectorIndex> {
    let source_ids: Vec<ChunkId> = entries.iter().map(|(id, _)| *id).collect();
    let fingerprint = fingerprint_ids(&source_ids);

    let dim = match entries.first() {
        Some((_, v)) => v.len(),
        None => return Err(Error::EmptyCorpus),
    };
    let mut entries = entries;
    entries.sort_by_key(|(id, _)| *id);
    if dim == 0 {
        return Err(Error::InvalidArgument("embeddings must have at least one component".into()));
    }

    let mut accepted: Vec<(ChunkId, Vec<f32>)> = Vec::with_capacity(entries.len());
    for (id, vector) in entries {
        if id <= NO_MATCH {
            return Err(Error::InvalidArgument(format!("chunk id {id} is reserved")));
        }
        let rejected = if vector.len() != dim {
            Some(Error::DimensionMismatch { expected: dim, actual: vector.len(), chunk_id: Some(id) })
        } else if vector.iter().any(|x| !x.is_finite()) {
            Some(Error::InvalidArgument(format!("chunk {id} has a non-finite embedding component")))
        } else {
            None
        };
        if let Some(err) = rejected {
            match params.on_dimension_mismatch {
                MismatchPolicy::Abort => return Err(err),
                MismatchPolicy::Skip => {
                    warn!(chunk_id = id, %err, "skipping vector");
                    continue;
                }
            }
        }
        accepted.push((id, vector));
    }
    if accepted.is_empty() {
        return Err(Error::EmptyCorpus);
    }

    let nlist = params.nlist_for(accepted.len());
    let centroids = if nlist == 1 {
        vec![mean(&accepted, dim)]
    } else {
        let refs: Vec<&[f32]> = accepted.iter().map(|(_, v)| v.as_slice()).collect();
        let trained = kmeans::train(&refs, nlist, params.kmeans_iterations, params.max_train_points, params.seed);
        debug!(iterations = trained.iterations, inertia = trained.inertia, "coarse quantizer trained");
        trained.centroids
    };

    let mut lists = vec![InvertedList::default(); centroids.len()];
    for (id, vector) in &accepted {
        lists[nearest_centroid(vector, &centroids)].push(*id, vector);
    }
    info!(vectors = accepted.len(), dim, nlist = centroids.len(), "vector index built");

    let nprobe = params.nprobe.clamp(1, centroids.len());
    Ok(VectorIndex { dim, nprobe, centroids, lists, fingerprint })
}

/// Reads every live embedded chunk from `store` and builds over it.
pub fn build_from_store(store: &dyn CorpusStore, params: &IvfParams) -> Result<VectorIndex> {
    build(store.list_all_embedded_chunks()?, params)
}

fn mean(entries: &[(ChunkId, Vec<f32>)], dim: usize) -> Vec<f32> {
    let mut sum = vec![0f64; dim];
    for (_, v) in entries {
        for (s, x) in sum.iter_mut().zip(v) {
            *s += *x as f64;
        }
    }
    let n = entries.len() as f64;
    sum.into_iter().map(|s| (s / n) as f32).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nlist_sizing() {
        let p = IvfParams { min_points_per_list: 39, ..IvfParams::default() };
        assert_eq!(p.nlist_for(0), 1);
        assert_eq!(p.nlist_for(77), 1);
        assert_eq!(p.nlist_for(100), 2);
        assert_eq!(p.nlist_for(10_000), 256);
        assert_eq!(p.nlist_for(1_000_000), 4000);
        assert_eq!(IvfParams::exact().nlist_for(1_000_000), 1);
    }
}
