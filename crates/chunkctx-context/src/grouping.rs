//! Document grouping and the relevance order used for assembly.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chunkctx_core::types::{DocumentGroup, ScoredChunk};

/// Partitions by `source_name` and orders the groups by their best (smallest) distance.
///
/// Inside a group chunks are ordered by distance, then `chunk_index`, then id.
/// Equal best scores fall back to the source name, so the output depends only
/// on the input set.
pub fn group_by_document(scored: &[ScoredChunk]) -> Vec<DocumentGroup> {
    let mut by_source: BTreeMap<&str, Vec<&ScoredChunk>> = BTreeMap::new();
    for sc in scored {
        by_source.entry(sc.chunk.source_name.as_str()).or_default().push(sc);
    }

    let mut groups: Vec<DocumentGroup> = by_source
        .into_iter()
        .map(|(source, members)| {
            let best_score = members.iter().map(|sc| sc.distance).fold(f32::INFINITY, f32::min);
            let mut chunks: Vec<ScoredChunk> = members.into_iter().cloned().collect();
            chunks.sort_by(by_relevance);
            DocumentGroup { source_name: source.to_string(), best_score, chunks }
        })
        .collect();
    groups.sort_by(|a, b| a.best_score.total_cmp(&b.best_score).then_with(|| a.source_name.cmp(&b.source_name)));
    groups
}

/// Groups back to one list in assembly order, without repeated chunk ids.
pub fn flatten(groups: &[DocumentGroup]) -> Vec<ScoredChunk> {
    let mut seen = std::collections::HashSet::new();
    groups
        .iter()
        .flat_map(|g| g.chunks.iter())
        .filter(|sc| seen.insert(sc.chunk.id))
        .cloned()
        .collect()
}

/// Every grouped chunk once, nearest first across all documents.
///
/// This is the order the budget is filled in, so a close match from the
/// second document is never crowded out by a weak one from the first.
pub fn relevance_order(groups: &[DocumentGroup]) -> Vec<ScoredChunk> {
    let mut ordered = flatten(groups);
    ordered.sort_by(by_relevance);
    ordered
}

fn by_relevance(a: &ScoredChunk, b: &ScoredChunk) -> Ordering {
    a.distance
        .total_cmp(&b.distance)
        .then(a.chunk.chunk_index.cmp(&b.chunk.chunk_index))
        .then(a.chunk.id.cmp(&b.chunk.id))
}
