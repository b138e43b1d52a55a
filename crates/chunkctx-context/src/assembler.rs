//! Token-budgeted context assembly.
//!
//! Candidates are taken in the order given, each rendered with its metadata
//! header and measured as a whole. Chunks are never truncated: the first one
//! that would push the running total past the budget ends assembly.

use chunkctx_core::config::AssemblerSettings;
use chunkctx_core::error::{Error, Result};
use chunkctx_core::traits::TokenCounter;
use chunkctx_core::types::{DocumentGroup, ScoredChunk};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::grouping::relevance_order;

/// Where the assembled candidates came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextOrigin {
    FreshRetrieval,
    /// Fresh retrieval was empty; the session's earlier chunks were reused.
    SessionFallback,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssembledContext {
    pub text: String,
    /// Included chunks, in inclusion order.
    pub used: Vec<ScoredChunk>,
    pub tokens_used: usize,
    /// Candidates dropped as empty or extraction debris.
    pub filtered_out: usize,
}

impl AssembledContext {
    pub fn is_empty(&self) -> bool { self.used.is_empty() }
}

pub struct ContextAssembler<'a> {
    counter: &'a dyn TokenCounter,
    min_fragment_chars: usize,
    artifact_marker: String,
}

impl<'a> ContextAssembler<'a> {
    pub fn new(counter: &'a dyn TokenCounter, settings: &AssemblerSettings) -> Self {
        Self { counter, min_fragment_chars: settings.min_fragment_chars, artifact_marker: settings.artifact_marker.clone() }
    }

    /// Blank text, or short text carrying the artifact marker.
    pub fn is_debris(&self, text: &str) -> bool {
        let text = text.trim();
        if text.is_empty() {
            return true;
        }
        !self.artifact_marker.is_empty()
            && text.chars().count() < self.min_fragment_chars
            && text.contains(self.artifact_marker.as_str())
    }

    /// Greedy fill of `token_budget` over `ranked`, in order.
    ///
    /// Returns `BudgetExceededImmediately` when the first usable chunk alone
    /// does not fit.
    pub fn assemble(&self, ranked: &[ScoredChunk], token_budget: usize) -> Result<AssembledContext> {
        let mut blocks: Vec<String> = Vec::new();
        let mut used = Vec::new();
        let mut total = 0usize;
        let mut filtered_out = 0usize;

        for sc in ranked {
            if self.is_debris(&sc.chunk.text) {
                filtered_out += 1;
                continue;
            }
            let block = format_chunk(sc);
            let tokens = self.counter.count(&block);
            if total + tokens > token_budget {
                if used.is_empty() {
                    return Err(Error::BudgetExceededImmediately { chunk_id: sc.chunk.id, tokens, budget: token_budget });
                }
                break;
            }
            total += tokens;
            blocks.push(block);
            used.push(sc.clone());
        }
        debug!(included = used.len(), tokens = total, budget = token_budget, filtered_out, "context assembled");
        Ok(AssembledContext { text: blocks.join("\n\n"), used, tokens_used: total, filtered_out })
    }

    /// Fresh groups in relevance order when there are any, else the session's
    /// chunks in `chunk_index` order.
    pub fn assemble_with_fallback(
        &self,
        groups: &[DocumentGroup],
        token_budget: usize,
        prior_session_chunks: &[ScoredChunk],
    ) -> (ContextOrigin, Result<AssembledContext>) {
        if groups.is_empty() {
            let ordered = order_by_position(prior_session_chunks);
            (ContextOrigin::SessionFallback, self.assemble(&ordered, token_budget))
        } else {
            (ContextOrigin::FreshRetrieval, self.assemble(&relevance_order(groups), token_budget))
        }
    }
}

/// Reading order for reused chunks; their old scores no longer rank anything.
pub fn order_by_position(chunks: &[ScoredChunk]) -> Vec<ScoredChunk> {
    let mut ordered = chunks.to_vec();
    ordered.sort_by(|a, b| a.chunk.chunk_index.cmp(&b.chunk.chunk_index).then(a.chunk.id.cmp(&b.chunk.id)));
    ordered
}

pub fn format_chunk(sc: &ScoredChunk) -> String {
    format!(
        "[Source: {} | Row ID: {} | Chunk: {} | Score: {:.4}]\n{}",
        sc.chunk.source_name,
        sc.chunk.id,
        sc.chunk.chunk_index,
        sc.distance,
        sc.chunk.text.trim()
    )
}
