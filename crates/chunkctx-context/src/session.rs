//! Per-conversation state, passed into and returned from every turn.
//!
//! Fresh → Active on the first query, Active → Active on each further query,
//! any phase → Reset on an explicit reset (everything cleared); the next
//! query starts a new Active cycle. Nothing here is shared between sessions.

use std::collections::HashSet;

use chunkctx_core::error::{Error, Result};
use chunkctx_core::types::{ChatTurn, ChunkId, ScoredChunk};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    #[default]
    Fresh,
    Active,
    Reset,
}

/// Cumulative token counters since the session started or was last reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn is_zero(&self) -> bool { self.input_tokens == 0 && self.output_tokens == 0 }
}

/// Read-only usage summary with an estimated cost.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UsageReport {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub estimated_cost: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    phase: SessionPhase,
    history: Vec<ChatTurn>,
    accumulated_chunks: Vec<ScoredChunk>,
    usage: TokenUsage,
    turns: u64,
}

impl SessionState {
    pub fn new() -> Self { Self::default() }

    pub fn phase(&self) -> SessionPhase { self.phase }

    pub fn history(&self) -> &[ChatTurn] { &self.history }

    /// Every distinct chunk surfaced since the last reset, first-seen order.
    pub fn accumulated_chunks(&self) -> &[ScoredChunk] { &self.accumulated_chunks }

    pub fn usage(&self) -> TokenUsage { self.usage }

    pub fn turns(&self) -> u64 { self.turns }

    /// Moves Fresh or Reset into Active.
    pub(crate) fn activate(&mut self) {
        self.phase = SessionPhase::Active;
    }

    /// Adds chunks not seen before; a chunk already held keeps its first score.
    /// Embeddings are not kept. Returns how many were added.
    pub fn merge_chunks(&mut self, fresh: &[ScoredChunk]) -> usize {
        let mut known: HashSet<ChunkId> = self.accumulated_chunks.iter().map(|sc| sc.chunk.id).collect();
        let before = self.accumulated_chunks.len();
        for sc in fresh {
            if known.insert(sc.chunk.id) {
                let mut kept = sc.clone();
                kept.chunk.embedding = None;
                self.accumulated_chunks.push(kept);
            }
        }
        self.accumulated_chunks.len() - before
    }

    /// Appends `turn`, then drops the oldest turns so at most `keep` remain.
    pub(crate) fn push_turn(&mut self, turn: ChatTurn, keep: usize) {
        self.history.push(turn);
        if self.history.len() > keep {
            let excess = self.history.len() - keep;
            self.history.drain(..excess);
        }
    }

    pub(crate) fn record_input(&mut self, tokens: usize) {
        self.usage.input_tokens += tokens as u64;
        self.turns += 1;
    }

    pub(crate) fn record_output(&mut self, tokens: usize) {
        self.usage.output_tokens += tokens as u64;
    }

    /// Clears history, chunks and counters.
    pub fn reset(self) -> Self {
        Self { phase: SessionPhase::Reset, ..Self::default() }
    }

    pub fn usage_report(&self, input_cost_per_1k: f64, output_cost_per_1k: f64) -> UsageReport {
        let cost = self.usage.input_tokens as f64 / 1000.0 * input_cost_per_1k
            + self.usage.output_tokens as f64 / 1000.0 * output_cost_per_1k;
        UsageReport { input_tokens: self.usage.input_tokens, output_tokens: self.usage.output_tokens, estimated_cost: cost }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidArgument(format!("session encode: {e}")))
    }

    pub fn from_json(s: &str) -> Result<Self> {
        serde_json::from_str(s).map_err(|e| Error::InvalidArgument(format!("session decode: {e}")))
    }
}
