//! Per-turn entry points: retrieve, group, assemble and update the session.

use chunkctx_core::config::{AssemblerSettings, SessionSettings, Settings};
use chunkctx_core::error::Error;
use chunkctx_core::traits::{CorpusStore, Embedder, TokenCounter, VectorSearch};
use chunkctx_core::types::{ChatTurn, ChunkId, ScoredChunk};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::assembler::{ContextAssembler, ContextOrigin};
use crate::classify::{Classification, QueryCategory, QueryClassifier};
use crate::grouping::{group_by_document, relevance_order};
use crate::prompt::PromptWindow;
use crate::retrieval::RetrievalEngine;
use crate::session::{SessionState, UsageReport};

/// Identifies one chunk placed into the context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRef {
    pub id: ChunkId,
    pub source_name: String,
    pub chunk_index: usize,
    pub distance: f32,
}

impl From<&ScoredChunk> for ChunkRef {
    fn from(sc: &ScoredChunk) -> Self {
        Self { id: sc.chunk.id, source_name: sc.chunk.source_name.clone(), chunk_index: sc.chunk.chunk_index, distance: sc.distance }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    /// Context holds at least one chunk.
    Answered,
    /// Nothing usable was found; `context_text` is empty.
    NoRelevantInformation,
    /// The most relevant chunk alone is over budget; `context_text` is empty.
    BudgetExceeded { chunk_id: ChunkId, tokens: usize, budget: usize },
    /// The query was a reset request; the session is now empty.
    Reset,
}

#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub status: TurnStatus,
    pub context_text: String,
    pub used_chunks: Vec<ChunkRef>,
    pub session: SessionState,
    pub origin: Option<ContextOrigin>,
    pub classification: Classification,
    pub requested_k: usize,
    /// Messages to send to the language model; empty for a reset.
    pub prompt: PromptWindow,
    pub input_tokens: usize,
}

/// A failed turn. The session comes back exactly as it was passed in.
#[derive(Debug, thiserror::Error)]
#[error("{source}")]
pub struct TurnError {
    pub session: SessionState,
    #[source]
    pub source: Error,
}

pub struct ContextPipeline<I, S> where I: VectorSearch, S: CorpusStore {
    retrieval: RetrievalEngine<I, S>,
    counter: Box<dyn TokenCounter>,
    classifier: QueryClassifier,
    assembler: AssemblerSettings,
    session: SessionSettings,
}

impl<I, S> ContextPipeline<I, S> where I: VectorSearch, S: CorpusStore {
    pub fn new(index: I, store: S, counter: Box<dyn TokenCounter>, settings: &Settings) -> Self {
        Self {
            retrieval: RetrievalEngine::new(index, store, settings.retrieval.clone()),
            counter,
            classifier: QueryClassifier::new(&settings.session),
            assembler: settings.assembler.clone(),
            session: settings.session.clone(),
        }
    }

    pub fn retrieval(&self) -> &RetrievalEngine<I, S> { &self.retrieval }

    pub fn classifier(&self) -> &QueryClassifier { &self.classifier }

    pub fn default_token_budget(&self) -> usize { self.assembler.token_budget }

    fn stored_turns(&self) -> usize { self.session.max_stored_turns.max(self.session.history_window).max(1) }

    /// Runs one user turn.
    ///
    /// `query_vector` is the embedding of `query_text`; `None` means the turn
    /// carries no new retrieval signal and only session context can answer it.
    /// Failures leave the session untouched and hand it back in `TurnError`.
    pub fn retrieve_and_assemble(
        &self,
        query_text: &str,
        query_vector: Option<&[f32]>,
        token_budget: usize,
        session: SessionState,
    ) -> Result<TurnOutcome, TurnError> {
        let classification = self.classifier.classify(query_text);
        if classification.category == QueryCategory::Reset {
            let session = self.reset_session(session);
            return Ok(TurnOutcome {
                status: TurnStatus::Reset,
                context_text: String::new(),
                used_chunks: Vec::new(),
                session,
                origin: None,
                classification,
                requested_k: 0,
                prompt: PromptWindow::default(),
                input_tokens: 0,
            });
        }
        if query_text.trim().is_empty() {
            return Err(TurnError { session, source: Error::InvalidArgument("query cannot be empty".into()) });
        }

        let requested_k = self.retrieval.requested_k(query_text);
        let fresh = match query_vector {
            Some(v) => match self.retrieval.retrieve(v, requested_k) {
                Ok(found) => found,
                Err(source) => return Err(TurnError { session, source }),
            },
            None => Vec::new(),
        };
        let groups = group_by_document(&fresh);

        let assembler = ContextAssembler::new(self.counter.as_ref(), &self.assembler);
        let (origin, assembled) = assembler.assemble_with_fallback(&groups, token_budget, session.accumulated_chunks());
        let (status, context_text, used) = match assembled {
            Ok(ctx) if ctx.is_empty() => (TurnStatus::NoRelevantInformation, String::new(), Vec::new()),
            Ok(ctx) => (TurnStatus::Answered, ctx.text, ctx.used),
            Err(Error::BudgetExceededImmediately { chunk_id, tokens, budget }) => {
                warn!(chunk_id, tokens, budget, "top chunk exceeds the token budget");
                (TurnStatus::BudgetExceeded { chunk_id, tokens, budget }, String::new(), Vec::new())
            }
            Err(source) => return Err(TurnError { session, source }),
        };

        let mut session = session;
        session.activate();
        let added = session.merge_chunks(&relevance_order(&groups));
        let prompt = PromptWindow::build(
            &self.session.system_prompt,
            session.history(),
            self.session.history_window,
            query_text,
            &context_text,
        );
        let input_tokens = prompt.token_count(self.counter.as_ref());
        session.push_turn(ChatTurn::user(query_text), self.stored_turns());
        session.record_input(input_tokens);

        info!(
            requested_k,
            retrieved = fresh.len(),
            groups = groups.len(),
            used = used.len(),
            added,
            accumulated = session.accumulated_chunks().len(),
            ?origin,
            ?status,
            input_tokens,
            "turn assembled"
        );
        Ok(TurnOutcome {
            status,
            context_text,
            used_chunks: used.iter().map(ChunkRef::from).collect(),
            session,
            origin: Some(origin),
            classification,
            requested_k,
            prompt,
            input_tokens,
        })
    }

    /// Embeds `query_text` with `embedder`, then runs the turn.
    ///
    /// An embedding failure ends the turn with no context at all; the session
    /// comes back untouched in the `TurnError`. Reset requests and blank
    /// queries never reach the embedder.
    pub fn answer(
        &self,
        query_text: &str,
        embedder: &dyn Embedder,
        token_budget: usize,
        session: SessionState,
    ) -> Result<TurnOutcome, TurnError> {
        if query_text.trim().is_empty() || self.classifier.classify(query_text).category == QueryCategory::Reset {
            return self.retrieve_and_assemble(query_text, None, token_budget, session);
        }
        match embedder.embed(query_text) {
            Ok(vector) => self.retrieve_and_assemble(query_text, Some(&vector), token_budget, session),
            Err(source) => {
                warn!(error = %source, "query embedding failed");
                Err(TurnError { session, source })
            }
        }
    }

    /// Drops history, accumulated chunks and usage.
    pub fn reset_session(&self, session: SessionState) -> SessionState {
        info!(turns = session.turns(), chunks = session.accumulated_chunks().len(), "session reset");
        session.reset()
    }

    /// Appends the model's reply to history and counts its tokens as output.
    pub fn record_completion(&self, session: SessionState, reply: &str) -> SessionState {
        let mut session = session;
        session.record_output(self.counter.count(reply));
        session.push_turn(ChatTurn::assistant(reply), self.stored_turns());
        session
    }

    pub fn usage_report(&self, session: &SessionState) -> UsageReport {
        session.usage_report(self.session.input_cost_per_1k, self.session.output_cost_per_1k)
    }
}
