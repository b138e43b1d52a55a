//! chunkctx-context
//!
//! Turns a query embedding into a token-budgeted, session-aware context:
//! retrieval over the vector index, grouping by source document, greedy
//! assembly under a token budget, and the per-conversation `SessionState`.
pub mod assembler;
pub mod classify;
pub mod grouping;
pub mod pipeline;
pub mod prompt;
pub mod retrieval;
pub mod session;

pub use assembler::{AssembledContext, ContextAssembler, ContextOrigin};
pub use classify::{Classification, QueryCategory, QueryClassifier};
pub use grouping::{flatten, group_by_document, relevance_order};
pub use pipeline::{ChunkRef, ContextPipeline, TurnError, TurnOutcome, TurnStatus};
pub use prompt::PromptWindow;
pub use retrieval::{extract_top_k, RetrievalEngine};
pub use session::{SessionPhase, SessionState, TokenUsage, UsageReport};
