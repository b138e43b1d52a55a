use thiserror::Error;

use crate::types::ChunkId;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Dimension mismatch: expected {expected}, got {actual}{}", chunk_suffix(.chunk_id))]
    DimensionMismatch { expected: usize, actual: usize, chunk_id: Option<ChunkId> },

    #[error("Cannot build an index over an empty corpus")]
    EmptyCorpus,

    #[error("Index neighbor {0} has no live chunk")]
    UnresolvedMatch(ChunkId),

    #[error("Chunk {chunk_id} needs {tokens} tokens but the budget is {budget}")]
    BudgetExceededImmediately { chunk_id: ChunkId, tokens: usize, budget: usize },

    #[error("Transient provider error: {0}")]
    TransientProvider(String),

    #[error("Provider failed after {attempts} attempt(s): {message}")]
    ProviderFailed { attempts: u32, message: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Corrupt index file: {0}")]
    CorruptIndex(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn chunk_suffix(chunk_id: &Option<ChunkId>) -> String {
    chunk_id.map(|id| format!(" (chunk {id})")).unwrap_or_default()
}

impl Error {
    /// Whether a retry of the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::TransientProvider(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
