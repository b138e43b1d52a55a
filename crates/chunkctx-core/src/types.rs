//! Domain types shared by the index, retrieval and session layers.

use serde::{Deserialize, Serialize};

/// Stable corpus row id. Signed so the index can use `-1` as its
/// "no match" sentinel without a separate option type.
pub type ChunkId = i64;

/// A stored unit of document text.
///
/// - `id`: corpus row id, never reused
/// - `source_name`: source document; chunks with the same name form a document
/// - `chunk_index`: position within the source, used for passage reconstruction
/// - `embedding`: `None` while the row has not been embedded yet
/// - `token_count`: measured when the chunk was produced, may be recomputed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub source_name: String,
    pub chunk_index: usize,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub token_count: usize,
}

impl Chunk {
    /// Drops the embedding; used where only text and position are kept around.
    pub fn without_embedding(mut self) -> Self {
        self.embedding = None;
        self
    }
}

/// A chunk that has not been assigned a corpus id yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewChunk {
    pub source_name: String,
    pub chunk_index: usize,
    pub text: String,
    pub token_count: usize,
}

/// A chunk plus its squared Euclidean distance to one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub distance: f32,
}

/// All scored chunks of one source document for one query.
///
/// `chunks` is in `chunk_index` order; `best_score` is the smallest distance
/// among them and drives the cross-document ordering.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentGroup {
    pub source_name: String,
    pub best_score: f32,
    pub chunks: Vec<ScoredChunk>,
}

/// One index hit: the chunk id the vector was registered under and its distance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    pub id: ChunkId,
    pub distance: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A single role-tagged conversation message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }
}
