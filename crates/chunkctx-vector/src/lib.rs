//! chunkctx-vector
//!
//! IVF-flat vector index over chunk embeddings (k-means coarse quantizer,
//! inverted lists keyed by chunk id, persisted with a load-or-rebuild policy)
//! and the LanceDB-backed corpus store it is built from.
pub mod distance;
pub mod embed_backfill;
pub mod index;
pub mod index_build;
pub mod index_file;
pub mod kmeans;
pub mod schema;
pub mod table;
pub mod writer;

use chunkctx_core::config::{expand_path, Settings};
use chunkctx_core::error::Result;
use chunkctx_core::traits::CorpusStore;

pub use embed_backfill::BackfillReport;
pub use index::{fingerprint_ids, VectorIndex, NO_MATCH};
pub use index_build::{build, build_from_store, IvfParams};
pub use index_file::{load_or_build, IndexSource, RebuildReason};
pub use table::LanceCorpus;
pub use writer::IngestReport;

/// Loads the configured index file, rebuilding it from `store` when needed.
pub fn open_index(settings: &Settings, store: &dyn CorpusStore) -> Result<(VectorIndex, IndexSource)> {
    let path = expand_path(&settings.index.path);
    load_or_build(&path, store, &IvfParams::from_settings(&settings.index))
}
