//! Resumable embedding backfill.
//!
//! Selection is null-vector driven: every live row without a vector is
//! embedded in batches and written back with `merge_insert` on `id`. A batch
//! whose provider call fails is left null and retried on the next run.
use std::sync::Arc;

use arrow_array::types::Float32Type;
use arrow_array::{FixedSizeListArray, Int64Array, RecordBatch, RecordBatchIterator};
use tracing::{info, warn};

use chunkctx_core::error::{Error, Result};
use chunkctx_core::traits::{CorpusStore, Embedder};
use chunkctx_core::types::ChunkId;

use crate::schema::build_vector_update_schema;
use crate::table::{storage, LanceCorpus};
use crate::writer::{is_provider_failure, progress_bar};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackfillReport {
	pub embedded: usize,
	pub failed: usize,
}

impl LanceCorpus {
	pub fn backfill_embeddings(&self, embedder: &dyn Embedder, batch_size: usize, limit_rows: Option<usize>) -> Result<BackfillReport> {
		if embedder.dim() != self.dim {
			return Err(Error::DimensionMismatch { expected: self.dim, actual: embedder.dim(), chunk_id: None });
		}
		let mut pending = self.pending_ids()?;
		if let Some(lim) = limit_rows {
			pending.truncate(lim);
		}
		let mut report = BackfillReport::default();
		if pending.is_empty() {
			return Ok(report);
		}
		info!(rows = pending.len(), "backfilling embeddings");

		let pb = progress_bar(pending.len(), "rows");
		for ids in pending.chunks(batch_size.max(1)) {
			let mut rows: Vec<(ChunkId, String)> = Vec::with_capacity(ids.len());
			for &id in ids {
				// Rows deleted since the scan simply drop out.
				if let Some(chunk) = self.get_chunk(id)? {
					rows.push((id, chunk.text));
				}
			}
			let texts: Vec<String> = rows.iter().map(|(_, t)| t.clone()).collect();
			match embedder.embed_batch(&texts) {
				Ok(vectors) => {
					let row_ids: Vec<ChunkId> = rows.iter().map(|(id, _)| *id).collect();
					self.write_vectors(&row_ids, vectors)?;
					report.embedded += rows.len();
				}
				Err(e) if is_provider_failure(&e) => {
					warn!(error = %e, rows = rows.len(), "embedding batch failed; left for next run");
					report.failed += rows.len();
				}
				Err(e) => return Err(e),
			}
			pb.inc(ids.len() as u64);
		}
		pb.finish_and_clear();
		info!(embedded = report.embedded, failed = report.failed, "backfill finished");
		Ok(report)
	}

	fn write_vectors(&self, ids: &[ChunkId], vectors: Vec<Vec<f32>>) -> Result<()> {
		if ids.is_empty() {
			return Ok(());
		}
		if vectors.len() != ids.len() {
			return Err(Error::InvalidArgument(format!("{} vectors for {} rows", vectors.len(), ids.len())));
		}
		let mut vecs: Vec<Option<Vec<Option<f32>>>> = Vec::with_capacity(vectors.len());
		for (id, v) in ids.iter().zip(vectors) {
			if v.len() != self.dim {
				return Err(Error::DimensionMismatch { expected: self.dim, actual: v.len(), chunk_id: Some(*id) });
			}
			vecs.push(Some(v.into_iter().map(Some).collect()));
		}
		let schema = build_vector_update_schema(self.dim);
		let rb = RecordBatch::try_new(
			schema.clone(),
			vec![
				Arc::new(Int64Array::from(ids.to_vec())),
				Arc::new(FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(vecs.into_iter(), self.dim as i32)),
			],
		)
		.map_err(storage)?;
		let reader = Box::new(RecordBatchIterator::new(vec![Ok(rb)].into_iter(), schema));
		self.rt.block_on(async {
			let t = self.table().await?;
			// Update existing rows by id; unmatched ids are not inserted.
			let mut mi = t.merge_insert(&["id"]);
			mi.when_matched_update_all(None);
			mi.execute(reader).await.map_err(storage)?;
			Ok(())
		})
	}
}
