//! Chunk ingestion into the LanceDB corpus table.
//!
//! Ids are assigned after the current maximum, content already present (same
//! blake3 hash among live rows) is skipped, and rows whose embedding batch
//! failed are written with a null vector for `backfill_embeddings` to finish.
use std::collections::HashSet;
use std::sync::Arc;

use arrow_array::cast::AsArray;
use arrow_array::types::{Float32Type, Int64Type};
use arrow_array::{
	BooleanArray, FixedSizeListArray, Int32Array, Int64Array, RecordBatch, RecordBatchIterator, StringArray,
	TimestampMillisecondArray,
};
use chrono::Utc;
use futures::TryStreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use lancedb::query::{ExecutableQuery, QueryBase, Select};
use tracing::{info, warn};

use chunkctx_core::error::{Error, Result};
use chunkctx_core::traits::Embedder;
use chunkctx_core::types::{ChunkId, NewChunk};

use crate::schema::build_chunk_schema;
use crate::table::{storage, LanceCorpus, LIVE};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
	pub inserted: usize,
	pub duplicates: usize,
	/// Inserted without a vector because the embedding call failed.
	pub pending_embedding: usize,
	pub ids: Vec<ChunkId>,
}

pub(crate) fn hash_content(s: &str) -> String {
	blake3::hash(s.as_bytes()).to_hex().to_string()
}

pub(crate) fn progress_bar(len: usize, unit: &str) -> ProgressBar {
	let pb = ProgressBar::new(len as u64);
	let template = format!("{{spinner:.green}} [{{elapsed_precise}}] [{{bar:40.cyan/blue}}] {{pos}}/{{len}} {unit} ({{percent}}%) {{msg}}");
	pb.set_style(
		ProgressStyle::default_bar()
			.template(&template)
			.unwrap_or_else(|_| ProgressStyle::default_bar())
			.progress_chars("#>-"),
	);
	pb
}

/// Whether a failed embedding batch should leave rows for backfill instead of aborting.
pub(crate) fn is_provider_failure(e: &Error) -> bool {
	matches!(e, Error::ProviderFailed { .. } | Error::TransientProvider(_))
}

impl LanceCorpus {
	/// Inserts `chunks`, embedding them with `embedder` when one is given.
	pub fn insert_chunks(&self, chunks: &[NewChunk], embedder: Option<&dyn Embedder>, batch_size: usize) -> Result<IngestReport> {
		if let Some(e) = embedder {
			if e.dim() != self.dim {
				return Err(Error::DimensionMismatch { expected: self.dim, actual: e.dim(), chunk_id: None });
			}
		}
		self.rt.block_on(self.insert_chunks_async(chunks, embedder, batch_size.max(1)))
	}

	async fn insert_chunks_async(&self, chunks: &[NewChunk], embedder: Option<&dyn Embedder>, batch_size: usize) -> Result<IngestReport> {
		let mut report = IngestReport::default();
		if chunks.is_empty() {
			return Ok(report);
		}
		let (max_id, mut seen) = self.existing_state().await?;
		let mut next_id = max_id.map_or(1, |m| m + 1);

		let mut fresh: Vec<(ChunkId, &NewChunk, String)> = Vec::new();
		for chunk in chunks {
			let hash = hash_content(&chunk.text);
			if !seen.insert(hash.clone()) {
				report.duplicates += 1;
				continue;
			}
			fresh.push((next_id, chunk, hash));
			next_id += 1;
		}
		info!(table = %self.table_name, new = fresh.len(), duplicates = report.duplicates, "ingesting chunks");

		let table = self.table().await?;
		let pb = progress_bar(fresh.len(), "chunks");
		for batch in fresh.chunks(batch_size) {
			let vectors = match embedder {
				Some(e) => {
					let texts: Vec<String> = batch.iter().map(|(_, c, _)| c.text.clone()).collect();
					match e.embed_batch(&texts) {
						Ok(v) => v.into_iter().map(Some).collect(),
						Err(err) if is_provider_failure(&err) => {
							warn!(error = %err, rows = batch.len(), "embedding failed; rows left for backfill");
							vec![None; batch.len()]
						}
						Err(err) => return Err(err),
					}
				}
				None => vec![None; batch.len()],
			};
			report.pending_embedding += vectors.iter().filter(|v| v.is_none()).count();
			let rb = self.rows_to_record_batch(batch, vectors)?;
			let schema = rb.schema();
			let reader = Box::new(RecordBatchIterator::new(vec![Ok(rb)].into_iter(), schema));
			table.add(reader).execute().await.map_err(storage)?;
			report.inserted += batch.len();
			report.ids.extend(batch.iter().map(|(id, _, _)| *id));
			pb.inc(batch.len() as u64);
		}
		pb.finish_and_clear();
		info!(inserted = report.inserted, pending_embedding = report.pending_embedding, "ingest finished");
		Ok(report)
	}

	/// Highest id ever assigned (deleted rows included) and live content hashes.
	async fn existing_state(&self) -> Result<(Option<ChunkId>, HashSet<String>)> {
		let t = self.table().await?;
		let mut stream = t
			.query()
			.select(Select::columns(&["id", "content_hash", "is_deleted"]))
			.execute()
			.await
			.map_err(storage)?;
		let mut max_id: Option<ChunkId> = None;
		let mut hashes = HashSet::new();
		while let Some(batch) = stream.try_next().await.map_err(storage)? {
			let ids = batch.column_by_name("id").and_then(|c| c.as_primitive_opt::<Int64Type>()).ok_or_else(|| Error::Storage("id column".into()))?;
			let hs = batch.column_by_name("content_hash").and_then(|c| c.as_string_opt::<i32>()).ok_or_else(|| Error::Storage("content_hash column".into()))?;
			let deleted = batch.column_by_name("is_deleted").and_then(|c| c.as_boolean_opt()).ok_or_else(|| Error::Storage("is_deleted column".into()))?;
			for i in 0..batch.num_rows() {
				max_id = Some(max_id.map_or(ids.value(i), |m| m.max(ids.value(i))));
				if !deleted.value(i) {
					hashes.insert(hs.value(i).to_string());
				}
			}
		}
		Ok((max_id, hashes))
	}

	fn rows_to_record_batch(&self, rows: &[(ChunkId, &NewChunk, String)], vectors: Vec<Option<Vec<f32>>>) -> Result<RecordBatch> {
		let n = rows.len();
		if vectors.len() != n {
			return Err(Error::InvalidArgument(format!("{} vectors for {} rows", vectors.len(), n)));
		}
		let schema = build_chunk_schema(self.dim);
		let now = Utc::now().timestamp_millis();
		let mut ids = Vec::with_capacity(n);
		let mut sources = Vec::with_capacity(n);
		let mut indices = Vec::with_capacity(n);
		let mut texts = Vec::with_capacity(n);
		let mut tokens = Vec::with_capacity(n);
		let mut hashes = Vec::with_capacity(n);
		let mut vecs: Vec<Option<Vec<Option<f32>>>> = Vec::with_capacity(n);
		for ((id, chunk, hash), vector) in rows.iter().zip(vectors) {
			if let Some(v) = &vector {
				if v.len() != self.dim {
					return Err(Error::DimensionMismatch { expected: self.dim, actual: v.len(), chunk_id: Some(*id) });
				}
			}
			ids.push(*id);
			sources.push(chunk.source_name.clone());
			indices.push(chunk.chunk_index as i32);
			texts.push(chunk.text.clone());
			tokens.push(chunk.token_count as i32);
			hashes.push(hash.clone());
			vecs.push(vector.map(|v| v.into_iter().map(Some).collect()));
		}
		RecordBatch::try_new(schema, vec![
			Arc::new(Int64Array::from(ids)),
			Arc::new(StringArray::from(sources)),
			Arc::new(Int32Array::from(indices)),
			Arc::new(StringArray::from(texts)),
			Arc::new(Int32Array::from(tokens)),
			Arc::new(StringArray::from(hashes)),
			Arc::new(BooleanArray::from(vec![false; n])),
			Arc::new(TimestampMillisecondArray::from(vec![now; n])),
			Arc::new(FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(vecs.into_iter(), self.dim as i32)),
		])
		.map_err(storage)
	}

	/// Ids of live rows that still have no vector.
	pub fn pending_ids(&self) -> Result<Vec<ChunkId>> {
		let rows = self.rt.block_on(self.scan_ids_and_vectors(LIVE))?;
		let mut ids: Vec<ChunkId> = rows.into_iter().filter(|(_, v)| v.is_none()).map(|(id, _)| id).collect();
		ids.sort_unstable();
		Ok(ids)
	}
}
