//! LanceDB-backed corpus store.
//!
//! `LanceCorpus` owns a Tokio runtime and exposes a blocking API, so the
//! synchronous retrieval path can call it through `CorpusStore`. Soft-deleted
//! rows (`is_deleted = true`) are invisible to every read.
use std::path::Path;
use std::sync::Arc;

use arrow_array::cast::AsArray;
use arrow_array::types::{Float32Type, Int32Type, Int64Type};
use arrow_array::{Array, RecordBatch, RecordBatchIterator};
use arrow_schema::Schema;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase, Select};
use lancedb::{connect, Connection, Table};
use tokio::runtime::Runtime;
use tracing::{debug, info};

use chunkctx_core::config::{expand_path, Settings};
use chunkctx_core::error::{Error, Result};
use chunkctx_core::traits::CorpusStore;
use chunkctx_core::types::{Chunk, ChunkId};

use crate::schema::build_chunk_schema;

pub(crate) const LIVE: &str = "is_deleted = false";

pub(crate) fn storage<E: std::fmt::Display>(e: E) -> Error {
	Error::Storage(e.to_string())
}

pub struct LanceCorpus {
	pub(crate) rt: Runtime,
	pub(crate) conn: Connection,
	pub(crate) table_name: String,
	pub(crate) dim: usize,
}

impl LanceCorpus {
	/// Opens (creating if needed) the chunk table at `uri`.
	pub fn open(uri: &str, table_name: &str, dim: usize) -> Result<Self> {
		if dim == 0 {
			return Err(Error::InvalidArgument("embedding dimension must be at least 1".into()));
		}
		let rt = Runtime::new()?;
		let conn = rt.block_on(async { connect(uri).execute().await }).map_err(storage)?;
		let corpus = Self { rt, conn, table_name: table_name.to_string(), dim };
		corpus.rt.block_on(ensure_table(&corpus.conn, table_name, build_chunk_schema(dim)))?;
		info!(uri, table = table_name, dim, "corpus table ready");
		Ok(corpus)
	}

	pub fn from_settings(settings: &Settings) -> Result<Self> {
		let dir = expand_path(&settings.corpus.lancedb_dir);
		Self::open_dir(&dir, &settings.corpus.table, settings.embedding.dimension)
	}

	pub fn open_dir(dir: &Path, table_name: &str, dim: usize) -> Result<Self> {
		std::fs::create_dir_all(dir)?;
		Self::open(dir.to_string_lossy().as_ref(), table_name, dim)
	}

	pub fn dim(&self) -> usize { self.dim }

	pub fn table_name(&self) -> &str { &self.table_name }

	pub(crate) async fn table(&self) -> Result<Table> {
		self.conn.open_table(&self.table_name).execute().await.map_err(storage)
	}

	/// Live rows, embedded or not.
	pub fn count_live(&self) -> Result<usize> {
		self.rt.block_on(async { self.table().await?.count_rows(Some(LIVE.to_string())).await.map_err(storage) })
	}

	/// Live rows that carry a vector.
	pub fn count_embedded(&self) -> Result<usize> {
		Ok(self.list_embedded_ids()?.len())
	}

	/// Hides rows from every read; returns how many live rows were affected.
	pub fn soft_delete(&self, ids: &[ChunkId]) -> Result<usize> {
		if ids.is_empty() {
			return Ok(0);
		}
		let list = ids.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(",");
		let filter = format!("id IN ({list}) AND {LIVE}");
		self.rt.block_on(async {
			let t = self.table().await?;
			let affected = t.count_rows(Some(filter.clone())).await.map_err(storage)?;
			if affected > 0 {
				t.update().only_if(filter).column("is_deleted", "true").execute().await.map_err(storage)?;
			}
			info!(affected, "chunks soft-deleted");
			Ok(affected)
		})
	}

	pub(crate) async fn query_chunks(&self, filter: String, limit: Option<usize>) -> Result<Vec<Chunk>> {
		let t = self.table().await?;
		let mut q = t.query().only_if(filter);
		if let Some(n) = limit {
			q = q.limit(n);
		}
		let mut stream = q.execute().await.map_err(storage)?;
		let mut out = Vec::new();
		while let Some(batch) = stream.try_next().await.map_err(storage)? {
			out.extend(chunks_from_batch(&batch)?);
		}
		Ok(out)
	}

	pub(crate) async fn scan_ids_and_vectors(&self, filter: &str) -> Result<Vec<(ChunkId, Option<Vec<f32>>)>> {
		let t = self.table().await?;
		let mut stream = t
			.query()
			.only_if(filter)
			.select(Select::columns(&["id", "vector"]))
			.execute()
			.await
			.map_err(storage)?;
		let mut out = Vec::new();
		while let Some(batch) = stream.try_next().await.map_err(storage)? {
			let ids = column(&batch, "id")?.as_primitive_opt::<Int64Type>().ok_or_else(|| bad_column("id"))?;
			let vectors = column(&batch, "vector")?.as_fixed_size_list_opt().ok_or_else(|| bad_column("vector"))?;
			for i in 0..batch.num_rows() {
				let v = vectors.is_valid(i).then(|| vectors.value(i).as_primitive::<Float32Type>().values().to_vec());
				out.push((ids.value(i), v));
			}
		}
		Ok(out)
	}
}

impl CorpusStore for LanceCorpus {
	fn get_chunk(&self, id: ChunkId) -> Result<Option<Chunk>> {
		let rows = self.rt.block_on(self.query_chunks(format!("id = {id} AND {LIVE}"), Some(1)))?;
		Ok(rows.into_iter().next())
	}

	fn list_chunks_for(&self, source_name: &str) -> Result<Vec<Chunk>> {
		let filter = format!("source_name = '{}' AND {LIVE}", source_name.replace('\'', "''"));
		let mut rows = self.rt.block_on(self.query_chunks(filter, None))?;
		rows.sort_by_key(|c| (c.chunk_index, c.id));
		Ok(rows)
	}

	fn list_all_embedded_chunks(&self) -> Result<Vec<(ChunkId, Vec<f32>)>> {
		let rows = self.rt.block_on(self.scan_ids_and_vectors(LIVE))?;
		let mut out: Vec<(ChunkId, Vec<f32>)> = rows.into_iter().filter_map(|(id, v)| v.map(|v| (id, v))).collect();
		out.sort_by_key(|(id, _)| *id);
		debug!(rows = out.len(), "embedded chunks listed");
		Ok(out)
	}
}

pub(crate) async fn ensure_table(conn: &Connection, name: &str, schema: Arc<Schema>) -> Result<()> {
	let names = conn.table_names().execute().await.map_err(storage)?;
	if names.iter().any(|n| n == name) {
		return Ok(());
	}
	// create empty table with 0 rows
	let iter = RecordBatchIterator::new(vec![].into_iter(), schema.clone());
	conn.create_table(name, Box::new(iter)).execute().await.map_err(storage)?;
	Ok(())
}

fn column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a Arc<dyn Array>> {
	batch.column_by_name(name).ok_or_else(|| Error::Storage(format!("column '{name}' missing")))
}

fn bad_column(name: &str) -> Error {
	Error::Storage(format!("column '{name}' has an unexpected type"))
}

fn chunks_from_batch(batch: &RecordBatch) -> Result<Vec<Chunk>> {
	let ids = column(batch, "id")?.as_primitive_opt::<Int64Type>().ok_or_else(|| bad_column("id"))?;
	let sources = column(batch, "source_name")?.as_string_opt::<i32>().ok_or_else(|| bad_column("source_name"))?;
	let indices = column(batch, "chunk_index")?.as_primitive_opt::<Int32Type>().ok_or_else(|| bad_column("chunk_index"))?;
	let texts = column(batch, "text")?.as_string_opt::<i32>().ok_or_else(|| bad_column("text"))?;
	let tokens = column(batch, "token_count")?.as_primitive_opt::<Int32Type>().ok_or_else(|| bad_column("token_count"))?;
	let vectors = column(batch, "vector")?.as_fixed_size_list_opt().ok_or_else(|| bad_column("vector"))?;
	let mut out = Vec::with_capacity(batch.num_rows());
	for i in 0..batch.num_rows() {
		let embedding = vectors.is_valid(i).then(|| vectors.value(i).as_primitive::<Float32Type>().values().to_vec());
		out.push(Chunk {
			id: ids.value(i),
			source_name: sources.value(i).to_string(),
			chunk_index: indices.value(i).max(0) as usize,
			text: texts.value(i).to_string(),
			embedding,
			token_count: tokens.value(i).max(0) as usize,
		});
	}
	Ok(out)
}
