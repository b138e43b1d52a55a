use arrow_schema::{DataType, Field, Schema, TimeUnit};
use std::sync::Arc;

/// Row layout of the chunk table; `vector` is null until the row is embedded.
pub fn build_chunk_schema(dim: usize) -> Arc<Schema> {
	Arc::new(Schema::new(vec![
		Field::new("id", DataType::Int64, false),
		Field::new("source_name", DataType::Utf8, false),
		Field::new("chunk_index", DataType::Int32, false),
		Field::new("text", DataType::Utf8, false),
		Field::new("token_count", DataType::Int32, false),
		Field::new("content_hash", DataType::Utf8, false),
		Field::new("is_deleted", DataType::Boolean, false),
		Field::new("created_at", DataType::Timestamp(TimeUnit::Millisecond, None), false),
		vector_field(dim),
	]))
}

/// `(id, vector)` projection used to write embeddings back onto existing rows.
pub fn build_vector_update_schema(dim: usize) -> Arc<Schema> {
	Arc::new(Schema::new(vec![Field::new("id", DataType::Int64, false), vector_field(dim)]))
}

fn vector_field(dim: usize) -> Field {
	Field::new("vector", DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), dim as i32), true)
}
