use arrow_schema::{DataType, Field, Schema};
use std::sync::Arc;

pub const CHUNKS_TABLE: &str = "chunks";

/// Row layout of the persisted chunk table. `ordinal` preserves insertion
/// order, which breaks similarity ties on the query path.
pub fn build_chunk_schema(dim: usize) -> Arc<Schema> {
	Arc::new(Schema::new(vec![
		Field::new("ordinal", DataType::Int32, false),
		Field::new("id", DataType::Utf8, false),
		Field::new("document_id", DataType::Utf8, false),
		Field::new("source_url", DataType::Utf8, false),
		Field::new("text", DataType::Utf8, false),
		Field::new("start_offset", DataType::Int64, false),
		Field::new("end_offset", DataType::Int64, false),
		Field::new("vector", DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), dim as i32), true),
	]))
}
