//! Durable index generations under one root directory.
//!
//! Layout: `<root>/gen-*/{manifest.json, chunks.lance}` plus `<root>/CURRENT`
//! naming the published generation. A save writes a staging directory,
//! renames it to a fresh generation and only then swaps `CURRENT`, so
//! readers never see a partially written index.

use arrow_array::cast::AsArray;
use arrow_array::types::Float32Type;
use arrow_array::{Array, FixedSizeListArray, Int32Array, Int64Array, RecordBatch, RecordBatchIterator, StringArray};
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use lancedb::connect;
use lancedb::query::{ExecutableQuery, QueryBase};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use newsrag_core::types::Chunk;
use newsrag_core::{Error, Result};

use crate::index::{IndexEntry, IndexHandle, VectorIndex};
use crate::schema::{build_chunk_schema, CHUNKS_TABLE};

pub const FORMAT_VERSION: u32 = 1;
const CURRENT_FILE: &str = "CURRENT";
const MANIFEST_FILE: &str = "manifest.json";
const GENERATION_PREFIX: &str = "gen-";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexManifest {
    pub format_version: u32,
    pub embedder_id: String,
    pub dimension: usize,
    pub entries: usize,
    pub sources: Vec<String>,
    pub built_at: DateTime<Utc>,
}

pub struct IndexStore {
    root: PathBuf,
    keep_generations: usize,
    writer: Mutex<()>,
}

impl IndexStore {
    pub fn new(root: impl Into<PathBuf>, keep_generations: usize) -> Self {
        Self { root: root.into(), keep_generations: keep_generations.max(1), writer: Mutex::new(()) }
    }

    pub fn root(&self) -> &Path { &self.root }

    /// Persist `index` as a new generation and publish it.
    pub async fn save(&self, index: VectorIndex) -> Result<IndexHandle> {
        let _guard = self.writer.lock().await;
        std::fs::create_dir_all(&self.root).map_err(storage)?;
        let staging = tempfile::Builder::new().prefix(".staging-").tempdir_in(&self.root).map_err(storage)?;

        write_table(staging.path(), &index).await?;
        let manifest = IndexManifest {
            format_version: FORMAT_VERSION,
            embedder_id: index.embedder_id().to_string(),
            dimension: index.dim(),
            entries: index.len(),
            sources: index.sources(),
            built_at: Utc::now(),
        };
        let manifest_json = serde_json::to_vec_pretty(&manifest).map_err(storage)?;
        std::fs::write(staging.path().join(MANIFEST_FILE), manifest_json).map_err(storage)?;

        let generation = self.fresh_generation_name();
        let generation_dir = self.root.join(&generation);
        std::fs::rename(staging.path(), &generation_dir).map_err(storage)?;
        self.publish(&generation)?;
        info!(generation = %generation, entries = manifest.entries, root = %self.root.display(), "index generation published");

        self.prune(&generation);
        Ok(IndexHandle::new(generation, index))
    }

    /// Generation named by `CURRENT`, or `None` before the first save.
    pub fn current_generation(&self) -> Result<Option<String>> {
        let pointer = self.root.join(CURRENT_FILE);
        match std::fs::read_to_string(&pointer) {
            Ok(raw) => {
                let generation = raw.trim().to_string();
                if !is_generation_name(&generation) {
                    return Err(Error::index_load(&pointer, format!("invalid generation pointer {:?}", generation)));
                }
                Ok(Some(generation))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::index_load(&pointer, e.to_string())),
        }
    }

    pub fn manifest(&self, generation: &str) -> Result<IndexManifest> {
        let path = self.root.join(generation).join(MANIFEST_FILE);
        let raw = std::fs::read(&path).map_err(|e| Error::index_load(&path, e.to_string()))?;
        serde_json::from_slice(&raw).map_err(|e| Error::index_load(&path, format!("corrupt manifest: {e}")))
    }

    /// Load the published generation, verifying it was built by the
    /// expected embedder.
    pub async fn load(&self, embedder_id: &str, dim: usize) -> Result<IndexHandle> {
        let generation = self.current_generation()?.ok_or(Error::NoKnowledgeBase)?;
        self.load_generation(&generation, embedder_id, dim).await
    }

    pub async fn load_generation(&self, generation: &str, embedder_id: &str, dim: usize) -> Result<IndexHandle> {
        let dir = self.root.join(generation);
        let manifest = self.manifest(generation)?;
        if manifest.format_version != FORMAT_VERSION {
            return Err(Error::index_load(&dir, format!(
                "format version {} is not supported (expected {})", manifest.format_version, FORMAT_VERSION
            )));
        }
        if manifest.embedder_id != embedder_id {
            return Err(Error::index_load(&dir, format!(
                "index was built with embedder '{}' but '{}' is configured", manifest.embedder_id, embedder_id
            )));
        }
        if manifest.dimension != dim {
            return Err(Error::index_load(&dir, format!(
                "index dimension {} does not match embedder dimension {}", manifest.dimension, dim
            )));
        }

        let entries = read_table(&dir, &manifest).await.map_err(|reason| Error::index_load(&dir, reason))?;
        let index = VectorIndex::from_entries(&manifest.embedder_id, manifest.dimension, entries)
            .map_err(|e| Error::index_load(&dir, e.to_string()))?;
        debug!(generation, entries = index.len(), "index generation loaded");
        Ok(IndexHandle::new(generation, index))
    }

    fn fresh_generation_name(&self) -> String {
        let millis = Utc::now().timestamp_millis();
        let mut n = 0u32;
        loop {
            let name = format!("{GENERATION_PREFIX}{millis:013}-{n:03}");
            if !self.root.join(&name).exists() {
                return name;
            }
            n += 1;
        }
    }

    fn publish(&self, generation: &str) -> Result<()> {
        let mut tmp = tempfile::NamedTempFile::new_in(&self.root).map_err(storage)?;
        tmp.write_all(generation.as_bytes()).map_err(storage)?;
        tmp.as_file().sync_all().map_err(storage)?;
        tmp.persist(self.root.join(CURRENT_FILE)).map_err(|e| storage(e.error))?;
        Ok(())
    }

    /// Drop all but the newest `keep_generations`, never touching `current`.
    fn prune(&self, current: &str) {
        let Ok(read_dir) = std::fs::read_dir(&self.root) else { return };
        let mut generations: Vec<String> = read_dir
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .filter_map(|e| e.file_name().into_string().ok())
            .filter(|name| is_generation_name(name))
            .collect();
        generations.sort();
        let excess = generations.len().saturating_sub(self.keep_generations);
        for name in generations.into_iter().take(excess).filter(|n| n != current) {
            if let Err(e) = std::fs::remove_dir_all(self.root.join(&name)) {
                warn!(generation = %name, error = %e, "failed to remove old index generation");
            }
        }
    }
}

fn storage(e: impl std::fmt::Display) -> Error { Error::Storage(e.to_string()) }

fn is_generation_name(name: &str) -> bool {
    name.starts_with(GENERATION_PREFIX)
        && name.len() > GENERATION_PREFIX.len()
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

async fn write_table(dir: &Path, index: &VectorIndex) -> Result<()> {
    let batch = entries_to_record_batch(index).map_err(storage)?;
    let schema = batch.schema();
    let reader = Box::new(RecordBatchIterator::new(vec![Ok(batch)].into_iter(), schema));
    let db = connect(dir.to_string_lossy().as_ref()).execute().await.map_err(storage)?;
    db.create_table(CHUNKS_TABLE, reader).execute().await.map_err(storage)?;
    Ok(())
}

fn entries_to_record_batch(index: &VectorIndex) -> std::result::Result<RecordBatch, arrow_schema::ArrowError> {
    let entries = index.entries();
    let mut ordinals = Vec::with_capacity(entries.len());
    let mut ids = Vec::with_capacity(entries.len());
    let mut document_ids = Vec::with_capacity(entries.len());
    let mut source_urls = Vec::with_capacity(entries.len());
    let mut texts = Vec::with_capacity(entries.len());
    let mut starts = Vec::with_capacity(entries.len());
    let mut ends = Vec::with_capacity(entries.len());
    let mut vectors: Vec<Option<Vec<Option<f32>>>> = Vec::with_capacity(entries.len());
    for (ordinal, entry) in entries.iter().enumerate() {
        ordinals.push(ordinal as i32);
        ids.push(entry.chunk.id.clone());
        document_ids.push(entry.chunk.document_id.clone());
        source_urls.push(entry.source_url.clone());
        texts.push(entry.chunk.text.clone());
        starts.push(entry.chunk.start_offset as i64);
        ends.push(entry.chunk.end_offset as i64);
        vectors.push(Some(entry.vector.iter().map(|&x| Some(x)).collect()));
    }
    RecordBatch::try_new(build_chunk_schema(index.dim()), vec![
        Arc::new(Int32Array::from(ordinals)),
        Arc::new(StringArray::from(ids)),
        Arc::new(StringArray::from(document_ids)),
        Arc::new(StringArray::from(source_urls)),
        Arc::new(StringArray::from(texts)),
        Arc::new(Int64Array::from(starts)),
        Arc::new(Int64Array::from(ends)),
        Arc::new(FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(vectors.into_iter(), index.dim() as i32)),
    ])
}

fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> std::result::Result<&'a T, String> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<T>())
        .ok_or_else(|| format!("column '{name}' missing or of unexpected type"))
}

async fn read_table(dir: &Path, manifest: &IndexManifest) -> std::result::Result<Vec<IndexEntry>, String> {
    let db = connect(dir.to_string_lossy().as_ref()).execute().await.map_err(|e| e.to_string())?;
    let table = db.open_table(CHUNKS_TABLE).execute().await.map_err(|e| e.to_string())?;
    // one extra row so a table larger than the manifest is detected
    let mut stream = table.query().limit(manifest.entries + 1).execute().await.map_err(|e| e.to_string())?;

    let mut rows: Vec<(i32, IndexEntry)> = Vec::with_capacity(manifest.entries);
    while let Some(batch) = stream.try_next().await.map_err(|e| e.to_string())? {
        let ordinal = column::<Int32Array>(&batch, "ordinal")?;
        let id = column::<StringArray>(&batch, "id")?;
        let document_id = column::<StringArray>(&batch, "document_id")?;
        let source_url = column::<StringArray>(&batch, "source_url")?;
        let text = column::<StringArray>(&batch, "text")?;
        let start = column::<Int64Array>(&batch, "start_offset")?;
        let end = column::<Int64Array>(&batch, "end_offset")?;
        let vector = column::<FixedSizeListArray>(&batch, "vector")?;
        for i in 0..batch.num_rows() {
            if !vector.is_valid(i) {
                return Err(format!("row {} has no vector", id.value(i)));
            }
            let values = vector.value(i);
            let values = values
                .as_primitive_opt::<Float32Type>()
                .ok_or_else(|| "vector column is not float32".to_string())?;
            if values.len() != manifest.dimension {
                return Err(format!("row {} has {} dimensions, manifest says {}", id.value(i), values.len(), manifest.dimension));
            }
            let chunk = Chunk {
                id: id.value(i).to_string(),
                document_id: document_id.value(i).to_string(),
                text: text.value(i).to_string(),
                start_offset: usize::try_from(start.value(i)).map_err(|e| e.to_string())?,
                end_offset: usize::try_from(end.value(i)).map_err(|e| e.to_string())?,
            };
            let entry = IndexEntry { chunk, source_url: source_url.value(i).to_string(), vector: values.values().to_vec() };
            rows.push((ordinal.value(i), entry));
        }
    }
    if rows.len() != manifest.entries {
        return Err(format!("table holds {} rows, manifest says {}", rows.len(), manifest.entries));
    }
    rows.sort_by_key(|(ordinal, _)| *ordinal);
    Ok(rows.into_iter().map(|(_, entry)| entry).collect())
}
