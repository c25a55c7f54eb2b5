//! Local sentence-transformer embeddings (BERT family, e.g. all-MiniLM-L6-v2).
//!
//! The model directory must hold `config.json`, `tokenizer.json` and either
//! `model.safetensors` or `pytorch_model.bin`.

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use candle_core::{Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig, DTYPE};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokenizers::Tokenizer;
use tracing::{debug, info, warn};

use newsrag_core::config::{expand_path, EmbeddingSettings};
use newsrag_core::traits::Embedder;
use newsrag_core::{Error, Result};

use crate::device::select_device;
use crate::pool::masked_mean_l2;
use crate::tokenize::tokenize_batch;

struct SentenceEncoder {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
    max_len: usize,
}

impl SentenceEncoder {
    fn load(model_dir: &Path, max_len: usize) -> anyhow::Result<(Self, usize)> {
        let device = select_device();
        info!(dir = %model_dir.display(), "loading sentence encoder");
        let tokenizer_path = model_dir.join("tokenizer.json");
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow!("Failed to load tokenizer from {}: {}", tokenizer_path.display(), e))?;
        let config_path = model_dir.join("config.json");
        let raw: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(&config_path).with_context(|| format!("reading {}", config_path.display()))?,
        )?;
        let hidden_size = raw
            .get("hidden_size")
            .and_then(serde_json::Value::as_u64)
            .ok_or_else(|| anyhow!("{} has no hidden_size", config_path.display()))? as usize;
        let config: BertConfig = serde_json::from_value(raw)?;
        let weights = load_weights(model_dir, &device)?;
        let vb = VarBuilder::from_tensors(weights, DTYPE, &device);
        let model = BertModel::load(vb, &config)?;
        info!(hidden_size, "sentence encoder ready");
        Ok((Self { model, tokenizer, device, max_len }, hidden_size))
    }

    fn encode(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        let start = Instant::now();
        let (input_ids, attention_mask) = tokenize_batch(&self.tokenizer, texts, self.max_len, &self.device)?;
        let token_type_ids = input_ids.zeros_like()?;
        let hidden = self.model.forward(&input_ids, &token_type_ids, Some(&attention_mask))?;
        let pooled = masked_mean_l2(&hidden, &attention_mask)?;
        let vectors = pooled.to_device(&Device::Cpu)?.to_vec2::<f32>()?;
        debug!(batch = texts.len(), elapsed_ms = start.elapsed().as_millis() as u64, "encoded batch");
        Ok(vectors)
    }
}

fn load_weights(model_dir: &Path, device: &Device) -> anyhow::Result<HashMap<String, Tensor>> {
    let safetensors = model_dir.join("model.safetensors");
    if safetensors.exists() {
        return Ok(candle_core::safetensors::load(&safetensors, device)?);
    }
    let pickle = model_dir.join("pytorch_model.bin");
    if pickle.exists() {
        let weights = candle_core::pickle::read_all(&pickle)?;
        return Ok(weights.into_iter().collect());
    }
    Err(anyhow!("no model.safetensors or pytorch_model.bin under {}", model_dir.display()))
}

pub struct LocalEmbedder {
    inner: Arc<SentenceEncoder>,
    id: String,
    dim: usize,
}

impl LocalEmbedder {
    pub fn new(settings: &EmbeddingSettings) -> Result<Self> {
        let model_dir = resolve_model_dir(settings)?;
        let (encoder, dim) = SentenceEncoder::load(&model_dir, settings.max_len)
            .map_err(|e| Error::embedding_fatal(format!("{e:#}")))?;
        if dim != settings.dimension {
            warn!(configured = settings.dimension, actual = dim, "model dimension differs from configuration; using model's");
        }
        let model_name = settings.model.rsplit('/').next().unwrap_or(&settings.model);
        let id = format!("local:{}:d{}", model_name, dim);
        Ok(Self { inner: Arc::new(encoder), id, dim })
    }
}

#[async_trait]
impl Embedder for LocalEmbedder {
    fn embedder_id(&self) -> &str { &self.id }

    fn dim(&self) -> usize { self.dim }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() { return Ok(Vec::new()); }
        let encoder = Arc::clone(&self.inner);
        let texts = texts.to_vec();
        tokio::task::spawn_blocking(move || encoder.encode(&texts))
            .await
            .map_err(|e| Error::embedding_fatal(format!("embedding task failed: {e}")))?
            .map_err(|e| Error::embedding_fatal(format!("{e:#}")))
    }
}

fn resolve_model_dir(settings: &EmbeddingSettings) -> Result<PathBuf> {
    if let Some(dir) = &settings.model_dir {
        let p = expand_path(dir);
        if p.exists() { return Ok(p); }
        return Err(Error::embedding_fatal(format!("embedding.model_dir {} does not exist", p.display())));
    }
    for var in ["APP_MODEL_DIR", "MODEL_DIR"] {
        if let Ok(dir) = std::env::var(var) {
            let p = expand_path(&dir);
            if p.exists() { info!(var, dir = %p.display(), "using model dir from environment"); return Ok(p); }
        }
    }
    let model_name = settings.model.rsplit('/').next().unwrap_or(&settings.model);
    for candidate in [Path::new("models").join(model_name), Path::new("../models").join(model_name)] {
        if candidate.exists() { return Ok(candidate); }
    }
    Err(Error::embedding_fatal(format!("Could not locate model directory for {}", settings.model)))
}
