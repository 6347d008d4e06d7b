//! Local ONNX Runtime embedding model.
//!
//! Implements [`EmbeddingModel`] for sentence-transformer exports such as
//! multilingual-e5-large via `ort`. Handles tokenization, inference, mean pooling,
//! and optional L2 normalization.

use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use ort::execution_providers::{CPUExecutionProvider, CUDAExecutionProvider};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use tokenizers::Tokenizer;

use super::{l2_normalize, Device, EmbeddingModel};
use crate::config::ModelConfig;

pub const MODEL_FILE: &str = "model.onnx";
pub const MODEL_DATA_FILE: &str = "model.onnx_data";
pub const TOKENIZER_FILE: &str = "tokenizer.json";

/// Local ONNX-based embedding model.
pub struct LocalEmbeddingModel {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
    model_id: String,
    dimension: usize,
    token_type_ids: bool,
}

// Safety: Tokenizer is Send+Sync. Session is behind a Mutex.
// The Mutex guarantees exclusive access during run().
unsafe impl Send for LocalEmbeddingModel {}
unsafe impl Sync for LocalEmbeddingModel {}

impl LocalEmbeddingModel {
    /// Load model and tokenizer from `config.cache_dir`, placing the session on
    /// `device`. Returns the device the session actually landed on: a CUDA
    /// request that fails to register falls back to CPU.
    pub fn new(config: &ModelConfig, device: Device) -> Result<(Self, Device)> {
        let cache_dir = config.resolved_cache_dir();
        let model_path = cache_dir.join(MODEL_FILE);
        let tokenizer_path = cache_dir.join(TOKENIZER_FILE);

        anyhow::ensure!(
            model_path.exists(),
            "ONNX model not found at {}. Run `embed-server model download` first.",
            model_path.display()
        );
        anyhow::ensure!(
            tokenizer_path.exists(),
            "Tokenizer not found at {}. Run `embed-server model download` first.",
            tokenizer_path.display()
        );

        let (session, device) = build_session(&model_path, device, config.intra_threads)?;
        tracing::info!(model = %model_path.display(), device = %device, "ONNX model loaded");

        let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow::anyhow!("failed to load tokenizer: {e}"))?;

        tokenizer
            .with_truncation(Some(tokenizers::TruncationParams {
                max_length: config.max_seq_len,
                ..Default::default()
            }))
            .map_err(|e| anyhow::anyhow!("failed to set truncation: {e}"))?;

        if tokenizer.get_padding().is_none() {
            // XLM-R vocabularies pad with `<pad>`, BERT ones with `[PAD]` (id 0).
            let (pad_id, pad_token) = match tokenizer.token_to_id("<pad>") {
                Some(id) => (id, "<pad>"),
                None => (0, "[PAD]"),
            };
            tokenizer.with_padding(Some(tokenizers::PaddingParams {
                strategy: tokenizers::PaddingStrategy::BatchLongest,
                pad_id,
                pad_token: pad_token.into(),
                ..Default::default()
            }));
        }

        tracing::info!(tokenizer = %tokenizer_path.display(), "tokenizer loaded");

        let model = Self {
            session: Mutex::new(session),
            tokenizer,
            model_id: config.name.clone(),
            dimension: config.dimension,
            token_type_ids: config.token_type_ids,
        };
        Ok((model, device))
    }
}

fn build_session(model_path: &Path, device: Device, intra_threads: usize) -> Result<(Session, Device)> {
    if let Device::Cuda(ordinal) = device {
        match commit_session(model_path, Some(ordinal), intra_threads) {
            Ok(session) => return Ok((session, device)),
            Err(e) => {
                tracing::warn!(error = %e, device = %device, "CUDA execution provider failed, falling back to CPU");
            }
        }
    }
    let session = commit_session(model_path, None, intra_threads)?;
    Ok((session, Device::Cpu))
}

fn commit_session(model_path: &Path, cuda: Option<u32>, intra_threads: usize) -> Result<Session> {
    let provider = match cuda {
        Some(ordinal) => CUDAExecutionProvider::default()
            .with_device_id(ordinal as i32)
            .build()
            .error_on_failure(),
        None => CPUExecutionProvider::default().build(),
    };

    let session = Session::builder()?
        .with_execution_providers([provider])?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(intra_threads)?
        .commit_from_file(model_path)
        .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?;
    Ok(session)
}

impl EmbeddingModel for LocalEmbeddingModel {
    fn encode(&self, texts: &[&str], normalize: bool) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        // Step 1: Tokenize
        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| anyhow::anyhow!("tokenization failed: {e}"))?;

        let batch_size = encodings.len();
        let seq_len = encodings[0].get_ids().len();

        // Step 2: Build flat input tensors as i64
        let mut input_ids_flat = Vec::with_capacity(batch_size * seq_len);
        let mut attention_mask_flat = Vec::with_capacity(batch_size * seq_len);

        for encoding in &encodings {
            input_ids_flat.extend(encoding.get_ids().iter().map(|&id| id as i64));
            attention_mask_flat.extend(encoding.get_attention_mask().iter().map(|&m| m as i64));
        }

        let shape = vec![batch_size as i64, seq_len as i64];
        let input_ids_tensor =
            Tensor::from_array((shape.clone(), input_ids_flat.into_boxed_slice()))?;
        let attention_mask_tensor =
            Tensor::from_array((shape.clone(), attention_mask_flat.clone().into_boxed_slice()))?;

        // Step 3: Run ONNX inference
        let mut session = self
            .session
            .lock()
            .map_err(|e| anyhow::anyhow!("session lock poisoned: {e}"))?;

        let outputs = if self.token_type_ids {
            // Single sentence, no segment B
            let token_type_ids = vec![0i64; batch_size * seq_len];
            let token_type_ids_tensor =
                Tensor::from_array((shape, token_type_ids.into_boxed_slice()))?;
            session.run(ort::inputs! {
                "input_ids" => input_ids_tensor,
                "attention_mask" => attention_mask_tensor,
                "token_type_ids" => token_type_ids_tensor,
            })?
        } else {
            session.run(ort::inputs! {
                "input_ids" => input_ids_tensor,
                "attention_mask" => attention_mask_tensor,
            })?
        };

        // Step 4: Extract token embeddings, shape [batch, seq_len, dimension]
        let token_emb_value = outputs
            .get("last_hidden_state")
            .or_else(|| outputs.get("token_embeddings"))
            .unwrap_or_else(|| &outputs[0]);

        let (shape, data) = token_emb_value
            .try_extract_tensor::<f32>()
            .context("failed to extract last_hidden_state tensor")?;

        let dims: &[i64] = &shape;
        anyhow::ensure!(
            dims.len() == 3 && dims[0] == batch_size as i64 && dims[2] == self.dimension as i64,
            "unexpected hidden state shape: {dims:?}, expected [{batch_size}, seq, {}]",
            self.dimension
        );
        let hidden_dim = dims[2] as usize;
        let actual_seq_len = dims[1] as usize;

        // Step 5: Mean pooling with attention mask
        let mut results = Vec::with_capacity(batch_size);
        for b in 0..batch_size {
            let mask = &attention_mask_flat[b * seq_len..(b + 1) * seq_len];
            let pooled = mean_pool(
                &data[b * actual_seq_len * hidden_dim..(b + 1) * actual_seq_len * hidden_dim],
                mask,
                hidden_dim,
            );

            // Step 6: optional L2 normalize
            results.push(if normalize {
                l2_normalize(&pooled)
            } else {
                pooled
            });
        }

        Ok(results)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

/// Average the rows of `hidden` (`[seq, hidden_dim]`, row-major) whose mask is set.
fn mean_pool(hidden: &[f32], mask: &[i64], hidden_dim: usize) -> Vec<f32> {
    let mut sum = vec![0.0f32; hidden_dim];
    let mut count = 0.0f32;

    for (row, &m) in hidden.chunks_exact(hidden_dim).zip(mask) {
        if m > 0 {
            for (acc, x) in sum.iter_mut().zip(row) {
                *acc += x;
            }
            count += 1.0;
        }
    }

    if count > 0.0 {
        for x in &mut sum {
            *x /= count;
        }
    }
    sum
}
