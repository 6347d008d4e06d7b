//! Text-to-vector model ownership.
//!
//! Provides the [`EmbeddingModel`] trait, a local ONNX implementation for
//! multilingual E5 models, and [`ModelProvider`], the single loaded-and-warmed
//! model instance shared by every request.

pub mod device;
pub mod local;

use std::sync::Arc;

use anyhow::{Context, Result};

pub use device::{Device, DevicePreference, MemoryMetrics};

use crate::config::ModelConfig;

/// Passage encoded once right after load so lazy runtime initialization
/// happens before the first real request.
const WARMUP_TEXT: &str = "passage: warm-up";

/// Trait for embedding text into vectors.
///
/// Implementations never reorder their inputs. All methods are synchronous;
/// callers in async contexts should use `tokio::task::spawn_blocking`.
pub trait EmbeddingModel: Send + Sync {
    /// Encode a batch of already-prefixed texts. When `normalize` is set every
    /// returned vector has unit L2 norm.
    fn encode(&self, texts: &[&str], normalize: bool) -> Result<Vec<Vec<f32>>>;

    /// Number of dimensions this model produces.
    fn dimension(&self) -> usize;

    /// Identifier reported back to callers.
    fn model_id(&self) -> &str;
}

/// Device label plus whatever memory accounting the device exposes.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    pub label: String,
    pub memory: MemoryMetrics,
}

/// Owns the one loaded model and the device it runs on.
///
/// Created once during startup by [`ModelProvider::load`] and read-only
/// afterwards. Dropping the last handle releases the model.
pub struct ModelProvider {
    model: Box<dyn EmbeddingModel>,
    device: Device,
    batch_size: usize,
}

impl ModelProvider {
    /// Resolve the device, load the configured model from disk and warm it up.
    ///
    /// Any error here is fatal: the service must not start serving.
    pub fn load(config: &ModelConfig) -> Result<Self> {
        let preference: DevicePreference = config
            .device
            .parse()
            .context("invalid model.device in config")?;
        let requested = preference.resolve();
        tracing::info!(model = %config.name, device = %requested, "loading embedding model");

        let (model, device) = local::LocalEmbeddingModel::new(config, requested)?;
        Self::from_model(Box::new(model), device, config.batch_size)
    }

    /// Wrap an already-constructed model, verify its output and warm it up.
    pub fn from_model(
        model: Box<dyn EmbeddingModel>,
        device: Device,
        batch_size: usize,
    ) -> Result<Self> {
        anyhow::ensure!(batch_size > 0, "batch_size must be at least 1");
        let provider = Self {
            model,
            device,
            batch_size,
        };
        provider.warm_up()?;
        Ok(provider)
    }

    fn warm_up(&self) -> Result<()> {
        let started = std::time::Instant::now();
        let vectors = self
            .encode(&[WARMUP_TEXT], true)
            .context("warm-up inference failed")?;
        anyhow::ensure!(vectors.len() == 1, "warm-up returned {} vectors", vectors.len());
        tracing::info!(
            model = %self.model.model_id(),
            device = %self.device,
            dimension = self.dimension(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "embedding model warmed up"
        );
        Ok(())
    }

    /// Encode `texts` in chunks of the configured batch size, preserving order.
    pub fn encode(&self, texts: &[&str], normalize: bool) -> Result<Vec<Vec<f32>>> {
        let dimension = self.dimension();
        let mut out = Vec::with_capacity(texts.len());

        for chunk in texts.chunks(self.batch_size) {
            let vectors = self.model.encode(chunk, normalize)?;
            anyhow::ensure!(
                vectors.len() == chunk.len(),
                "model returned {} vectors for {} inputs",
                vectors.len(),
                chunk.len()
            );
            if let Some(bad) = vectors.iter().find(|v| v.len() != dimension) {
                anyhow::bail!(
                    "model returned a {}-dim vector, expected {dimension}",
                    bad.len()
                );
            }
            out.extend(vectors);
        }

        Ok(out)
    }

    pub fn dimension(&self) -> usize {
        self.model.dimension()
    }

    pub fn model_id(&self) -> &str {
        self.model.model_id()
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            label: self.device.label(),
            memory: self.device.memory_metrics(),
        }
    }
}

impl Drop for ModelProvider {
    fn drop(&mut self) {
        tracing::info!(model = %self.model.model_id(), device = %self.device, "embedding model released");
    }
}

/// Shared, immutable provider handle.
pub type SharedProvider = Arc<ModelProvider>;

/// L2-normalize a vector. Returns a zero vector if the input norm is zero.
pub fn l2_normalize(v: &[f32]) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter().map(|x| x / norm).collect()
    } else {
        v.to_vec()
    }
}
