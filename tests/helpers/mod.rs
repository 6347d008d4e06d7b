#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use embed_server::embedding::{l2_normalize, Device, EmbeddingModel, ModelProvider};
use embed_server::pipeline::PipelineLimits;
use embed_server::service::EmbeddingService;

pub const TEST_DIM: usize = 16;

/// Deterministic in-process model. Vectors depend only on the text bytes, so
/// the same text always maps to the same vector and raw norms are well above 1.
pub struct FakeModel {
    pub dim: usize,
    /// Every text the model was asked to encode, in call order.
    pub seen: Arc<Mutex<Vec<String>>>,
    pub delay: Duration,
    /// Fail any batch containing a text with this substring.
    pub fail_on: Option<&'static str>,
    /// Return a vector one component short for texts with this substring.
    pub truncate_on: Option<&'static str>,
}

impl FakeModel {
    pub fn new() -> Self {
        Self {
            dim: TEST_DIM,
            seen: Arc::default(),
            delay: Duration::ZERO,
            fail_on: None,
            truncate_on: None,
        }
    }
}

impl EmbeddingModel for FakeModel {
    fn encode(&self, texts: &[&str], normalize: bool) -> Result<Vec<Vec<f32>>> {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        if let Some(marker) = self.fail_on {
            if texts.iter().any(|t| t.contains(marker)) {
                anyhow::bail!("CUDA out of memory");
            }
        }
        self.seen
            .lock()
            .unwrap()
            .extend(texts.iter().map(|t| t.to_string()));

        Ok(texts
            .iter()
            .map(|t| {
                let dim = match self.truncate_on {
                    Some(marker) if t.contains(marker) => self.dim - 1,
                    _ => self.dim,
                };
                let v = text_vector(t, dim);
                if normalize {
                    l2_normalize(&v)
                } else {
                    v
                }
            })
            .collect())
    }

    fn dimension(&self) -> usize {
        self.dim
    }

    fn model_id(&self) -> &str {
        "fake-e5"
    }
}

pub fn text_vector(text: &str, dim: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; dim];
    for (i, b) in text.bytes().enumerate() {
        v[(i * 7 + b as usize) % dim] += 1.0 + b as f32 / 64.0;
    }
    v
}

pub fn provider(model: FakeModel) -> Arc<ModelProvider> {
    Arc::new(ModelProvider::from_model(Box::new(model), Device::Cpu, 32).unwrap())
}

pub fn limits(max_concurrent: usize, queue_timeout_ms: u64) -> PipelineLimits {
    PipelineLimits {
        max_concurrent,
        queue_timeout: Duration::from_millis(queue_timeout_ms),
    }
}

/// A service already in `Ready` backed by `model`.
pub fn ready_service(model: FakeModel) -> Arc<EmbeddingService> {
    let service = EmbeddingService::new(limits(2, 5_000));
    service.mark_ready(provider(model)).unwrap();
    Arc::new(service)
}

pub fn norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

pub fn texts(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("text number {i}")).collect()
}
