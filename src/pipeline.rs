//! Preprocess → batched encode → timing, with bounded concurrency.
//!
//! All requests share one [`ModelProvider`](crate::embedding::ModelProvider).
//! A semaphore caps how many `encode` calls run at once; a request that cannot
//! get a slot within the queue timeout is rejected as overloaded instead of
//! queuing without bound.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;

use crate::embedding::SharedProvider;
use crate::preprocess;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("no inference slot became free within {0:?}")]
    Overloaded(Duration),
    #[error("inference failed: {0:#}")]
    Inference(anyhow::Error),
}

/// Concurrency limits for inference.
#[derive(Debug, Clone, Copy)]
pub struct PipelineLimits {
    pub max_concurrent: usize,
    pub queue_timeout: Duration,
}

impl From<&crate::config::ServerConfig> for PipelineLimits {
    fn from(config: &crate::config::ServerConfig) -> Self {
        Self {
            max_concurrent: config.max_concurrent_inference,
            queue_timeout: Duration::from_millis(config.queue_timeout_ms),
        }
    }
}

/// Vectors for one request plus how long they took.
#[derive(Debug)]
pub struct PipelineOutput {
    pub vectors: Vec<Vec<f32>>,
    pub elapsed: Duration,
}

pub struct EmbeddingPipeline {
    provider: SharedProvider,
    permits: Arc<Semaphore>,
    queue_timeout: Duration,
}

impl EmbeddingPipeline {
    pub fn new(provider: SharedProvider, limits: PipelineLimits) -> Self {
        Self {
            provider,
            permits: Arc::new(Semaphore::new(limits.max_concurrent.max(1))),
            queue_timeout: limits.queue_timeout,
        }
    }

    pub fn provider(&self) -> &SharedProvider {
        &self.provider
    }

    /// Embed path: honor existing task prefixes, normalize as requested.
    pub async fn run(
        &self,
        texts: &[String],
        normalize: bool,
    ) -> Result<PipelineOutput, PipelineError> {
        let started = Instant::now();
        let prepared = texts.iter().map(|t| preprocess::prepare(t)).collect();
        self.encode(prepared, normalize, started).await
    }

    /// Similarity path: always `passage: `, always normalized.
    pub async fn run_for_similarity(
        &self,
        texts: &[String],
    ) -> Result<PipelineOutput, PipelineError> {
        let started = Instant::now();
        let prepared = texts
            .iter()
            .map(|t| preprocess::prepare_for_similarity(t))
            .collect();
        self.encode(prepared, true, started).await
    }

    async fn encode(
        &self,
        prepared: Vec<String>,
        normalize: bool,
        started: Instant,
    ) -> Result<PipelineOutput, PipelineError> {
        let permit = tokio::time::timeout(
            self.queue_timeout,
            Arc::clone(&self.permits).acquire_owned(),
        )
        .await
        .map_err(|_| PipelineError::Overloaded(self.queue_timeout))?
        .map_err(|e| PipelineError::Inference(anyhow::anyhow!("inference slots closed: {e}")))?;

        // The permit moves into the blocking task: an aborted request still
        // occupies its slot until the model call returns.
        let provider = Arc::clone(&self.provider);
        let vectors = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let refs: Vec<&str> = prepared.iter().map(String::as_str).collect();
            provider.encode(&refs, normalize)
        })
        .await
        .map_err(|e| PipelineError::Inference(anyhow::anyhow!("embedding task failed: {e}")))?
        .map_err(PipelineError::Inference)?;

        Ok(PipelineOutput {
            vectors,
            elapsed: started.elapsed(),
        })
    }
}
