//! Service facade: readiness gating, request validation, and the four
//! operations (`health`, `embed`, `similarity`, `list_models`).
//!
//! Lifecycle is `NotReady -> Ready -> ShuttingDown`. Only [`EmbeddingService::mark_ready`]
//! enters `Ready`, and nothing leaves `ShuttingDown`.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::embedding::{DeviceInfo, MemoryMetrics, SharedProvider};
use crate::pipeline::{EmbeddingPipeline, PipelineError, PipelineLimits};
use crate::similarity;
use crate::types::{
    EmbeddingRequest, EmbeddingResult, ModelDescriptor, ModelList, ServiceHealth,
    SimilarityResult,
};

pub const MIN_TEXTS: usize = 1;
pub const MAX_TEXTS: usize = 100;
pub const MIN_SIMILARITY_TEXTS: usize = 2;

/// Failures surfaced to callers.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Model not loaded yet, or the service is shutting down. Retry later.
    #[error("embedding model is not ready")]
    NotReady,
    /// Request shape is wrong; retrying unchanged will fail again.
    #[error("{0}")]
    Validation(String),
    /// Every inference slot stayed busy for the whole queue timeout.
    #[error("service overloaded: {0}")]
    Overloaded(String),
    /// Inference failed for the request as a whole; no partial results.
    #[error("{0}")]
    Inference(String),
}

impl From<PipelineError> for ServiceError {
    fn from(e: PipelineError) -> Self {
        match &e {
            PipelineError::Overloaded(_) => Self::Overloaded(e.to_string()),
            PipelineError::Inference(_) => Self::Inference(e.to_string()),
        }
    }
}

/// Lifecycle state, also reported as `status` by `health`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    NotReady,
    Ready,
    ShuttingDown,
}

enum Lifecycle {
    NotReady,
    Ready(Arc<EmbeddingPipeline>),
    ShuttingDown,
}

impl Lifecycle {
    fn state(&self) -> ServiceState {
        match self {
            Self::NotReady => ServiceState::NotReady,
            Self::Ready(_) => ServiceState::Ready,
            Self::ShuttingDown => ServiceState::ShuttingDown,
        }
    }
}

pub struct EmbeddingService {
    lifecycle: RwLock<Lifecycle>,
    limits: PipelineLimits,
}

impl EmbeddingService {
    /// A service in `NotReady`. Call [`mark_ready`](Self::mark_ready) once the model is loaded.
    pub fn new(limits: PipelineLimits) -> Self {
        Self {
            lifecycle: RwLock::new(Lifecycle::NotReady),
            limits,
        }
    }

    pub fn state(&self) -> ServiceState {
        self.read().state()
    }

    /// `NotReady -> Ready` with a loaded and warmed provider.
    pub fn mark_ready(&self, provider: SharedProvider) -> Result<()> {
        let mut lifecycle = self.write();
        match lifecycle.state() {
            ServiceState::NotReady => {
                tracing::info!(
                    model = %provider.model_id(),
                    device = %provider.device(),
                    max_concurrent = self.limits.max_concurrent,
                    "service ready"
                );
                *lifecycle = Lifecycle::Ready(Arc::new(EmbeddingPipeline::new(
                    provider,
                    self.limits,
                )));
                Ok(())
            }
            other => anyhow::bail!("cannot become ready from {other:?}"),
        }
    }

    /// Enter `ShuttingDown` and hand back the provider so the caller controls its
    /// release. Requests already in flight keep their own handle until they finish.
    pub fn begin_shutdown(&self) -> Option<SharedProvider> {
        let previous = std::mem::replace(&mut *self.write(), Lifecycle::ShuttingDown);
        tracing::info!("service shutting down");
        match previous {
            Lifecycle::Ready(pipeline) => Some(Arc::clone(pipeline.provider())),
            Lifecycle::NotReady | Lifecycle::ShuttingDown => None,
        }
    }

    /// Device memory is queried on the blocking pool; on CUDA that shells out
    /// to `nvidia-smi`.
    pub async fn health(&self) -> Result<ServiceHealth, ServiceError> {
        let pipeline = self.pipeline()?;
        let provider = Arc::clone(pipeline.provider());
        let device = {
            let handle = Arc::clone(&provider);
            tokio::task::spawn_blocking(move || handle.device_info())
                .await
                .unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "device memory query task failed");
                    DeviceInfo {
                        label: provider.device().label(),
                        memory: MemoryMetrics::new(),
                    }
                })
        };
        Ok(ServiceHealth {
            status: ServiceState::Ready,
            model_loaded: true,
            model: provider.model_id().to_string(),
            dimension: provider.dimension(),
            device: device.label,
            memory: device.memory,
        })
    }

    pub async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResult, ServiceError> {
        let pipeline = self.pipeline()?;
        validate_count(&request.texts, MIN_TEXTS)?;
        note_model_override(&request, pipeline.provider().model_id());

        let output = pipeline.run(&request.texts, request.normalize).await?;
        let provider = pipeline.provider();

        Ok(EmbeddingResult {
            embeddings: output.vectors,
            model: provider.model_id().to_string(),
            dimension: provider.dimension(),
            processing_time: output.elapsed.as_secs_f64(),
            device: provider.device().label(),
        })
    }

    pub async fn similarity(
        &self,
        request: EmbeddingRequest,
    ) -> Result<SimilarityResult, ServiceError> {
        let pipeline = self.pipeline()?;
        validate_count(&request.texts, MIN_SIMILARITY_TEXTS)?;
        note_model_override(&request, pipeline.provider().model_id());

        let output = pipeline.run_for_similarity(&request.texts).await?;

        Ok(SimilarityResult {
            similarities: similarity::compute_pairwise(&output.vectors),
            texts: request.texts,
            model: pipeline.provider().model_id().to_string(),
        })
    }

    /// Static catalog; does not touch the model.
    pub fn list_models(&self) -> ModelList {
        model_catalog()
    }

    fn pipeline(&self) -> Result<Arc<EmbeddingPipeline>, ServiceError> {
        match &*self.read() {
            Lifecycle::Ready(pipeline) => Ok(Arc::clone(pipeline)),
            Lifecycle::NotReady | Lifecycle::ShuttingDown => Err(ServiceError::NotReady),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Lifecycle> {
        self.lifecycle.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Lifecycle> {
        self.lifecycle.write().unwrap_or_else(|e| e.into_inner())
    }
}

fn validate_count(texts: &[String], min: usize) -> Result<(), ServiceError> {
    let n = texts.len();
    if n < min || n > MAX_TEXTS {
        let msg = if min == MIN_SIMILARITY_TEXTS && n < min {
            format!("similarity requires at least {min} texts, got {n}")
        } else {
            format!("texts must contain between {min} and {MAX_TEXTS} items, got {n}")
        };
        return Err(ServiceError::Validation(msg));
    }
    Ok(())
}

fn note_model_override(request: &EmbeddingRequest, loaded: &str) {
    if let Some(requested) = request.model_name.as_deref() {
        if requested != loaded {
            tracing::debug!(requested, loaded, "model_name override ignored");
        }
    }
}

/// The one model this service knows how to serve.
pub fn model_catalog() -> ModelList {
    let strings = |items: &[&str]| -> Vec<String> { items.iter().map(|s| s.to_string()).collect() };
    ModelList {
        models: vec![ModelDescriptor {
            name: "intfloat/multilingual-e5-large".into(),
            description: "Multilingual E5 large: 1024-dim sentence embeddings for 100+ languages, \
                          trained with query:/passage: task prefixes"
                .into(),
            dimension: 1024,
            languages: strings(&["pl", "en", "de", "multilingual"]),
            use_cases: strings(&[
                "semantic search",
                "text similarity",
                "clustering",
                "retrieval",
            ]),
        }],
    }
}
