//! Request and response shapes for the service operations.
//!
//! These serialize directly as the HTTP JSON bodies.

use serde::{Deserialize, Serialize};

use crate::embedding::MemoryMetrics;
use crate::service::ServiceState;
use crate::similarity::SimilarityMatrix;

fn default_normalize() -> bool {
    true
}

/// Input to `embed` and `similarity`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRequest {
    /// Texts to embed, 1 to 100 of them (at least 2 for similarity).
    pub texts: Vec<String>,
    /// L2-normalize each vector. Ignored by `similarity`, which always normalizes.
    #[serde(default = "default_normalize")]
    pub normalize: bool,
    /// Accepted for compatibility; the service always uses its loaded model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
}

impl EmbeddingRequest {
    pub fn new<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            texts: texts.into_iter().map(Into::into).collect(),
            normalize: true,
            model_name: None,
        }
    }
}

/// Output of `embed`: one vector per input text, in input order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingResult {
    pub embeddings: Vec<Vec<f32>>,
    pub model: String,
    pub dimension: usize,
    /// Wall-clock seconds spent producing the vectors.
    pub processing_time: f64,
    pub device: String,
}

/// Output of `similarity`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarityResult {
    pub similarities: SimilarityMatrix,
    /// The caller's texts, as submitted (without task prefixes).
    pub texts: Vec<String>,
    pub model: String,
}

/// Output of `health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub status: ServiceState,
    pub model_loaded: bool,
    pub model: String,
    pub dimension: usize,
    pub device: String,
    /// Whole-device memory in MB (`device_used_mb`, `total_mb`). Omitted on devices without allocator accounting.
    #[serde(default, skip_serializing_if = "MemoryMetrics::is_empty")]
    pub memory: MemoryMetrics,
}

/// Static description of a servable model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub name: String,
    pub description: String,
    pub dimension: usize,
    pub languages: Vec<String>,
    pub use_cases: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelList {
    pub models: Vec<ModelDescriptor>,
}
