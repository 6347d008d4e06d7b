//! HTTP binding for the service facade.
//!
//! Provides [`router`] (used directly by tests) and [`serve`], which loads the
//! model, marks the service ready, and runs the listener until Ctrl-C or SIGTERM.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::embedding::ModelProvider;
use crate::pipeline::PipelineLimits;
use crate::service::{EmbeddingService, ServiceError};
use crate::types::{
    EmbeddingRequest, EmbeddingResult, ModelList, ServiceHealth, SimilarityResult,
};

/// JSON error body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: &'static str,
}

/// [`ServiceError`] with its HTTP mapping.
pub struct ApiError(ServiceError);

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            ServiceError::NotReady => (StatusCode::SERVICE_UNAVAILABLE, "MODEL_NOT_READY"),
            ServiceError::Validation(_) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
            ServiceError::Overloaded(_) => (StatusCode::TOO_MANY_REQUESTS, "OVERLOADED"),
            ServiceError::Inference(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INFERENCE_FAILED"),
        };
        let body = ErrorBody {
            error: self.0.to_string(),
            code,
        };
        (status, Json(body)).into_response()
    }
}

pub fn router(service: Arc<EmbeddingService>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/embed", post(embed))
        .route("/similarity", post(similarity))
        .route("/models", get(list_models))
        .with_state(service)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

async fn health(State(service): State<Arc<EmbeddingService>>) -> Result<Json<ServiceHealth>, ApiError> {
    Ok(Json(service.health().await?))
}

async fn embed(
    State(service): State<Arc<EmbeddingService>>,
    Json(request): Json<EmbeddingRequest>,
) -> Result<Json<EmbeddingResult>, ApiError> {
    let request_id = Uuid::now_v7();
    tracing::info!(
        %request_id,
        texts = request.texts.len(),
        normalize = request.normalize,
        "embed request"
    );

    match service.embed(request).await {
        Ok(result) => {
            tracing::info!(
                %request_id,
                processing_ms = (result.processing_time * 1000.0) as u64,
                "embed complete"
            );
            Ok(Json(result))
        }
        Err(e) => {
            tracing::error!(%request_id, error = %e, "embed failed");
            Err(e.into())
        }
    }
}

async fn similarity(
    State(service): State<Arc<EmbeddingService>>,
    Json(request): Json<EmbeddingRequest>,
) -> Result<Json<SimilarityResult>, ApiError> {
    let request_id = Uuid::now_v7();
    tracing::info!(%request_id, texts = request.texts.len(), "similarity request");

    service.similarity(request).await.map(Json).map_err(|e| {
        tracing::error!(%request_id, error = %e, "similarity failed");
        e.into()
    })
}

async fn list_models(State(service): State<Arc<EmbeddingService>>) -> Json<ModelList> {
    Json(service.list_models())
}

/// Load and warm the model, then serve HTTP until Ctrl-C or SIGTERM.
///
/// A model that fails to load or warm up aborts startup before the listener binds.
pub async fn serve(config: AppConfig) -> Result<()> {
    let bind_addr = config.bind_addr();
    let service = Arc::new(EmbeddingService::new(PipelineLimits::from(&config.server)));

    let model_config = config.model.clone();
    let provider = tokio::task::spawn_blocking(move || ModelProvider::load(&model_config))
        .await
        .context("model load task failed")?
        .context("failed to load embedding model")?;
    service.mark_ready(Arc::new(provider))?;

    let app = router(Arc::clone(&service));
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    tracing::info!(addr = %bind_addr, "embedding service listening at http://{bind_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(Arc::clone(&service)))
        .await?;

    tracing::info!("HTTP server stopped");
    Ok(())
}

async fn shutdown_signal(service: Arc<EmbeddingService>) {
    shutdown_after(termination(), service).await;
}

/// Enter `ShuttingDown` once `signal` fires. In-flight requests hold their own
/// provider handle; the model is released when the last of them finishes.
async fn shutdown_after<F>(signal: F, service: Arc<EmbeddingService>)
where
    F: std::future::Future<Output = ()>,
{
    signal.await;
    drop(service.begin_shutdown());
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn termination() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received ctrl-c"),
        _ = terminate => tracing::info!("received SIGTERM"),
    }
}
