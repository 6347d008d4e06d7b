//! CLI `embed` command: load the model, embed texts once, print JSON.

use anyhow::{Context, Result};
use std::sync::Arc;

use embed_server::config::AppConfig;
use embed_server::embedding::ModelProvider;
use embed_server::pipeline::PipelineLimits;
use embed_server::service::EmbeddingService;
use embed_server::types::EmbeddingRequest;

/// Run the embed operation from the terminal, going through the same facade
/// (prefixing, validation, batching) as the HTTP endpoint.
pub async fn embed_once(config: &AppConfig, texts: Vec<String>, normalize: bool) -> Result<()> {
    let service = EmbeddingService::new(PipelineLimits::from(&config.server));

    let model_config = config.model.clone();
    let provider = tokio::task::spawn_blocking(move || ModelProvider::load(&model_config)).await??;
    service.mark_ready(Arc::new(provider))?;

    let request = EmbeddingRequest {
        normalize,
        ..EmbeddingRequest::new(texts)
    };
    let result = service.embed(request).await?;

    let json = serde_json::to_string_pretty(&result).context("failed to serialize result")?;
    println!("{json}");
    Ok(())
}
