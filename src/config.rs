use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub model: ModelConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    /// Upper bound on `encode` calls running at once against the shared model.
    pub max_concurrent_inference: usize,
    /// How long a request may wait for an inference slot before it is rejected.
    pub queue_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ModelConfig {
    pub name: String,
    pub dimension: usize,
    pub cache_dir: String,
    /// `auto`, `cpu`, `cuda` or `cuda:N`. Resolved once at startup.
    pub device: String,
    pub batch_size: usize,
    pub max_seq_len: usize,
    pub intra_threads: usize,
    /// Feed a zeroed `token_type_ids` input (BERT-style exports only).
    pub token_type_ids: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8000,
            log_level: "info".into(),
            max_concurrent_inference: 2,
            queue_timeout_ms: 30_000,
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        let cache_dir = default_app_dir()
            .join("models")
            .to_string_lossy()
            .into_owned();
        Self {
            name: "intfloat/multilingual-e5-large".into(),
            dimension: 1024,
            cache_dir,
            device: "auto".into(),
            batch_size: 32,
            max_seq_len: 512,
            intra_threads: 4,
            token_type_ids: false,
        }
    }
}

/// Returns `~/.embed-server/`, or `./.embed-server/` when no home directory is known.
pub fn default_app_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".embed-server")
}

/// Returns the default config file path: `~/.embed-server/config.toml`
pub fn default_config_path() -> PathBuf {
    default_app_dir().join("config.toml")
}

impl AppConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            AppConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides
    /// (EMBED_HOST, EMBED_PORT, EMBED_LOG_LEVEL, EMBED_DEVICE, EMBED_MODEL_DIR).
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("EMBED_HOST") {
            self.server.host = val;
        }
        if let Ok(val) = std::env::var("EMBED_PORT") {
            match val.parse() {
                Ok(port) => self.server.port = port,
                Err(_) => warn!(value = %val, "ignoring invalid EMBED_PORT"),
            }
        }
        if let Ok(val) = std::env::var("EMBED_LOG_LEVEL") {
            self.server.log_level = val;
        }
        if let Ok(val) = std::env::var("EMBED_DEVICE") {
            self.model.device = val;
        }
        if let Ok(val) = std::env::var("EMBED_MODEL_DIR") {
            self.model.cache_dir = val;
        }
    }

    /// `host:port` the HTTP listener binds to.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl ModelConfig {
    /// Resolve the model directory, expanding `~` if needed.
    pub fn resolved_cache_dir(&self) -> PathBuf {
        expand_tilde(&self.cache_dir)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}
