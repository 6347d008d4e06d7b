//! Text-embedding service: dense vectors and pairwise similarity from a local
//! multilingual E5 model, served over HTTP.
//!
//! | Operation | Route | Result |
//! |-----------|-------|--------|
//! | health | `GET /health` | readiness, dimension, device, accelerator memory |
//! | embed | `POST /embed` | one vector per text, input order preserved |
//! | similarity | `POST /similarity` | full cosine similarity matrix |
//! | list models | `GET /models` | static model catalog |
//!
//! # Architecture
//!
//! - **Model provider**: one ONNX Runtime session loaded and warmed at startup,
//!   shared read-only by every request
//! - **Preprocessing**: E5 task prefixes (`query:` / `passage:`)
//! - **Pipeline**: batched encode on the blocking pool, bounded by a semaphore
//! - **Facade**: `NotReady -> Ready -> ShuttingDown` gating and request validation
//!
//! # Modules
//!
//! - [`config`]: Configuration loading from TOML files and environment variables
//! - [`embedding`]: Model trait, ONNX implementation, device selection, provider ownership
//! - [`preprocess`]: Task-prefix policy
//! - [`pipeline`]: Preprocess, encode, time, with backpressure
//! - [`similarity`]: Pairwise cosine similarity
//! - [`service`]: Lifecycle, validation, and the service operations
//! - [`api`]: axum routes and server startup

pub mod api;
pub mod config;
pub mod embedding;
pub mod pipeline;
pub mod preprocess;
pub mod service;
pub mod similarity;
pub mod types;
