//! Backend collaborator interfaces
//!
//! The pipeline never talks to a model directly. Condensation, free-form
//! generation and audio transcription are injected behind these traits so the
//! model handle can be created once at startup and swapped for mocks in tests.

use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

/// Error types for backend calls
#[derive(Debug, Error)]
pub enum BackendError {
    /// Backend not reachable (e.g., Ollama not running)
    #[error("Provider unavailable: {0}")]
    Unavailable(String),
    /// API key missing or rejected
    #[error("Authentication failed: {0}")]
    Authentication(String),
    /// Request failed (network, timeout, non-success status)
    #[error("Request failed: {0}")]
    RequestFailed(String),
    /// Response could not be decoded
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    /// Request rejected before it was sent
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Length-bounded summarization of a single piece of text.
///
/// `max_length` and `min_length` are output bounds in cost units.
#[async_trait]
pub trait Condenser: Send + Sync {
    async fn condense(
        &self,
        text: &str,
        max_length: usize,
        min_length: usize,
    ) -> Result<String, BackendError>;
}

/// Free-form text generation from a single prompt
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, BackendError>;
}

/// Speech-to-text over a buffered audio file
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio_path: &Path) -> Result<String, BackendError>;
}
