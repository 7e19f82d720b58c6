//! Error types for the embedding pipeline.

use thiserror::Error;

use crate::utils::retry::Retryable;

/// Errors raised by a single call to an embedding provider.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EmbeddingError {
    #[error("embedding request timed out")]
    Timeout,

    #[error("rate limited by embedding provider: {0}")]
    RateLimited(String),

    #[error("embedding server error (status {status}): {message}")]
    ServerError { status: u16, message: String },

    #[error("failed to connect to embedding provider: {0}")]
    ConnectionError(String),

    #[error("authentication rejected by embedding provider: {0}")]
    AuthError(String),

    #[error("embedding request rejected (status {status}): {message}")]
    BadRequest { status: u16, message: String },

    #[error("invalid embedding response: {0}")]
    ParseError(String),

    #[error("timed out waiting {0}s for a free request slot")]
    GateTimeout(u64),

    #[error("batch task failed: {0}")]
    TaskFailed(String),

    #[error("embedding cancelled")]
    Cancelled,
}

impl EmbeddingError {
    /// Map a non-success HTTP status and its body to an error.
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let message = body.into();
        match status {
            408 => EmbeddingError::Timeout,
            429 => EmbeddingError::RateLimited(message),
            401 | 403 => EmbeddingError::AuthError(message),
            500..=599 => EmbeddingError::ServerError { status, message },
            _ => EmbeddingError::BadRequest { status, message },
        }
    }
}

impl From<reqwest::Error> for EmbeddingError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            EmbeddingError::Timeout
        } else if e.is_body() {
            EmbeddingError::ConnectionError(e.to_string())
        } else if e.is_decode() {
            EmbeddingError::ParseError(e.to_string())
        } else if let Some(status) = e.status() {
            EmbeddingError::from_status(status.as_u16(), e.to_string())
        } else {
            // connect, request-body and redirect failures all surface as
            // transport problems
            EmbeddingError::ConnectionError(e.to_string())
        }
    }
}

impl Retryable for EmbeddingError {
    fn is_retryable(&self) -> bool {
        match self {
            EmbeddingError::Timeout
            | EmbeddingError::RateLimited(_)
            | EmbeddingError::ServerError { .. }
            | EmbeddingError::ConnectionError(_) => true,
            EmbeddingError::AuthError(_)
            | EmbeddingError::BadRequest { .. }
            | EmbeddingError::ParseError(_)
            | EmbeddingError::GateTimeout(_)
            | EmbeddingError::TaskFailed(_)
            | EmbeddingError::Cancelled => false,
        }
    }
}

/// Errors related to configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParseError(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),

    #[error("path error: {0}")]
    PathError(String),

    #[error("validation error: {0}")]
    ValidationError(String),
}

/// Errors that stop a pipeline invocation from producing a result at all.
///
/// Per-batch failures never show up here; they become placeholder vectors.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid pipeline configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid pipeline input: {0}")]
    InvalidInput(String),

    #[error("embedding provider error: {0}")]
    Provider(#[from] EmbeddingError),
}

/// Application-level errors that wrap domain errors.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("{0}")]
    Other(String),
}
