//! Error types for the lever fleet core
//!
//! Transient network failures and malformed payloads are normally swallowed by
//! the poll scheduler; they still travel as [`LeverError`] values up to the
//! point where they are logged, so the classification helpers below decide how
//! loudly that happens.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for lever fleet operations
pub type Result<T> = std::result::Result<T, LeverError>;

/// Error types for discovery, polling, caching and configuration
#[derive(Error, Debug)]
pub enum LeverError {
    /// HTTP client errors
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing errors
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network discovery errors
    #[error("Discovery failed: {0}")]
    Discovery(String),

    /// Device answered but the payload was unusable
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// Generic I/O errors (socket bind/send/recv)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors
    #[error("Generic error: {0}")]
    Generic(#[from] anyhow::Error),

    /// Timeout errors
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Invalid input errors (caller contract violations)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Not found errors
    #[error("Not found: {0}")]
    NotFound(String),

    /// Network errors
    #[error("Network error: {0}")]
    Network(String),

    /// Worker pool closed or saturated
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),
}

/// Coarse classification used for log levels and metrics labels
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Network hiccup; the next cycle may succeed
    Transient,
    /// Device sent something we could not interpret
    Payload,
    /// Caller bug or bad configuration
    Contract,
    /// Anything else
    Internal,
}

impl LeverError {
    /// Create a configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Create a discovery error
    pub fn discovery<S: Into<String>>(msg: S) -> Self {
        Self::Discovery(msg.into())
    }

    /// Create a malformed payload error
    pub fn malformed<S: Into<String>>(msg: S) -> Self {
        Self::MalformedPayload(msg.into())
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a not found error
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a network error
    pub fn network_error<S: Into<String>>(msg: S) -> Self {
        Self::Network(msg.into())
    }

    /// Create a resource exhausted error
    pub fn resource_exhausted<S: Into<String>>(msg: S) -> Self {
        Self::ResourceExhausted(msg.into())
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Generic(anyhow::anyhow!(msg.into()))
    }

    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            LeverError::Http(e) if e.is_decode() => ErrorKind::Payload,
            LeverError::Http(_)
            | LeverError::Io(_)
            | LeverError::Timeout(_)
            | LeverError::Network(_)
            | LeverError::Discovery(_) => ErrorKind::Transient,
            LeverError::Json(_) | LeverError::MalformedPayload(_) => ErrorKind::Payload,
            LeverError::Config(_) | LeverError::InvalidInput(_) => ErrorKind::Contract,
            LeverError::NotFound(_)
            | LeverError::ResourceExhausted(_)
            | LeverError::Generic(_) => ErrorKind::Internal,
        }
    }

    /// Whether the failure is expected on an unreliable LAN
    pub fn is_transient(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transient | ErrorKind::Payload)
    }

    /// Check if error is retryable by a calling layer
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LeverError::Http(_)
                | LeverError::Io(_)
                | LeverError::Timeout(_)
                | LeverError::Network(_)
                | LeverError::ResourceExhausted(_)
        )
    }
}
