//! Transport errors.

use thiserror::Error;

/// Errors raised while talking to a platform over HTTP.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransportError {
    /// The request could not be sent or the connection failed.
    #[error("I/O error: {0}")]
    Io(String),

    /// The platform answered with a non-success status.
    #[error("HTTP {status} error: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body text.
        body: String,
    },

    /// The response body was not valid JSON.
    #[error("failed to decode response: {0}")]
    Decode(String),

    /// Invalid client configuration.
    #[error("invalid transport configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;
