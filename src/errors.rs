// Copyright (c) 2025 - Cowboy AI, Inc.
//! Error types for resilient messaging operations

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur in messaging operations
#[derive(Debug, Error)]
pub enum MessagingError {
    /// Network or broker failure talking to the transport
    #[error("Transport error: {0}")]
    Transport(String),

    /// The circuit breaker rejected the call without invoking it
    #[error("Circuit breaker '{breaker}' is open, retry after {retry_after:?}")]
    CircuitOpen {
        /// Name of the breaker that rejected the call
        breaker: String,
        /// Remaining time until the breaker will allow a probe
        retry_after: Duration,
    },

    /// Every retry attempt failed
    #[error("Operation failed after {attempts} attempts: {last_error}")]
    RetryExhausted {
        /// Number of attempts made
        attempts: u32,
        /// Message of the last underlying error
        last_error: String,
        /// The last underlying error
        source: Box<MessagingError>,
    },

    /// Malformed configuration or arguments
    #[error("Validation error: {0}")]
    Validation(String),

    /// A subscriber handler failed
    #[error("Handler error for '{event_type}': {message}")]
    Handler {
        /// Event type the handler was registered for
        event_type: String,
        /// Failure reported by the handler
        message: String,
    },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Result type for messaging operations
pub type MessagingResult<T> = Result<T, MessagingError>;

impl MessagingError {
    /// Whether retrying the failed operation can succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, MessagingError::Transport(_))
    }

    /// Whether the error came from an open circuit breaker
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, MessagingError::CircuitOpen { .. })
    }

    /// The innermost error, following `RetryExhausted` wrappers
    pub fn root_cause(&self) -> &MessagingError {
        match self {
            MessagingError::RetryExhausted { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

impl From<serde_json::Error> for MessagingError {
    fn from(err: serde_json::Error) -> Self {
        MessagingError::Serialization(err.to_string())
    }
}
