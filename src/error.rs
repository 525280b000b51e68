//! Common error types for the image generation broker

use serde::Serialize;
use thiserror::Error;

/// Broker-wide error type
#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Rate limit exceeded for backend '{backend}'")]
    RateLimitExceeded { backend: String },

    #[error("Backend '{backend}' error: {message}")]
    Backend {
        backend: String,
        message: String,
        retryable: bool,
    },

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Retries exhausted after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<BrokerError>,
    },

    #[error("No compatible backend: {0}")]
    NoCompatibleBackend(String),

    #[error("All candidate backends failed: {}", format_attempts(.attempts))]
    AllBackendsFailed { attempts: Vec<AttemptFailure> },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// One failed backend attempt, recorded for the aggregated error
#[derive(Debug, Clone)]
pub struct AttemptFailure {
    pub backend: String,
    pub reason: String,
}

fn format_attempts(attempts: &[AttemptFailure]) -> String {
    attempts
        .iter()
        .map(|a| format!("{} ({})", a.backend, a.reason))
        .collect::<Vec<_>>()
        .join(", ")
}

impl BrokerError {
    /// Whether a failure is transient and worth trying again, either against
    /// the same backend (Retry Executor) or the next candidate (fallback).
    pub fn is_retryable(&self) -> bool {
        match self {
            BrokerError::InvalidRequest(_) => false,
            BrokerError::Configuration(_) => false,
            BrokerError::NoCompatibleBackend(_) => false,
            BrokerError::RateLimitExceeded { .. } => true,
            BrokerError::Backend { retryable, .. } => *retryable,
            BrokerError::Timeout(_) => true,
            // Inherits the classification of the last underlying failure.
            BrokerError::RetriesExhausted { source, .. } => source.is_retryable(),
            BrokerError::AllBackendsFailed { .. } => false,
            BrokerError::Io(_) => false,
            BrokerError::Json(_) => false,
            BrokerError::HttpClient(e) => e.is_timeout() || e.is_connect(),
        }
    }

    /// Stable machine-readable kind tag for the wire form
    pub fn kind(&self) -> &'static str {
        match self {
            BrokerError::InvalidRequest(_) => "invalid_request",
            BrokerError::Configuration(_) => "configuration_error",
            BrokerError::RateLimitExceeded { .. } => "rate_limit_exceeded",
            BrokerError::Backend { .. } => "backend_error",
            BrokerError::Timeout(_) => "timeout",
            BrokerError::RetriesExhausted { .. } => "retries_exhausted",
            BrokerError::NoCompatibleBackend(_) => "no_compatible_backend",
            BrokerError::AllBackendsFailed { .. } => "all_backends_failed",
            BrokerError::Io(_) => "io_error",
            BrokerError::Json(_) => "invalid_json",
            BrokerError::HttpClient(_) => "backend_error",
        }
    }

    /// Structured form handed across the protocol boundary
    pub fn to_wire(&self) -> ErrorBody {
        ErrorBody {
            kind: self.kind().to_string(),
            message: self.to_string(),
            retryable: self.is_retryable(),
        }
    }

    /// Shorthand for a backend failure with explicit classification
    pub fn backend<M: Into<String>>(backend: &str, message: M, retryable: bool) -> Self {
        Self::Backend {
            backend: backend.to_string(),
            message: message.into(),
            retryable,
        }
    }
}

/// Classify an upstream HTTP status: throttling and server-side failures are
/// transient, the rest of the 4xx space is a permanent request problem.
pub fn retryable_status(status: reqwest::StatusCode) -> bool {
    status.as_u16() == 429 || status.is_server_error()
}

/// Structured error format crossing the protocol boundary
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
    pub retryable: bool,
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, BrokerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(!BrokerError::InvalidRequest("empty prompt".into()).is_retryable());
        assert!(!BrokerError::Configuration("no key".into()).is_retryable());
        assert!(BrokerError::Timeout("poll budget".into()).is_retryable());
        assert!(BrokerError::backend("stability", "503", true).is_retryable());
        assert!(!BrokerError::backend("stability", "bad prompt", false).is_retryable());
    }

    #[test]
    fn test_exhaustion_inherits_classification() {
        let inner = BrokerError::backend("openai", "throttled", true);
        let err = BrokerError::RetriesExhausted {
            attempts: 3,
            source: Box::new(inner),
        };
        assert!(err.is_retryable());
        assert_eq!(err.kind(), "retries_exhausted");
    }

    #[test]
    fn test_status_classification() {
        use reqwest::StatusCode;
        assert!(retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(retryable_status(StatusCode::BAD_GATEWAY));
        assert!(!retryable_status(StatusCode::BAD_REQUEST));
        assert!(!retryable_status(StatusCode::UNAUTHORIZED));
    }

    #[test]
    fn test_wire_form() {
        let wire = BrokerError::RateLimitExceeded {
            backend: "fal".into(),
        }
        .to_wire();
        assert_eq!(wire.kind, "rate_limit_exceeded");
        assert!(wire.retryable);
    }
}
