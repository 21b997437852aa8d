use serde::Serialize;
use thiserror::Error;

/// Errors raised while talking to an inference backend
#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Timeout error: backend call took longer than {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Rate limit exceeded, retry after {retry_after} seconds")]
    RateLimit { retry_after: u64 },

    #[error("API error: {message} (status: {status_code})")]
    Api { status_code: u16, message: String },

    /// Error reply from a client library that does not expose the HTTP status
    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Backend '{backend}' unavailable, circuit open for another {retry_in_ms}ms")]
    BackendUnavailable { backend: String, retry_in_ms: u64 },

    #[error("Failed to decode backend response: {0}")]
    Decode(String),
}

/// Result type for inference operations
pub type InferenceResult<T> = Result<T, InferenceError>;

impl InferenceError {
    /// Check if error is transient and worth another attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            InferenceError::Network(_) => true,
            InferenceError::Timeout { .. } => true,
            InferenceError::RateLimit { .. } => true,
            InferenceError::Backend(_) => true,
            InferenceError::Api { status_code, .. } => *status_code >= 500 || *status_code == 429,
            _ => false,
        }
    }

    /// Map an HTTP status and body to the matching variant
    pub fn from_status(status_code: u16, message: impl Into<String>, retry_after: Option<u64>) -> Self {
        let message = message.into();
        match status_code {
            401 | 403 => InferenceError::Authentication(message),
            429 => InferenceError::RateLimit {
                retry_after: retry_after.unwrap_or(1),
            },
            400 | 404 | 405 | 413 | 422 => InferenceError::InvalidRequest(message),
            _ => InferenceError::Api {
                status_code,
                message,
            },
        }
    }
}

impl From<reqwest::Error> for InferenceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            // reqwest's own deadline is a safety net; the gateway timeout normally fires first
            InferenceError::Timeout { timeout_ms: 0 }
        } else if err.is_decode() {
            InferenceError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            InferenceError::from_status(status.as_u16(), err.to_string(), None)
        } else {
            InferenceError::Network(err.to_string())
        }
    }
}

/// Malformed or out-of-range advisor output, carrying the raw text for diagnosis
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[error("Parse error: {message}")]
pub struct ParseError {
    pub message: String,
    pub raw: String,
}

impl ParseError {
    pub fn new<S: Into<String>>(message: S, raw: &str) -> Self {
        Self {
            message: message.into(),
            raw: raw.to_string(),
        }
    }
}

/// Invalid market snapshot handed in by the data collaborator
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MarketStateError {
    #[error("timestamp count {timestamps} does not match candle count {candles}")]
    LengthMismatch { timestamps: usize, candles: usize },

    #[error("timestamps must be strictly ascending (index {index})")]
    Unordered { index: usize },

    #[error("Data validation error: {field} - {message}")]
    Validation { field: String, message: String },
}

impl MarketStateError {
    pub fn validation_error<S: Into<String>>(field: S, message: S) -> Self {
        MarketStateError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Configuration-time registry misuse
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    #[error("advisor '{0}' is already registered")]
    DuplicateAdvisor(String),

    #[error("advisor '{0}' is not registered")]
    AdvisorNotFound(String),

    #[error("invalid advisor '{name}': {reason}")]
    InvalidAdvisor { name: String, reason: String },
}

/// Errors surfaced by the advisory engine
#[derive(Error, Debug)]
pub enum AdvisoryError {
    #[error("artefact '{artefact}' requires field '{field}' which is absent from the market state")]
    ArtefactNotFound { artefact: String, field: String },

    #[error(transparent)]
    Inference(#[from] InferenceError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("invalid market state: {0}")]
    MarketState(#[from] MarketStateError),

    #[error("no advisor produced a usable signal ({} failures recorded)", failures.len())]
    NoAdvisorAvailable {
        failures: Vec<crate::orchestrator::AdvisorFailure>,
    },

    #[error("decision cycle cancelled")]
    Cancelled,

    #[error("decision cycle exceeded its deadline of {timeout_ms}ms")]
    DeadlineExceeded { timeout_ms: u64 },
}

/// Result type for engine operations
pub type AdvisoryResult<T> = Result<T, AdvisoryError>;

impl AdvisoryError {
    pub fn artefact_not_found<S: Into<String>>(artefact: S, field: S) -> Self {
        AdvisoryError::ArtefactNotFound {
            artefact: artefact.into(),
            field: field.into(),
        }
    }
}
