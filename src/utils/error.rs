use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Page load failed for {url} after {attempts} attempts: {message}")]
    PageLoad {
        url: String,
        attempts: u32,
        message: String,
    },

    #[error("Rate limited by {service}")]
    RateLimited { service: String },

    #[error("Unexpected HTTP status {status} from {service}")]
    UnexpectedStatus { status: u16, service: String },

    #[error("Missing API key for {service}")]
    MissingApiKey { service: String },

    #[error("Element not found: {selector}")]
    ElementNotFound { selector: String },

    #[error("Invalid URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },

    #[error("No data: {0}")]
    NoData(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification shared by every stage so callers can decide
/// between retrying, degrading and giving up.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transient,
    RateLimited,
    ExtractionMiss,
    Implausible,
    Configuration,
    NoData,
    Fatal,
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Http(e) if e.is_timeout() || e.is_connect() => ErrorKind::Transient,
            AppError::Http(_) => ErrorKind::Fatal,
            AppError::PageLoad { .. } => ErrorKind::Transient,
            AppError::RateLimited { .. } => ErrorKind::RateLimited,
            AppError::Config(_) | AppError::MissingApiKey { .. } | AppError::InvalidUrl { .. } => {
                ErrorKind::Configuration
            }
            AppError::ElementNotFound { .. } => ErrorKind::ExtractionMiss,
            AppError::NoData(_) => ErrorKind::NoData,
            AppError::Browser(_)
            | AppError::UnexpectedStatus { .. }
            | AppError::Serialization(_)
            | AppError::Io(_)
            | AppError::Internal(_) => ErrorKind::Fatal,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, AppError::RateLimited { .. })
    }
}

/// A stage failure captured as data at the stage boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageFailure {
    pub kind: ErrorKind,
    pub reason: String,
}

impl StageFailure {
    pub fn new(kind: ErrorKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }
}

impl StageFailure {
    /// Failure for a stage whose task panicked. The panic message becomes
    /// the reason when it is a string.
    pub fn from_panic(stage: &str, payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        StageFailure::new(ErrorKind::Fatal, format!("{} stage panicked: {}", stage, message))
    }
}

impl std::fmt::Display for StageFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.reason)
    }
}

impl From<AppError> for StageFailure {
    fn from(err: AppError) -> Self {
        StageFailure::new(err.kind(), err.to_string())
    }
}

/// Every stage operation returns one of these instead of propagating errors.
pub type StageResult<T> = std::result::Result<T, StageFailure>;

// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;
