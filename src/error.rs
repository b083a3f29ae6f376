/// Centralized error types for the sync engine
use thiserror::Error;

use crate::types::Period;

#[derive(Error, Debug)]
pub enum SyncError {
    // Calendar Errors
    #[error("Invalid date: {0}")]
    InvalidDate(String),

    // Network Errors
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request timeout: {0}")]
    Timeout(String),

    #[error("Unexpected HTTP status {status} from {url}")]
    HttpStatus { status: u16, url: String },

    // Source Errors
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Request rejected by source: {0}")]
    Rejected(String),

    #[error("Fetch of {period} failed after {attempts} attempt(s): {source}")]
    FetchFailed {
        period: Period,
        attempts: u32,
        #[source]
        source: Box<SyncError>,
    },

    // Persistence Errors
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    // Configuration Errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Config parse failed: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, SyncError>;

impl SyncError {
    /// Transient failures worth another attempt against the same source
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::Http(_)
                | SyncError::Transport(_)
                | SyncError::Timeout(_)
                | SyncError::HttpStatus { .. }
                | SyncError::MalformedResponse(_)
        )
    }

    /// Errors that must abort the whole run rather than a single key
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::Config(_) | SyncError::Toml(_))
    }

    /// Wrap any other failure as a persistence error for the owning key
    pub fn into_persistence(self) -> SyncError {
        match self {
            SyncError::Persistence(_) => self,
            other => SyncError::Persistence(other.to_string()),
        }
    }

    /// Get error code for logging/monitoring
    pub fn error_code(&self) -> &str {
        match self {
            SyncError::InvalidDate(_) => "CAL_001",
            SyncError::Http(_) => "NET_001",
            SyncError::Transport(_) => "NET_002",
            SyncError::Timeout(_) => "NET_003",
            SyncError::HttpStatus { .. } => "NET_004",
            SyncError::MalformedResponse(_) => "SRC_001",
            SyncError::Rejected(_) => "SRC_002",
            SyncError::FetchFailed { .. } => "SRC_003",
            SyncError::Persistence(_) => "STORE_001",
            SyncError::Io(_) => "STORE_002",
            SyncError::Csv(_) => "STORE_003",
            SyncError::Json(_) => "STORE_004",
            SyncError::Config(_) => "CFG_001",
            SyncError::Toml(_) => "CFG_002",
        }
    }
}
