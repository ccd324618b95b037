//! Error type definitions for the image cache proxy
//!
//! Errors are plain data (messages rather than wrapped library errors) so a
//! single result can be shared between every request waiting on the same
//! in-flight transformation.

use thiserror::Error;

/// Top-level application error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Missing or malformed request parameter, rejected before any I/O
    #[error("Invalid request: {field} - {message}")]
    InvalidRequest { field: String, message: String },

    /// Retrieving the source image failed
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// The transformer could not produce an image
    #[error("Transform error: {0}")]
    Transform(#[from] TransformError),

    /// Reading or writing a cache tier failed
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Outbound fetch errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Connection level failure (DNS, TLS, reset)
    #[error("Network error fetching {url}: {message}")]
    Network { url: String, message: String },

    /// Origin did not answer within the configured timeout
    #[error("Timed out fetching {url}")]
    Timeout { url: String },

    /// Origin answered with a non-success status
    #[error("Upstream returned HTTP {status} for {url}")]
    UpstreamStatus { url: String, status: u16 },

    /// Origin answered successfully with no body
    #[error("Upstream returned an empty body for {url}")]
    EmptyUpstreamResponse { url: String },

    /// Source exceeded the configured byte budget
    #[error("Source {url} exceeds {limit} bytes")]
    TooLarge { url: String, limit: u64 },
}

/// Transformer errors, always resolved by the degradation policy
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransformError {
    /// No transformer was configured at startup
    #[error("Image transformer is unavailable")]
    Unavailable,

    #[error("Failed to decode source image: {message}")]
    Decode { message: String },

    #[error("Failed to encode {format} image: {message}")]
    Encode { format: String, message: String },

    #[error("Transformer produced no output")]
    EmptyOutput,

    #[error("Transformation exceeded {seconds}s")]
    Timeout { seconds: u64 },

    /// The blocking worker panicked or was cancelled
    #[error("Transform worker failed: {message}")]
    Worker { message: String },
}

/// Persistent tier errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("I/O error on {path}: {message}")]
    Io { path: String, message: String },

    #[error("Metadata serialization failed: {message}")]
    Serialization { message: String },
}

/// Convenience methods for creating common error types
impl AppError {
    /// Create an invalid request error for a parameter
    pub fn invalid_request<F: Into<String>, M: Into<String>>(field: F, message: M) -> Self {
        Self::InvalidRequest {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl StorageError {
    /// Create an I/O error for a path
    pub fn io(path: &std::path::Path, error: &std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            message: error.to_string(),
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization {
            message: error.to_string(),
        }
    }
}
