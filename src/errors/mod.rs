//! Centralized error handling for the image cache proxy
//!
//! # Error Categories
//!
//! - **Invalid requests**: missing or malformed parameters, rejected before any I/O
//! - **Fetch errors**: origin unreachable, timed out, non-success or empty
//! - **Transform errors**: decode/encode failures, handled by the degradation policy
//! - **Storage errors**: cache tier failures, logged and never surfaced to clients
//!
//! # Usage
//!
//! ```rust
//! use image_cache_proxy::errors::{AppError, AppResult};
//!
//! fn example_function() -> AppResult<String> {
//!     Err(AppError::invalid_request("url", "missing"))
//! }
//! ```

pub mod types;

pub use types::*;

/// Convenience type alias for Results using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Convenience type alias for fetch Results
pub type FetchResult<T> = Result<T, FetchError>;

/// Convenience type alias for transform Results
pub type TransformResult<T> = Result<T, TransformError>;

/// Convenience type alias for storage Results
pub type StorageResult<T> = Result<T, StorageError>;
