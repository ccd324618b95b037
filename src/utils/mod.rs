//! Utility modules shared across the service

pub mod url;

pub use url::UrlUtils;
