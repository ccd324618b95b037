//! Image request and response domain types

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::AppError;

/// Output formats the transformer can encode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[serde(rename = "webp")]
    WebP,
    Jpeg,
    Png,
}

impl ImageFormat {
    /// Canonical lowercase name, also used in fingerprints
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WebP => "webp",
            Self::Jpeg => "jpeg",
            Self::Png => "png",
        }
    }

    /// Conventional file extension used for persisted entries
    pub fn extension(&self) -> &'static str {
        match self {
            Self::WebP => "webp",
            Self::Jpeg => "jpg",
            Self::Png => "png",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::WebP => "image/webp",
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageFormat {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "webp" => Ok(Self::WebP),
            "jpeg" | "jpg" => Ok(Self::Jpeg),
            "png" => Ok(Self::Png),
            other => Err(AppError::invalid_request(
                "format",
                format!("unsupported output format '{other}' (expected webp, jpeg or png)"),
            )),
        }
    }
}

/// Isolation boundary for persisted entries and metadata
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TenantNamespace {
    /// Shared namespace used when tenancy is disabled
    Global,
    Tenant(String),
}

impl TenantNamespace {
    /// Validate a tenant identifier; it becomes a directory name
    pub fn tenant(id: &str) -> Result<Self, AppError> {
        let id = id.trim();
        if id.is_empty() {
            return Err(AppError::invalid_request("tenant", "tenant identifier is empty"));
        }
        if id.len() > 64 {
            return Err(AppError::invalid_request(
                "tenant",
                "tenant identifier longer than 64 characters",
            ));
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(AppError::invalid_request(
                "tenant",
                "tenant identifier may only contain letters, digits, '-' and '_'",
            ));
        }
        Ok(Self::Tenant(id.to_string()))
    }

    pub fn is_tenant(&self) -> bool {
        matches!(self, Self::Tenant(_))
    }
}

impl fmt::Display for TenantNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => f.write_str("global"),
            Self::Tenant(id) => write!(f, "tenant:{id}"),
        }
    }
}

/// A validated, normalized retrieval request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRequest {
    pub source_url: String,
    /// Target width; `None` keeps the source width
    pub width: Option<u32>,
    /// Normalized quality within 1..=100
    pub quality: u8,
    pub format: ImageFormat,
    pub namespace: TenantNamespace,
}

/// Transformed bytes plus their declared format
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub bytes: Bytes,
    pub format: ImageFormat,
}

impl CacheEntry {
    pub fn new(bytes: impl Into<Bytes>, format: ImageFormat) -> Self {
        Self {
            bytes: bytes.into(),
            format,
        }
    }
}

/// Where a response came from, reported in the `X-Cache-Status` header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CacheStatus {
    Hit,
    DiskHit,
    FallbackHit,
    Miss,
    /// Transformation was not possible; original bytes were served
    Degraded,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hit => "HIT",
            Self::DiskHit => "DISK_HIT",
            Self::FallbackHit => "FALLBACK_HIT",
            Self::Miss => "MISS",
            Self::Degraded => "DEGRADED",
        }
    }
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final response payload handed to the web layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServedImage {
    pub bytes: Bytes,
    pub content_type: String,
    pub status: CacheStatus,
}

impl ServedImage {
    pub fn from_entry(entry: CacheEntry, status: CacheStatus) -> Self {
        Self {
            content_type: entry.format.mime_type().to_string(),
            bytes: entry.bytes,
            status,
        }
    }
}
