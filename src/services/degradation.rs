//! What to serve when a transformation cannot be produced
//!
//! The service applies a single policy: the original fetched bytes are served
//! untransformed, tagged `DEGRADED`, and nothing is cached. The content type
//! is sniffed from the bytes since the requested format was never produced.

use bytes::Bytes;
use tracing::warn;

use crate::errors::TransformError;
use crate::models::{CacheStatus, ServedImage};
use crate::utils::UrlUtils;

const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// Pass-through degradation policy
#[derive(Debug, Clone, Copy, Default)]
pub struct DegradationPolicy;

impl DegradationPolicy {
    /// Serve `source` as-is after a failed or unavailable transformation
    pub fn degrade(&self, source_url: &str, source: Bytes, reason: &TransformError) -> ServedImage {
        let content_type = sniff_content_type(&source);
        warn!(
            url = %UrlUtils::obfuscate_credentials(source_url),
            reason = %reason,
            content_type,
            "Serving untransformed source image"
        );
        ServedImage {
            bytes: source,
            content_type: content_type.to_string(),
            status: CacheStatus::Degraded,
        }
    }
}

/// Best-effort MIME type for raw image bytes
pub fn sniff_content_type(bytes: &[u8]) -> &'static str {
    image::guess_format(bytes)
        .map(|format| format.to_mime_type())
        .unwrap_or(FALLBACK_CONTENT_TYPE)
}
