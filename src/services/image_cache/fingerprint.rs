//! Cache key derivation
//!
//! A key is the SHA-256 of a canonical rendering of
//! `(source_url, width, quality, format)`:
//!
//! - the URL is hashed as given (trimmed), length-prefixed so no other field
//!   can bleed into it
//! - an absent width renders as `original`; an explicit width never collides
//!   with it even if it equals the source width
//! - quality is always the normalized 1..=100 value, so an omitted quality and
//!   an explicit default quality produce the same key
//! - format is the canonical name, so `jpg` and `jpeg` collide

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::models::{ImageFormat, ImageRequest};

/// Opaque 64 character lowercase hex identifier
///
/// Deserialization goes through [`CacheKey::parse`], so a key read from disk
/// can never name a path outside its namespace directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Accept a previously derived key, e.g. read back from a metadata file
    pub fn parse(value: &str) -> Option<Self> {
        let valid = value.len() == 64
            && value
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));
        valid.then(|| Self(value.to_string()))
    }
}

impl TryFrom<String> for CacheKey {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("'{value}' is not a cache key"))
    }
}

impl From<CacheKey> for String {
    fn from(key: CacheKey) -> Self {
        key.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Clamp a requested quality into 1..=100, substituting the default when absent
pub fn normalize_quality(requested: Option<i64>, default_quality: u8) -> u8 {
    match requested {
        Some(q) => q.clamp(1, 100) as u8,
        None => default_quality.clamp(1, 100),
    }
}

/// Derive the cache key for a set of transform parameters
pub fn derive(source_url: &str, width: Option<u32>, quality: u8, format: ImageFormat) -> CacheKey {
    let url = source_url.trim();
    let width = width.map_or_else(|| "original".to_string(), |w| w.to_string());
    let canonical = format!(
        "{}:{}|w={}|q={}|f={}",
        url.len(),
        url,
        width,
        quality.clamp(1, 100),
        format.as_str()
    );

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    CacheKey(hex::encode(hasher.finalize()))
}

/// Derive the key for a validated request
pub fn derive_for(request: &ImageRequest) -> CacheKey {
    derive(
        &request.source_url,
        request.width,
        request.quality,
        request.format,
    )
}
