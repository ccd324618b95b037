//! Request extraction and validation for the image endpoint
//!
//! Parameters are read as raw strings so every malformed value is reported
//! through the standard error envelope rather than a framework rejection.

use axum::extract::{FromRequestParts, Query};
use axum::http::request::Parts;
use serde::Deserialize;
use tracing::trace;

use super::AppState;
use crate::config::Config;
use crate::errors::{AppError, AppResult};
use crate::models::{ImageFormat, ImageRequest, TenantNamespace};
use crate::services::image_cache::normalize_quality;
use crate::utils::UrlUtils;

/// Header carrying the tenant identifier when it is not in the query string
pub const TENANT_HEADER: &str = "x-tenant-id";

/// Raw query parameters of the image endpoint
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImageQuery {
    pub url: Option<String>,
    #[serde(alias = "w")]
    pub width: Option<String>,
    #[serde(alias = "q")]
    pub quality: Option<String>,
    #[serde(alias = "f")]
    pub format: Option<String>,
    pub tenant: Option<String>,
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

impl ImageQuery {
    /// Validate and normalize into an [`ImageRequest`]
    ///
    /// `tenant_header` is consulted when the query carries no tenant.
    pub fn into_request(self, tenant_header: Option<&str>, config: &Config) -> AppResult<ImageRequest> {
        let url = non_empty(self.url.as_deref())
            .ok_or_else(|| AppError::invalid_request("url", "source url is required"))?;
        let source_url = UrlUtils::validate_source_url(url)?;

        let width = match non_empty(self.width.as_deref()) {
            None => None,
            Some(raw) => {
                let width: u32 = raw.parse().map_err(|_| {
                    AppError::invalid_request("width", format!("'{raw}' is not a positive integer"))
                })?;
                if width == 0 {
                    return Err(AppError::invalid_request("width", "width must be greater than zero"));
                }
                Some(width)
            }
        };

        let quality = match non_empty(self.quality.as_deref()) {
            None => normalize_quality(None, config.transform.default_quality),
            Some(raw) => {
                let quality: i64 = raw.parse().map_err(|_| {
                    AppError::invalid_request("quality", format!("'{raw}' is not an integer"))
                })?;
                normalize_quality(Some(quality), config.transform.default_quality)
            }
        };

        let format = match non_empty(self.format.as_deref()) {
            Some(raw) => raw.parse::<ImageFormat>()?,
            None => config.transform.default_image_format()?,
        };

        let tenant = non_empty(self.tenant.as_deref()).or_else(|| non_empty(tenant_header));
        let namespace = if config.tenancy.enabled {
            let id = tenant.ok_or_else(|| {
                AppError::invalid_request("tenant", "tenant identifier is required")
            })?;
            TenantNamespace::tenant(id)?
        } else {
            if tenant.is_some() {
                trace!("Ignoring tenant identifier, tenancy is disabled");
            }
            TenantNamespace::Global
        };

        Ok(ImageRequest {
            source_url,
            width,
            quality,
            format,
            namespace,
        })
    }
}

/// Extractor yielding a validated [`ImageRequest`]
#[derive(Debug, Clone)]
pub struct ValidatedImageRequest(pub ImageRequest);

impl FromRequestParts<AppState> for ValidatedImageRequest {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Query(query) = Query::<ImageQuery>::try_from_uri(&parts.uri)
            .map_err(|e| AppError::invalid_request("query", e.body_text()))?;
        let tenant_header = parts
            .headers
            .get(TENANT_HEADER)
            .and_then(|value| value.to_str().ok());

        query
            .into_request(tenant_header, &state.config)
            .map(Self)
    }
}
