//! Image retrieval handler

use axum::{
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};

use crate::errors::AppError;
use crate::models::{CacheStatus, ServedImage};
use crate::web::{AppState, extractors::ValidatedImageRequest};

/// Response header reporting which tier produced the body
pub const CACHE_STATUS_HEADER: &str = "x-cache-status";

/// Fetch, transform and serve an image
///
/// Query parameters: `url` (required), `width`/`w`, `quality`/`q`,
/// `format`/`f` and `tenant` (or the `X-Tenant-Id` header).
pub async fn serve_image(
    State(state): State<AppState>,
    ValidatedImageRequest(request): ValidatedImageRequest,
) -> Result<Response, AppError> {
    let served = state.orchestrator.serve(request).await?;
    let headers = image_headers(&served, state.config.web.cache_control_max_age.as_secs());
    Ok((StatusCode::OK, headers, served.bytes).into_response())
}

fn image_headers(served: &ServedImage, max_age_secs: u64) -> HeaderMap {
    let mut headers = HeaderMap::new();

    let content_type = HeaderValue::from_str(&served.content_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
    headers.insert(header::CONTENT_TYPE, content_type);

    // Degraded bodies are not what was asked for; do not let clients keep them
    let cache_control = match served.status {
        CacheStatus::Degraded => HeaderValue::from_static("no-store"),
        _ => HeaderValue::from_str(&format!("public, max-age={max_age_secs}"))
            .unwrap_or_else(|_| HeaderValue::from_static("public")),
    };
    headers.insert(header::CACHE_CONTROL, cache_control);

    headers.insert(
        HeaderName::from_static(CACHE_STATUS_HEADER),
        HeaderValue::from_static(served.status.as_str()),
    );
    headers
}
