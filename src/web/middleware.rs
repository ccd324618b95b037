//! HTTP middleware

use axum::{
    extract::Request,
    http::{HeaderName, HeaderValue, Method, Uri},
    middleware::Next,
    response::Response,
};
use std::time::Instant;
use tracing::{debug, warn};

/// Request logging middleware
///
/// Logs every request with its status, duration and cache status when present
pub async fn request_logging_middleware(
    method: Method,
    uri: Uri,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let response = next.run(request).await;
    let status = response.status().as_u16();
    let duration = start.elapsed();
    let cache_status = response
        .headers()
        .get(super::handlers::images::CACHE_STATUS_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();

    // The query string may carry credentials for the source URL
    let path = uri.path();
    if status >= 400 {
        warn!(
            method = %method,
            path = %path,
            status = status,
            duration_ms = duration.as_millis(),
            "HTTP request completed with error"
        );
    } else {
        debug!(
            method = %method,
            path = %path,
            status = status,
            cache_status = %cache_status,
            duration_ms = duration.as_millis(),
            "HTTP request completed"
        );
    }

    response
}

/// Security headers middleware
pub async fn security_headers_middleware(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    headers.insert(
        HeaderName::from_static("x-content-type-options"),
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        HeaderName::from_static("x-frame-options"),
        HeaderValue::from_static("DENY"),
    );
    headers.insert(
        HeaderName::from_static("referrer-policy"),
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    headers.insert(
        HeaderName::from_static("content-security-policy"),
        HeaderValue::from_static("default-src 'none'; img-src 'self' data:; frame-ancestors 'none'"),
    );

    response
}
