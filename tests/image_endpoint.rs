//! HTTP-level behaviour of the image endpoint

mod common;

use axum::http::{HeaderName, HeaderValue, StatusCode};
use bytes::Bytes;
use image::GenericImageView;
use serde_json::Value;
use std::future::IntoFuture;
use std::time::Duration;
use tempfile::TempDir;

use common::{
    CountingFetcher, SOURCE_URL, image_path, png_bytes, server_with, server_with_transformer,
    test_config,
};

fn tenant_header(id: &'static str) -> (HeaderName, HeaderValue) {
    (
        HeaderName::from_static("x-tenant-id"),
        HeaderValue::from_static(id),
    )
}

#[tokio::test]
async fn test_miss_then_hit_returns_identical_bytes() {
    let storage = TempDir::new().unwrap();
    let fetcher = CountingFetcher::serving(png_bytes(400, 300));
    let server = server_with(test_config(storage.path(), false), fetcher.clone());
    let path = image_path(SOURCE_URL, "width=200&quality=70&format=webp");

    let first = server.get(&path).await;
    first.assert_status(StatusCode::OK);
    assert_eq!(first.header("x-cache-status"), "MISS");
    assert_eq!(first.header("content-type"), "image/webp");
    assert!(
        first
            .header("cache-control")
            .to_str()
            .unwrap()
            .starts_with("public, max-age=")
    );

    let decoded = image::load_from_memory(first.as_bytes()).unwrap();
    assert_eq!(decoded.dimensions(), (200, 150));

    let second = server.get(&path).await;
    second.assert_status(StatusCode::OK);
    assert_eq!(second.header("x-cache-status"), "HIT");
    assert_eq!(first.as_bytes(), second.as_bytes());
    assert_eq!(fetcher.calls(), 1);
}

#[tokio::test]
async fn test_versioned_route_and_short_aliases() {
    let storage = TempDir::new().unwrap();
    let fetcher = CountingFetcher::serving(png_bytes(64, 64));
    let server = server_with(test_config(storage.path(), false), fetcher.clone());

    let long = image_path(SOURCE_URL, "width=32&quality=90&format=jpeg");
    let short = image_path(SOURCE_URL, "w=32&q=90&f=jpg").replace("/image", "/api/v1/image");

    let first = server.get(&long).await;
    assert_eq!(first.header("x-cache-status"), "MISS");
    assert_eq!(first.header("content-type"), "image/jpeg");

    // Same normalized parameters, so the same cache entry
    let second = server.get(&short).await;
    assert_eq!(second.header("x-cache-status"), "HIT");
    assert_eq!(fetcher.calls(), 1);
}

#[tokio::test]
async fn test_disk_hit_after_restart() {
    let storage = TempDir::new().unwrap();
    let path = image_path(SOURCE_URL, "width=100");

    let first_fetcher = CountingFetcher::serving(png_bytes(300, 200));
    let first = server_with(test_config(storage.path(), false), first_fetcher)
        .get(&path)
        .await;
    assert_eq!(first.header("x-cache-status"), "MISS");

    let fetcher = CountingFetcher::serving(png_bytes(300, 200));
    let restarted = server_with(test_config(storage.path(), false), fetcher.clone());
    let second = restarted.get(&path).await;

    assert_eq!(second.header("x-cache-status"), "DISK_HIT");
    assert_eq!(first.as_bytes(), second.as_bytes());
    assert_eq!(fetcher.calls(), 0);
}

#[tokio::test]
async fn test_missing_url_is_rejected_before_fetching() {
    let storage = TempDir::new().unwrap();
    let fetcher = CountingFetcher::serving(png_bytes(10, 10));
    let server = server_with(test_config(storage.path(), false), fetcher.clone());

    let response = server.get("/image?width=200").await;
    response.assert_status(StatusCode::BAD_REQUEST);

    let body: Value = response.json();
    assert_eq!(body["success"], false);
    assert!(body["details"]["url"].is_string());
    assert_eq!(fetcher.calls(), 0);
}

#[tokio::test]
async fn test_malformed_parameters_are_rejected() {
    let storage = TempDir::new().unwrap();
    let fetcher = CountingFetcher::serving(png_bytes(10, 10));
    let server = server_with(test_config(storage.path(), false), fetcher.clone());

    for extra in ["width=0", "width=wide", "quality=best", "format=tiff"] {
        let response = server.get(&image_path(SOURCE_URL, extra)).await;
        response.assert_status(StatusCode::BAD_REQUEST);
    }
    let response = server.get(&image_path("file:///etc/passwd", "")).await;
    response.assert_status(StatusCode::BAD_REQUEST);

    assert_eq!(fetcher.calls(), 0);
}

#[tokio::test]
async fn test_tenant_required_in_tenant_mode() {
    let storage = TempDir::new().unwrap();
    let fetcher = CountingFetcher::serving(png_bytes(10, 10));
    let server = server_with(test_config(storage.path(), true), fetcher.clone());

    let response = server.get(&image_path(SOURCE_URL, "")).await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert!(body["details"]["tenant"].is_string());
    assert_eq!(fetcher.calls(), 0);
}

#[tokio::test]
async fn test_tenant_fallback_serves_first_recorded_format() {
    let storage = TempDir::new().unwrap();
    let fetcher = CountingFetcher::serving(png_bytes(500, 500));
    let server = server_with(test_config(storage.path(), true), fetcher.clone());
    let (name, value) = tenant_header("acme");

    let first = server
        .get(&image_path(SOURCE_URL, "width=200&format=png"))
        .add_header(name.clone(), value.clone())
        .await;
    assert_eq!(first.header("x-cache-status"), "MISS");
    assert_eq!(first.header("content-type"), "image/png");

    let second = server
        .get(&image_path(SOURCE_URL, "width=400&format=webp"))
        .add_header(name, value)
        .await;
    assert_eq!(second.header("x-cache-status"), "FALLBACK_HIT");
    assert_eq!(second.header("content-type"), "image/png");
    assert_eq!(first.as_bytes(), second.as_bytes());
    assert_eq!(fetcher.calls(), 1);

    assert!(storage.path().join("acme").join("metadata.json").exists());
}

#[tokio::test]
async fn test_other_tenant_does_not_see_fallback() {
    let storage = TempDir::new().unwrap();
    let fetcher = CountingFetcher::serving(png_bytes(50, 50));
    let server = server_with(test_config(storage.path(), true), fetcher.clone());

    server
        .get(&image_path(SOURCE_URL, "tenant=acme&width=20"))
        .await
        .assert_status(StatusCode::OK);
    let other = server
        .get(&image_path(SOURCE_URL, "tenant=globex&width=30"))
        .await;

    assert_eq!(other.header("x-cache-status"), "MISS");
    assert_eq!(fetcher.calls(), 2);
}

#[tokio::test]
async fn test_malformed_source_degrades_to_original_bytes() {
    let storage = TempDir::new().unwrap();
    let garbage = Bytes::from_static(b"this is not an image at all");
    let fetcher = CountingFetcher::serving(garbage.clone());
    let server = server_with(test_config(storage.path(), false), fetcher.clone());
    let path = image_path(SOURCE_URL, "width=100");

    let response = server.get(&path).await;
    response.assert_status(StatusCode::OK);
    assert_eq!(response.header("x-cache-status"), "DEGRADED");
    assert_eq!(response.header("content-type"), "application/octet-stream");
    assert_eq!(response.header("cache-control"), "no-store");
    assert_eq!(response.as_bytes(), &garbage);

    // Nothing was cached, so the next request goes upstream again
    let again = server.get(&path).await;
    assert_eq!(again.header("x-cache-status"), "DEGRADED");
    assert_eq!(fetcher.calls(), 2);
}

#[tokio::test]
async fn test_disabled_transformer_degrades() {
    let storage = TempDir::new().unwrap();
    let source = png_bytes(20, 20);
    let fetcher = CountingFetcher::serving(source.clone());
    let server = server_with_transformer(test_config(storage.path(), false), fetcher, None);

    let response = server.get(&image_path(SOURCE_URL, "format=webp")).await;
    assert_eq!(response.header("x-cache-status"), "DEGRADED");
    assert_eq!(response.header("content-type"), "image/png");
    assert_eq!(response.as_bytes(), &source);
}

#[tokio::test]
async fn test_upstream_failure_is_bad_gateway() {
    let storage = TempDir::new().unwrap();
    let server = server_with(test_config(storage.path(), false), CountingFetcher::failing(404));

    let response = server.get(&image_path(SOURCE_URL, "")).await;
    response.assert_status(StatusCode::BAD_GATEWAY);
    let body: Value = response.json();
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_concurrent_requests_fetch_once() {
    let storage = TempDir::new().unwrap();
    let fetcher = CountingFetcher::slow(png_bytes(120, 80), Duration::from_millis(150));
    let server = server_with(test_config(storage.path(), false), fetcher.clone());
    let path = image_path(SOURCE_URL, "width=60");

    let (a, b, c, d) = tokio::join!(
        server.get(&path).into_future(),
        server.get(&path).into_future(),
        server.get(&path).into_future(),
        server.get(&path).into_future(),
    );

    for response in [&a, &b, &c, &d] {
        response.assert_status(StatusCode::OK);
        assert_eq!(response.header("x-cache-status"), "MISS");
        assert_eq!(response.as_bytes(), a.as_bytes());
    }
    assert_eq!(fetcher.calls(), 1);
}

#[tokio::test]
async fn test_health_stats_and_security_headers() {
    let storage = TempDir::new().unwrap();
    let fetcher = CountingFetcher::serving(png_bytes(32, 32));
    let server = server_with(test_config(storage.path(), false), fetcher);

    let health = server.get("/health").await;
    health.assert_status(StatusCode::OK);
    assert_eq!(health.header("x-content-type-options"), "nosniff");
    let body: Value = health.json();
    assert_eq!(body["data"]["status"], "healthy");
    assert_eq!(body["data"]["transformer_available"], true);

    server.get(&image_path(SOURCE_URL, "")).await;
    server.get(&image_path(SOURCE_URL, "")).await;

    let stats: Value = server.get("/api/v1/cache/stats").await.json();
    assert_eq!(stats["data"]["memory"]["entries"], 1);
    assert_eq!(stats["data"]["memory"]["capacity"], 100);
    assert_eq!(stats["data"]["responses"]["miss"], 1);
    assert_eq!(stats["data"]["responses"]["hit"], 1);
    assert_eq!(stats["data"]["in_flight"], 0);
    assert_eq!(stats["data"]["tenancy_enabled"], false);
}
