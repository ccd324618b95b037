//! Shared fixtures for HTTP-level tests

#![allow(dead_code)]

use async_trait::async_trait;
use axum_test::TestServer;
use bytes::Bytes;
use image::{DynamicImage, Rgb, RgbImage};
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use image_cache_proxy::{
    config::Config,
    errors::{FetchError, FetchResult},
    services::{ImageCodecTransformer, ImageOrchestrator, ImageTransformer, SourceFetcher},
    web::{AppState, WebServer},
};

pub const SOURCE_URL: &str = "https://example.com/a.png";

/// A real PNG of the given size with a simple gradient
pub fn png_bytes(width: u32, height: u32) -> Bytes {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, 128])
    });
    let mut buffer = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buffer), image::ImageFormat::Png)
        .unwrap();
    Bytes::from(buffer)
}

/// Fetcher serving a fixed body (or a fixed upstream status) and counting calls
pub struct CountingFetcher {
    body: Bytes,
    fail_status: Option<u16>,
    delay: Duration,
    calls: AtomicUsize,
}

impl CountingFetcher {
    pub fn serving(body: Bytes) -> Arc<Self> {
        Arc::new(Self {
            body,
            fail_status: None,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn slow(body: Bytes, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            body,
            fail_status: None,
            delay,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing(status: u16) -> Arc<Self> {
        Arc::new(Self {
            body: Bytes::new(),
            fail_status: Some(status),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceFetcher for CountingFetcher {
    async fn fetch(&self, url: &str) -> FetchResult<Bytes> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match self.fail_status {
            Some(status) => Err(FetchError::UpstreamStatus {
                url: url.to_string(),
                status,
            }),
            None => Ok(self.body.clone()),
        }
    }
}

pub fn test_config(storage: &Path, tenancy: bool) -> Config {
    let mut config = Config::default();
    config.cache.storage_path = storage.to_path_buf();
    config.tenancy.enabled = tenancy;
    config
}

/// Test server wired with the real transformer and the given fetcher
pub fn server_with(config: Config, fetcher: Arc<CountingFetcher>) -> TestServer {
    let transformer: Arc<dyn ImageTransformer> =
        Arc::new(ImageCodecTransformer::new(&config.transform));
    server_with_transformer(config, fetcher, Some(transformer))
}

pub fn server_with_transformer(
    config: Config,
    fetcher: Arc<CountingFetcher>,
    transformer: Option<Arc<dyn ImageTransformer>>,
) -> TestServer {
    let orchestrator = Arc::new(ImageOrchestrator::new(&config, fetcher, transformer));
    let app = WebServer::create_router(AppState::new(config, orchestrator));
    TestServer::new(app).unwrap()
}

/// Build `/image?...` with the source URL percent-encoded
pub fn image_path(source_url: &str, extra: &str) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(source_url.as_bytes()).collect();
    if extra.is_empty() {
        format!("/image?url={encoded}")
    } else {
        format!("/image?url={encoded}&{extra}")
    }
}
