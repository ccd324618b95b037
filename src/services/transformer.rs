//! Image transformation
//!
//! [`ImageCodecTransformer`] decodes with the `image` crate under a pixel and
//! allocation budget, shrinks to the requested width (never enlarging) and
//! re-encodes. Work runs on the blocking pool and is bounded by a timeout.

use async_trait::async_trait;
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::webp::WebPEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageReader, Limits};
use std::io::Cursor;
use std::time::Duration;
use tracing::trace;

use crate::config::TransformConfig;
use crate::errors::{TransformError, TransformResult};
use crate::models::ImageFormat;

/// Parameters for a single transformation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransformParams {
    /// Target width; `None` keeps the source width
    pub width: Option<u32>,
    /// Encoder quality within 1..=100, honoured by JPEG only
    pub quality: u8,
    pub format: ImageFormat,
}

/// Turns source bytes into encoded output bytes
#[async_trait]
pub trait ImageTransformer: Send + Sync {
    async fn transform(&self, source: Bytes, params: TransformParams) -> TransformResult<Bytes>;
}

#[derive(Debug, Clone)]
pub struct ImageCodecTransformer {
    max_pixels: u64,
    max_alloc_bytes: u64,
    timeout: Duration,
}

impl ImageCodecTransformer {
    pub fn new(config: &TransformConfig) -> Self {
        Self {
            max_pixels: config.max_pixels,
            max_alloc_bytes: config.max_alloc_bytes,
            timeout: config.timeout,
        }
    }

    fn decode(&self, source: &[u8]) -> TransformResult<DynamicImage> {
        let decode_error = |e: image::ImageError| TransformError::Decode {
            message: e.to_string(),
        };
        let io_error = |e: std::io::Error| TransformError::Decode {
            message: e.to_string(),
        };

        // Header-only pass to reject decompression bombs before allocating
        let (width, height) = ImageReader::new(Cursor::new(source))
            .with_guessed_format()
            .map_err(io_error)?
            .into_dimensions()
            .map_err(decode_error)?;
        let pixels = u64::from(width) * u64::from(height);
        if pixels == 0 {
            return Err(TransformError::Decode {
                message: "source image has no pixels".to_string(),
            });
        }
        if pixels > self.max_pixels {
            return Err(TransformError::Decode {
                message: format!(
                    "source image is {width}x{height}, exceeding the {} pixel budget",
                    self.max_pixels
                ),
            });
        }

        let mut limits = Limits::default();
        limits.max_alloc = Some(self.max_alloc_bytes);

        let mut reader = ImageReader::new(Cursor::new(source))
            .with_guessed_format()
            .map_err(io_error)?;
        reader.limits(limits);
        reader.decode().map_err(decode_error)
    }

    fn run(&self, source: &[u8], params: TransformParams) -> TransformResult<Bytes> {
        let image = self.decode(source)?;
        let image = shrink_to_width(image, params.width);
        let encoded = encode(&image, params)?;
        if encoded.is_empty() {
            return Err(TransformError::EmptyOutput);
        }
        trace!(
            width = image.width(),
            height = image.height(),
            format = %params.format,
            size = encoded.len(),
            "Encoded image"
        );
        Ok(Bytes::from(encoded))
    }
}

#[async_trait]
impl ImageTransformer for ImageCodecTransformer {
    async fn transform(&self, source: Bytes, params: TransformParams) -> TransformResult<Bytes> {
        let worker = self.clone();
        let task = tokio::task::spawn_blocking(move || worker.run(&source, params));

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(TransformError::Worker {
                message: if join_error.is_panic() {
                    "transform worker panicked".to_string()
                } else {
                    join_error.to_string()
                },
            }),
            // The blocking thread runs to completion; its output is discarded
            Err(_) => Err(TransformError::Timeout {
                seconds: self.timeout.as_secs(),
            }),
        }
    }
}

/// Resize to `target` width preserving aspect ratio; never enlarges
fn shrink_to_width(image: DynamicImage, target: Option<u32>) -> DynamicImage {
    let Some(target) = target else {
        return image;
    };
    let (width, height) = (image.width(), image.height());
    if target >= width {
        return image;
    }
    let scaled = (u64::from(height) * u64::from(target) + u64::from(width) / 2) / u64::from(width);
    let new_height = u32::try_from(scaled).unwrap_or(u32::MAX).max(1);
    image.resize_exact(target, new_height, FilterType::Lanczos3)
}

fn encode(image: &DynamicImage, params: TransformParams) -> TransformResult<Vec<u8>> {
    let encode_error = |e: image::ImageError| TransformError::Encode {
        format: params.format.to_string(),
        message: e.to_string(),
    };

    let mut buffer = Vec::new();
    match params.format {
        ImageFormat::Jpeg => {
            // JPEG has no alpha channel
            let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
            let encoder = JpegEncoder::new_with_quality(&mut buffer, params.quality.clamp(1, 100));
            rgb.write_with_encoder(encoder).map_err(encode_error)?;
        }
        ImageFormat::WebP => {
            let prepared = if image.color().has_alpha() {
                DynamicImage::ImageRgba8(image.to_rgba8())
            } else {
                DynamicImage::ImageRgb8(image.to_rgb8())
            };
            let encoder = WebPEncoder::new_lossless(&mut buffer);
            prepared.write_with_encoder(encoder).map_err(encode_error)?;
        }
        ImageFormat::Png => {
            image
                .write_to(&mut Cursor::new(&mut buffer), image::ImageFormat::Png)
                .map_err(encode_error)?;
        }
    }
    Ok(buffer)
}
