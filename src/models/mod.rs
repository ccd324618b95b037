pub mod image_request;

pub use image_request::{CacheEntry, CacheStatus, ImageFormat, ImageRequest, ServedImage, TenantNamespace};
