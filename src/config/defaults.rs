/// Configuration default values
///
/// This module contains all the default values for configuration options,
/// making them easily changeable in one central location.
// Web server defaults
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_CACHE_CONTROL_MAX_AGE: &str = "30d";

// Cache defaults
pub const DEFAULT_MEMORY_CAPACITY: usize = 100;
pub const DEFAULT_STORAGE_PATH: &str = "./data/images";
pub const DEFAULT_RESIDENT_METADATA_NAMESPACES: usize = 64;

// Tenancy defaults
pub const DEFAULT_TENANCY_ENABLED: bool = false;

// Fetch defaults
pub const DEFAULT_FETCH_TIMEOUT: &str = "15s";
pub const DEFAULT_FETCH_CONNECT_TIMEOUT: &str = "5s";
pub const DEFAULT_MAX_SOURCE_BYTES: u64 = 20 * 1024 * 1024; // 20MB

// Transform defaults
pub const DEFAULT_TRANSFORM_ENABLED: bool = true;
pub const DEFAULT_TRANSFORM_TIMEOUT: &str = "20s";
pub const DEFAULT_QUALITY: u8 = 80;
pub const DEFAULT_FORMAT: &str = "webp";
pub const DEFAULT_MAX_PIXELS: u64 = 40_000_000;
pub const DEFAULT_MAX_ALLOC_BYTES: u64 = 512 * 1024 * 1024; // 512MB
