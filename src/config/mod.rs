use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

pub mod defaults;
pub mod duration_serde;

use defaults::*;

use crate::errors::AppError;
use crate::models::ImageFormat;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub tenancy: TenancyConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub transform: TransformConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Max-age advertised in `Cache-Control` for served images
    #[serde(
        default = "default_cache_control_max_age",
        with = "duration_serde::duration"
    )]
    pub cache_control_max_age: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of entries held by the in-process memory tier
    #[serde(default = "default_memory_capacity")]
    pub memory_capacity: usize,
    /// Root directory of the persistent tier
    #[serde(default = "default_storage_path")]
    pub storage_path: PathBuf,
    /// Namespaces whose metadata index stays loaded in memory
    #[serde(default = "default_resident_metadata_namespaces")]
    pub resident_metadata_namespaces: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenancyConfig {
    /// When enabled every request must carry a tenant identifier and the
    /// persistent tier is partitioned per tenant
    #[serde(default = "default_tenancy_enabled")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_fetch_timeout", with = "duration_serde::duration")]
    pub timeout: Duration,
    #[serde(
        default = "default_fetch_connect_timeout",
        with = "duration_serde::duration"
    )]
    pub connect_timeout: Duration,
    #[serde(default = "default_max_source_bytes")]
    pub max_source_bytes: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformConfig {
    /// Disabling the transformer makes every miss degrade to pass-through
    #[serde(default = "default_transform_enabled")]
    pub enabled: bool,
    #[serde(
        default = "default_transform_timeout",
        with = "duration_serde::duration"
    )]
    pub timeout: Duration,
    #[serde(default = "default_quality")]
    pub default_quality: u8,
    #[serde(default = "default_format")]
    pub default_format: String,
    /// Upper bound on decoded width * height
    #[serde(default = "default_max_pixels")]
    pub max_pixels: u64,
    #[serde(default = "default_max_alloc_bytes")]
    pub max_alloc_bytes: u64,
}

// Web defaults
fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_cache_control_max_age() -> Duration {
    humantime::parse_duration(DEFAULT_CACHE_CONTROL_MAX_AGE)
        .unwrap_or(Duration::from_secs(30 * 24 * 60 * 60))
}

// Cache defaults
fn default_memory_capacity() -> usize {
    DEFAULT_MEMORY_CAPACITY
}

fn default_storage_path() -> PathBuf {
    PathBuf::from(DEFAULT_STORAGE_PATH)
}

fn default_resident_metadata_namespaces() -> usize {
    DEFAULT_RESIDENT_METADATA_NAMESPACES
}

fn default_tenancy_enabled() -> bool {
    DEFAULT_TENANCY_ENABLED
}

// Fetch defaults
fn default_fetch_timeout() -> Duration {
    humantime::parse_duration(DEFAULT_FETCH_TIMEOUT).unwrap_or(Duration::from_secs(15))
}

fn default_fetch_connect_timeout() -> Duration {
    humantime::parse_duration(DEFAULT_FETCH_CONNECT_TIMEOUT).unwrap_or(Duration::from_secs(5))
}

fn default_max_source_bytes() -> u64 {
    DEFAULT_MAX_SOURCE_BYTES
}

fn default_user_agent() -> String {
    format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
}

// Transform defaults
fn default_transform_enabled() -> bool {
    DEFAULT_TRANSFORM_ENABLED
}

fn default_transform_timeout() -> Duration {
    humantime::parse_duration(DEFAULT_TRANSFORM_TIMEOUT).unwrap_or(Duration::from_secs(20))
}

fn default_quality() -> u8 {
    DEFAULT_QUALITY
}

fn default_format() -> String {
    DEFAULT_FORMAT.to_string()
}

fn default_max_pixels() -> u64 {
    DEFAULT_MAX_PIXELS
}

fn default_max_alloc_bytes() -> u64 {
    DEFAULT_MAX_ALLOC_BYTES
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cache_control_max_age: default_cache_control_max_age(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_capacity: default_memory_capacity(),
            storage_path: default_storage_path(),
            resident_metadata_namespaces: default_resident_metadata_namespaces(),
        }
    }
}

impl Default for TenancyConfig {
    fn default() -> Self {
        Self {
            enabled: default_tenancy_enabled(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: default_fetch_timeout(),
            connect_timeout: default_fetch_connect_timeout(),
            max_source_bytes: default_max_source_bytes(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            enabled: default_transform_enabled(),
            timeout: default_transform_timeout(),
            default_quality: default_quality(),
            default_format: default_format(),
            max_pixels: default_max_pixels(),
            max_alloc_bytes: default_max_alloc_bytes(),
        }
    }
}

impl TransformConfig {
    /// The configured default output format
    pub fn default_image_format(&self) -> Result<ImageFormat, AppError> {
        self.default_format.parse()
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_file =
            std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".to_string());
        Self::load_from_file(&config_file)
    }

    pub fn load_from_file(config_file: &str) -> Result<Self> {
        let config = if std::path::Path::new(&config_file).exists() {
            let contents = std::fs::read_to_string(config_file)?;
            toml::from_str(&contents)?
        } else {
            let default_config = Self::default();
            let contents = toml::to_string_pretty(&default_config)?;
            std::fs::write(config_file, contents)?;
            info!("Created default config file: {}", config_file);
            default_config
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the service cannot run with
    pub fn validate(&self) -> Result<(), AppError> {
        if self.cache.memory_capacity == 0 {
            return Err(AppError::configuration(
                "cache.memory_capacity must be greater than zero",
            ));
        }
        if self.cache.resident_metadata_namespaces == 0 {
            return Err(AppError::configuration(
                "cache.resident_metadata_namespaces must be greater than zero",
            ));
        }
        if !(1..=100).contains(&self.transform.default_quality) {
            return Err(AppError::configuration(format!(
                "transform.default_quality must be within 1..=100, got {}",
                self.transform.default_quality
            )));
        }
        if self.transform.max_pixels == 0 {
            return Err(AppError::configuration(
                "transform.max_pixels must be greater than zero",
            ));
        }
        self.transform.default_image_format().map_err(|_| {
            AppError::configuration(format!(
                "transform.default_format '{}' is not a supported output format",
                self.transform.default_format
            ))
        })?;
        Ok(())
    }
}
