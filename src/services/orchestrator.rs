//! Request-level orchestration of the cache tiers and collaborators
//!
//! A request walks these steps in order, stopping at the first that produces
//! bytes:
//!
//! 1. derive the cache key
//! 2. memory tier (`HIT`)
//! 3. persistent tier, exact key (`DISK_HIT`, memory populated)
//! 4. URL fallback via the metadata index, tenant namespaces only
//!    (`FALLBACK_HIT`, served in the recorded format)
//! 5. fetch, transform and populate both tiers (`MISS`)
//!
//! Step 5 is coalesced per `(namespace, key)`: concurrent misses share one
//! fetch and one transformation. A failed or unavailable transformation is
//! resolved by the [`DegradationPolicy`]; fetch failures are returned to the
//! caller. Cache writes are best effort and never fail a request.

use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, trace, warn};

use crate::config::Config;
use crate::errors::{AppError, AppResult, TransformError};
use crate::models::{CacheEntry, CacheStatus, ImageRequest, ServedImage, TenantNamespace};
use crate::services::degradation::DegradationPolicy;
use crate::services::fetcher::{HttpSourceFetcher, SourceFetcher};
use crate::services::image_cache::{
    CacheKey, MemoryCache, MemoryCacheStats, MetadataIndex, MetadataRecord, PersistentCache,
    derive_for,
};
use crate::services::single_flight::{FlightRole, SingleFlight};
use crate::services::transformer::{ImageCodecTransformer, ImageTransformer, TransformParams};
use crate::utils::UrlUtils;

type EntryKey = (TenantNamespace, CacheKey);

/// Per-status response counters
#[derive(Debug, Default)]
struct ServeCounters {
    hit: AtomicU64,
    disk_hit: AtomicU64,
    fallback_hit: AtomicU64,
    miss: AtomicU64,
    degraded: AtomicU64,
    coalesced: AtomicU64,
}

impl ServeCounters {
    fn record(&self, status: CacheStatus) {
        let counter = match status {
            CacheStatus::Hit => &self.hit,
            CacheStatus::DiskHit => &self.disk_hit,
            CacheStatus::FallbackHit => &self.fallback_hit,
            CacheStatus::Miss => &self.miss,
            CacheStatus::Degraded => &self.degraded,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Snapshot reported by the stats endpoint
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStats {
    pub memory: MemoryCacheStats,
    pub in_flight: usize,
    pub transformer_available: bool,
    pub responses: ResponseCounts,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponseCounts {
    pub hit: u64,
    pub disk_hit: u64,
    pub fallback_hit: u64,
    pub miss: u64,
    pub degraded: u64,
    /// Requests that joined an in-flight transformation instead of starting one
    pub coalesced: u64,
}

pub struct ImageOrchestrator {
    memory: MemoryCache<EntryKey, CacheEntry>,
    persistent: PersistentCache,
    metadata: MetadataIndex,
    fetcher: Arc<dyn SourceFetcher>,
    transformer: Option<Arc<dyn ImageTransformer>>,
    degradation: DegradationPolicy,
    flights: SingleFlight<EntryKey, AppResult<ServedImage>>,
    counters: ServeCounters,
}

impl ImageOrchestrator {
    /// Assemble an orchestrator from explicit collaborators
    ///
    /// `transformer` is `None` when no transformation engine is available;
    /// every miss is then served through the degradation policy.
    pub fn new(
        config: &Config,
        fetcher: Arc<dyn SourceFetcher>,
        transformer: Option<Arc<dyn ImageTransformer>>,
    ) -> Self {
        let persistent = PersistentCache::new(config.cache.storage_path.clone());
        Self {
            memory: MemoryCache::new(config.cache.memory_capacity),
            metadata: MetadataIndex::new(
                persistent.clone(),
                config.cache.resident_metadata_namespaces,
            ),
            persistent,
            fetcher,
            transformer,
            degradation: DegradationPolicy,
            flights: SingleFlight::new(),
            counters: ServeCounters::default(),
        }
    }

    /// Build the production collaborators from configuration
    pub fn from_config(config: &Config) -> AppResult<Self> {
        let fetcher: Arc<dyn SourceFetcher> = Arc::new(HttpSourceFetcher::new(&config.fetch)?);
        let transformer: Option<Arc<dyn ImageTransformer>> = if config.transform.enabled {
            Some(Arc::new(ImageCodecTransformer::new(&config.transform)))
        } else {
            warn!("Image transformer disabled; misses will be served untransformed");
            None
        };
        Ok(Self::new(config, fetcher, transformer))
    }

    pub fn transformer_available(&self) -> bool {
        self.transformer.is_some()
    }

    /// Serve a validated request
    pub async fn serve(self: &Arc<Self>, request: ImageRequest) -> AppResult<ServedImage> {
        let key = derive_for(&request);
        let entry_key = (request.namespace.clone(), key.clone());
        let safe_url = UrlUtils::obfuscate_credentials(&request.source_url);
        trace!(
            namespace = %request.namespace,
            key = %key,
            url = %safe_url,
            "Serving image request"
        );

        if let Some(entry) = self.memory.get(&entry_key).await {
            debug!(key = %key, "Memory cache hit");
            return Ok(self.finish(ServedImage::from_entry(entry, CacheStatus::Hit)));
        }

        if let Some(entry) = self.persistent_lookup(&request, &key).await {
            debug!(key = %key, "Persistent cache hit");
            self.memory.put(entry_key, entry.clone()).await;
            return Ok(self.finish(ServedImage::from_entry(entry, CacheStatus::DiskHit)));
        }

        if request.namespace.is_tenant()
            && let Some(entry) = self.url_fallback_lookup(&request).await
        {
            debug!(url = %safe_url, namespace = %request.namespace, "URL fallback hit");
            return Ok(self.finish(ServedImage::from_entry(entry, CacheStatus::FallbackHit)));
        }

        let worker = Arc::clone(self);
        let work_request = request.clone();
        let work_key = key.clone();
        let (result, role) = self
            .flights
            .run(entry_key, async move {
                worker.produce(work_request, work_key).await
            })
            .await;

        if role == FlightRole::Follower {
            self.counters.coalesced.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "Joined in-flight transformation");
        }

        let served = result.unwrap_or_else(|| {
            Err(AppError::internal(
                "image worker terminated before publishing a result",
            ))
        })?;
        Ok(self.finish(served))
    }

    fn finish(&self, served: ServedImage) -> ServedImage {
        self.counters.record(served.status);
        served
    }

    async fn persistent_lookup(&self, request: &ImageRequest, key: &CacheKey) -> Option<CacheEntry> {
        match self
            .persistent
            .read_if_present(&request.namespace, key, request.format)
            .await
        {
            Ok(bytes) => bytes.map(|bytes| CacheEntry::new(bytes, request.format)),
            Err(e) => {
                warn!(key = %key, error = %e, "Persistent cache read failed, treating as miss");
                None
            }
        }
    }

    /// Serve any earlier rendition of the same source URL in this namespace
    async fn url_fallback_lookup(&self, request: &ImageRequest) -> Option<CacheEntry> {
        let record = self
            .metadata
            .find_by_url(&request.namespace, &request.source_url)
            .await?;
        let entry_key = (request.namespace.clone(), record.cache_key.clone());

        if let Some(entry) = self.memory.get(&entry_key).await {
            return Some(entry);
        }

        match self
            .persistent
            .read_if_present(&request.namespace, &record.cache_key, record.format)
            .await
        {
            Ok(Some(bytes)) => {
                let entry = CacheEntry::new(bytes, record.format);
                self.memory.put(entry_key, entry.clone()).await;
                Some(entry)
            }
            Ok(None) => {
                debug!(
                    key = %record.cache_key,
                    "Metadata references a missing file, falling through to fetch"
                );
                None
            }
            Err(e) => {
                warn!(key = %record.cache_key, error = %e, "Fallback read failed");
                None
            }
        }
    }

    /// Fetch, transform and populate; runs once per in-flight key
    async fn produce(self: Arc<Self>, request: ImageRequest, key: CacheKey) -> AppResult<ServedImage> {
        let entry_key = (request.namespace.clone(), key.clone());

        // A flight that finished between our lookup and joining has populated memory
        if let Some(entry) = self.memory.get(&entry_key).await {
            return Ok(ServedImage::from_entry(entry, CacheStatus::Hit));
        }

        let source = self.fetcher.fetch(&request.source_url).await.map_err(|e| {
            warn!(error = %e, "Source fetch failed");
            AppError::from(e)
        })?;

        let params = TransformParams {
            width: request.width,
            quality: request.quality,
            format: request.format,
        };

        let transformed = match &self.transformer {
            None => Err(TransformError::Unavailable),
            Some(transformer) => match transformer.transform(source.clone(), params).await {
                Ok(bytes) if bytes.is_empty() => Err(TransformError::EmptyOutput),
                other => other,
            },
        };

        let bytes = match transformed {
            Ok(bytes) => bytes,
            Err(reason) => {
                return Ok(self
                    .degradation
                    .degrade(&request.source_url, source, &reason));
            }
        };

        let entry = CacheEntry::new(bytes, request.format);
        self.populate(&request, &key, &entry).await;
        self.memory.put(entry_key, entry.clone()).await;

        info!(
            url = %UrlUtils::obfuscate_credentials(&request.source_url),
            key = %key,
            namespace = %request.namespace,
            format = %request.format,
            size = entry.bytes.len(),
            "Transformed and cached image"
        );
        Ok(ServedImage::from_entry(entry, CacheStatus::Miss))
    }

    /// Write the entry and its metadata record; failures are logged only
    async fn populate(&self, request: &ImageRequest, key: &CacheKey, entry: &CacheEntry) {
        if let Err(e) = self
            .persistent
            .write(&request.namespace, key, entry.format, &entry.bytes)
            .await
        {
            warn!(key = %key, error = %e, "Failed to persist cache entry");
            return;
        }

        let record = MetadataRecord::new(
            key.clone(),
            &request.source_url,
            request.width,
            request.quality,
            entry.format,
        );
        if let Err(e) = self.metadata.record(&request.namespace, record).await {
            warn!(key = %key, error = %e, "Failed to record cache metadata");
        }
    }

    pub async fn stats(&self) -> OrchestratorStats {
        let c = &self.counters;
        OrchestratorStats {
            memory: self.memory.stats().await,
            in_flight: self.flights.in_flight(),
            transformer_available: self.transformer_available(),
            responses: ResponseCounts {
                hit: c.hit.load(Ordering::Relaxed),
                disk_hit: c.disk_hit.load(Ordering::Relaxed),
                fallback_hit: c.fallback_hit.load(Ordering::Relaxed),
                miss: c.miss.load(Ordering::Relaxed),
                degraded: c.degraded.load(Ordering::Relaxed),
                coalesced: c.coalesced.load(Ordering::Relaxed),
            },
        }
    }
}
