//! Per-namespace metadata index for persisted entries
//!
//! Each namespace directory holds a `metadata.json` file mapping cache key to
//! the record describing how that entry was produced. The index also keeps a
//! `source_url -> [key]` secondary index (oldest record first) so a tenant can
//! be served any earlier rendition of a URL without scanning every record.
//!
//! The file is shared with every process using the same storage root. A
//! lookup that misses in memory re-reads it before giving up, and writes merge
//! the records already on disk. Only the most recently used namespaces stay
//! resident.

use chrono::{DateTime, Utc};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError};
use tokio::fs;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use super::fingerprint::CacheKey;
use super::persistent::{PersistentCache, write_atomic};
use crate::errors::{StorageError, StorageResult};
use crate::models::{ImageFormat, TenantNamespace};

/// Name of the index file inside each namespace directory
pub const METADATA_FILE_NAME: &str = "metadata.json";

/// Description of one persisted entry, immutable once written
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub cache_key: CacheKey,
    pub source_url: String,
    /// Requested width, serialized as `"original"` when none was requested
    #[serde(with = "width_or_original")]
    pub requested_width: Option<u32>,
    pub requested_quality: u8,
    pub format: ImageFormat,
    pub created_at: DateTime<Utc>,
}

impl MetadataRecord {
    pub fn new(
        cache_key: CacheKey,
        source_url: &str,
        requested_width: Option<u32>,
        requested_quality: u8,
        format: ImageFormat,
    ) -> Self {
        Self {
            cache_key,
            source_url: source_url.trim().to_string(),
            requested_width,
            requested_quality,
            format,
            created_at: Utc::now(),
        }
    }
}

mod width_or_original {
    use serde::de::{self, Deserializer, Visitor};
    use serde::Serializer;
    use std::fmt;

    const ORIGINAL: &str = "original";

    pub fn serialize<S>(width: &Option<u32>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match width {
            Some(w) => serializer.serialize_u32(*w),
            None => serializer.serialize_str(ORIGINAL),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct WidthVisitor;

        impl<'de> Visitor<'de> for WidthVisitor {
            type Value = Option<u32>;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a pixel width or the string \"original\"")
            }

            fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                u32::try_from(value)
                    .map(Some)
                    .map_err(|_| de::Error::custom(format!("width {value} out of range")))
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                if value == ORIGINAL {
                    Ok(None)
                } else {
                    Err(de::Error::custom(format!("unexpected width '{value}'")))
                }
            }

            fn visit_unit<E>(self) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(None)
            }
        }

        deserializer.deserialize_any(WidthVisitor)
    }
}

/// In-memory view of one namespace's metadata file
#[derive(Debug, Default)]
struct NamespaceIndex {
    records: BTreeMap<CacheKey, MetadataRecord>,
    by_url: HashMap<String, Vec<CacheKey>>,
}

impl NamespaceIndex {
    fn from_records(records: BTreeMap<CacheKey, MetadataRecord>) -> Self {
        let mut ordered: Vec<&MetadataRecord> = records.values().collect();
        ordered.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.cache_key.cmp(&b.cache_key))
        });

        let mut by_url: HashMap<String, Vec<CacheKey>> = HashMap::new();
        for record in ordered {
            by_url
                .entry(record.source_url.clone())
                .or_default()
                .push(record.cache_key.clone());
        }

        Self { records, by_url }
    }

    fn insert(&mut self, record: MetadataRecord) {
        let key = record.cache_key.clone();
        if let Some(previous) = self.records.insert(key.clone(), record.clone()) {
            if previous.source_url == record.source_url {
                return;
            }
            if let Some(keys) = self.by_url.get_mut(&previous.source_url) {
                keys.retain(|k| k != &key);
                if keys.is_empty() {
                    self.by_url.remove(&previous.source_url);
                }
            }
        }
        self.by_url.entry(record.source_url).or_default().push(key);
    }

    /// Adopt records another process wrote that this index has not seen
    fn merge_missing(&mut self, on_disk: BTreeMap<CacheKey, MetadataRecord>) {
        let mut missing: Vec<MetadataRecord> = on_disk
            .into_values()
            .filter(|record| !self.records.contains_key(&record.cache_key))
            .collect();
        missing.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        for record in missing {
            self.insert(record);
        }
    }

    fn first_for_url(&self, source_url: &str) -> Option<&MetadataRecord> {
        self.by_url
            .get(source_url)
            .and_then(|keys| keys.first())
            .and_then(|key| self.records.get(key))
    }
}

type Slot = Arc<Mutex<Option<NamespaceIndex>>>;

/// Metadata index for every namespace under a storage root
pub struct MetadataIndex {
    storage: PersistentCache,
    namespaces: std::sync::Mutex<LruCache<TenantNamespace, Slot>>,
}

impl MetadataIndex {
    /// Keep at most `resident_namespaces` indexes in memory (minimum one)
    pub fn new(storage: PersistentCache, resident_namespaces: usize) -> Self {
        let capacity = NonZeroUsize::new(resident_namespaces).unwrap_or(NonZeroUsize::MIN);
        Self {
            storage,
            namespaces: std::sync::Mutex::new(LruCache::new(capacity)),
        }
    }

    fn metadata_path(&self, namespace: &TenantNamespace) -> PathBuf {
        self.storage
            .namespace_dir(namespace)
            .join(METADATA_FILE_NAME)
    }

    fn slot(&self, namespace: &TenantNamespace) -> Slot {
        let mut namespaces = self
            .namespaces
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = namespaces.get(namespace) {
            return slot.clone();
        }
        let slot = Slot::default();
        if let Some((evicted, _)) = namespaces.push(namespace.clone(), slot.clone()) {
            debug!(namespace = %evicted, "Released resident metadata index");
        }
        slot
    }

    /// Number of namespace indexes currently held in memory
    pub fn resident_namespaces(&self) -> usize {
        self.namespaces
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Read the namespace's metadata file; a missing file is an empty index
    async fn read_file(
        &self,
        namespace: &TenantNamespace,
    ) -> StorageResult<BTreeMap<CacheKey, MetadataRecord>> {
        let path = self.metadata_path(namespace);
        match fs::read(&path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(StorageError::io(&path, &e)),
        }
    }

    async fn load_or_empty(&self, namespace: &TenantNamespace) -> NamespaceIndex {
        match self.read_file(namespace).await {
            Ok(records) => {
                debug!(
                    namespace = %namespace,
                    records = records.len(),
                    "Loaded metadata index"
                );
                NamespaceIndex::from_records(records)
            }
            Err(e) => {
                warn!(namespace = %namespace, error = %e, "Ignoring unreadable metadata index");
                NamespaceIndex::default()
            }
        }
    }

    /// Lock a namespace's index, loading it from disk on first use
    async fn loaded(&self, namespace: &TenantNamespace) -> OwnedMutexGuard<Option<NamespaceIndex>> {
        let mut guard = self.slot(namespace).lock_owned().await;
        if guard.is_none() {
            *guard = Some(self.load_or_empty(namespace).await);
        }
        guard
    }

    /// Adopt records other processes have written since this index loaded
    async fn refresh(&self, namespace: &TenantNamespace, index: &mut NamespaceIndex) {
        match self.read_file(namespace).await {
            Ok(on_disk) => index.merge_missing(on_disk),
            Err(e) => {
                warn!(namespace = %namespace, error = %e, "Could not re-read metadata index");
            }
        }
    }

    /// Store the record for its key and persist the namespace index
    pub async fn record(
        &self,
        namespace: &TenantNamespace,
        record: MetadataRecord,
    ) -> StorageResult<()> {
        let mut guard = self.loaded(namespace).await;
        let Some(index) = guard.as_mut() else {
            return Ok(());
        };

        self.refresh(namespace, index).await;
        index.insert(record);

        self.storage.ensure_namespace(namespace).await?;
        let json = serde_json::to_vec_pretty(&index.records)?;
        write_atomic(&self.metadata_path(namespace), &json).await
    }

    /// Earliest recorded rendition of `source_url` in the namespace
    pub async fn find_by_url(
        &self,
        namespace: &TenantNamespace,
        source_url: &str,
    ) -> Option<MetadataRecord> {
        let source_url = source_url.trim();
        let mut guard = self.loaded(namespace).await;
        let index = guard.as_mut()?;
        if index.first_for_url(source_url).is_none() {
            self.refresh(namespace, index).await;
        }
        index.first_for_url(source_url).cloned()
    }

    pub async fn get(&self, namespace: &TenantNamespace, key: &CacheKey) -> Option<MetadataRecord> {
        let mut guard = self.loaded(namespace).await;
        let index = guard.as_mut()?;
        if !index.records.contains_key(key) {
            self.refresh(namespace, index).await;
        }
        index.records.get(key).cloned()
    }

    /// Number of records in a namespace, including ones written by other processes
    pub async fn len(&self, namespace: &TenantNamespace) -> usize {
        let mut guard = self.loaded(namespace).await;
        match guard.as_mut() {
            Some(index) => {
                self.refresh(namespace, index).await;
                index.records.len()
            }
            None => 0,
        }
    }
}
