//! Filesystem-backed cache tier.
//!
//! Layout under the storage root:
//!
//! ```text
//! <root>/<key>.<ext>               global namespace
//! <root>/<tenant>/<key>.<ext>      per-tenant namespace
//! ```
//!
//! Writes go to a temporary sibling and are renamed into place, so a reader
//! never observes a half-written entry. No cross-process locking is done:
//! concurrent writers of the same key write identical bytes.

use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, trace};

use super::fingerprint::CacheKey;
use crate::errors::{StorageError, StorageResult};
use crate::models::{ImageFormat, TenantNamespace};

#[derive(Debug, Clone)]
pub struct PersistentCache {
    root: PathBuf,
}

impl PersistentCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory holding a namespace's entries and metadata file
    pub fn namespace_dir(&self, namespace: &TenantNamespace) -> PathBuf {
        match namespace {
            TenantNamespace::Global => self.root.clone(),
            TenantNamespace::Tenant(id) => self.root.join(id),
        }
    }

    /// Path of an entry: `<key>.<format extension>`
    pub fn entry_path(
        &self,
        namespace: &TenantNamespace,
        key: &CacheKey,
        format: ImageFormat,
    ) -> PathBuf {
        self.namespace_dir(namespace)
            .join(format!("{}.{}", key, format.extension()))
    }

    /// Create the namespace directory; succeeds if it already exists
    pub async fn ensure_namespace(&self, namespace: &TenantNamespace) -> StorageResult<PathBuf> {
        let dir = self.namespace_dir(namespace);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| StorageError::io(&dir, &e))?;
        Ok(dir)
    }

    pub async fn exists(
        &self,
        namespace: &TenantNamespace,
        key: &CacheKey,
        format: ImageFormat,
    ) -> bool {
        let path = self.entry_path(namespace, key, format);
        fs::try_exists(&path).await.unwrap_or(false)
    }

    pub async fn read(
        &self,
        namespace: &TenantNamespace,
        key: &CacheKey,
        format: ImageFormat,
    ) -> StorageResult<Vec<u8>> {
        let path = self.entry_path(namespace, key, format);
        let bytes = fs::read(&path)
            .await
            .map_err(|e| StorageError::io(&path, &e))?;
        trace!(path = %path.display(), size = bytes.len(), "Read persistent cache entry");
        Ok(bytes)
    }

    /// Read an entry, treating a missing file as a miss
    pub async fn read_if_present(
        &self,
        namespace: &TenantNamespace,
        key: &CacheKey,
        format: ImageFormat,
    ) -> StorageResult<Option<Vec<u8>>> {
        let path = self.entry_path(namespace, key, format);
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::io(&path, &e)),
        }
    }

    pub async fn write(
        &self,
        namespace: &TenantNamespace,
        key: &CacheKey,
        format: ImageFormat,
        bytes: &[u8],
    ) -> StorageResult<()> {
        self.ensure_namespace(namespace).await?;
        let path = self.entry_path(namespace, key, format);
        write_atomic(&path, bytes).await?;
        debug!(path = %path.display(), size = bytes.len(), "Stored persistent cache entry");
        Ok(())
    }
}

/// Write via a uniquely named temporary file and rename into place
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> StorageResult<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let tmp_path = path.with_file_name(format!(
        ".{}.{}.{}.tmp",
        file_name,
        std::process::id(),
        next_temp_suffix()
    ));

    fs::write(&tmp_path, bytes)
        .await
        .map_err(|e| StorageError::io(&tmp_path, &e))?;
    if let Err(e) = fs::rename(&tmp_path, path).await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(StorageError::io(path, &e));
    }
    Ok(())
}

fn next_temp_suffix() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::image_cache::fingerprint::derive;
    use tempfile::TempDir;

    fn key(n: u32) -> CacheKey {
        derive(
            &format!("https://example.com/{n}.png"),
            None,
            80,
            ImageFormat::WebP,
        )
    }

    #[tokio::test]
    async fn test_write_then_read_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let cache = PersistentCache::new(temp_dir.path());
        let ns = TenantNamespace::Global;
        let bytes = vec![0u8, 1, 2, 3, 255, 254];

        assert!(!cache.exists(&ns, &key(1), ImageFormat::WebP).await);
        cache
            .write(&ns, &key(1), ImageFormat::WebP, &bytes)
            .await
            .unwrap();

        assert!(cache.exists(&ns, &key(1), ImageFormat::WebP).await);
        assert_eq!(
            cache.read(&ns, &key(1), ImageFormat::WebP).await.unwrap(),
            bytes
        );
    }

    #[tokio::test]
    async fn test_file_name_uses_key_and_extension() {
        let temp_dir = TempDir::new().unwrap();
        let cache = PersistentCache::new(temp_dir.path());
        let ns = TenantNamespace::Global;
        cache
            .write(&ns, &key(2), ImageFormat::Jpeg, b"jpeg")
            .await
            .unwrap();

        let expected = temp_dir.path().join(format!("{}.jpg", key(2)));
        assert!(expected.exists());
        // The same key under a different format is a different entry
        assert!(!cache.exists(&ns, &key(2), ImageFormat::Png).await);
    }

    #[tokio::test]
    async fn test_write_creates_tenant_directory() {
        let temp_dir = TempDir::new().unwrap();
        let cache = PersistentCache::new(temp_dir.path().join("nested/root"));
        let ns = TenantNamespace::tenant("acme").unwrap();

        cache
            .write(&ns, &key(3), ImageFormat::Png, b"png")
            .await
            .unwrap();

        assert!(temp_dir.path().join("nested/root/acme").is_dir());
        assert!(
            !cache
                .exists(&TenantNamespace::Global, &key(3), ImageFormat::Png)
                .await
        );
        assert!(
            !cache
                .exists(
                    &TenantNamespace::tenant("other").unwrap(),
                    &key(3),
                    ImageFormat::Png
                )
                .await
        );
    }

    #[tokio::test]
    async fn test_concurrent_writers_of_same_key_succeed() {
        let temp_dir = TempDir::new().unwrap();
        let cache = PersistentCache::new(temp_dir.path());
        let ns = TenantNamespace::tenant("race").unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let ns = ns.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .write(&ns, &key(4), ImageFormat::WebP, b"identical")
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(
            cache.read(&ns, &key(4), ImageFormat::WebP).await.unwrap(),
            b"identical"
        );
    }

    #[tokio::test]
    async fn test_missing_entry() {
        let temp_dir = TempDir::new().unwrap();
        let cache = PersistentCache::new(temp_dir.path());
        let ns = TenantNamespace::Global;

        assert!(cache.read(&ns, &key(5), ImageFormat::WebP).await.is_err());
        assert_eq!(
            cache
                .read_if_present(&ns, &key(5), ImageFormat::WebP)
                .await
                .unwrap(),
            None
        );
    }
}
