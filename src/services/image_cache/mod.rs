//! Layered cache for transformed images
//!
//! This module provides the storage side of the proxy:
//!
//! - [`fingerprint`]: deterministic cache keys for transform parameters
//! - [`memory`]: bounded, process-local tier with insertion-order eviction
//! - [`persistent`]: per-namespace files named `<key>.<ext>` under a storage root
//! - [`metadata`]: per-namespace `metadata.json` index with lookup by source URL
//!
//! The tiers know nothing about fetching or transforming; the
//! [`ImageOrchestrator`](crate::services::ImageOrchestrator) sequences them.

pub mod fingerprint;
pub mod memory;
pub mod metadata;
pub mod persistent;

pub use fingerprint::{CacheKey, derive, derive_for, normalize_quality};
pub use memory::{MemoryCache, MemoryCacheStats};
pub use metadata::{MetadataIndex, MetadataRecord};
pub use persistent::PersistentCache;
