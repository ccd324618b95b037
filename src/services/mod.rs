//! Service layer for image retrieval
//!
//! # Architecture
//!
//! - [`image_cache`]: cache keys, the memory and persistent tiers, and the
//!   per-namespace metadata index
//! - [`fetcher`]: outbound retrieval of source images
//! - [`transformer`]: resize and re-encode
//! - [`degradation`]: what to serve when no transformation can be produced
//! - [`single_flight`]: coalescing of concurrent identical misses
//! - [`orchestrator`]: the per-request state machine tying the above together
//!
//! Collaborators are injected as trait objects so the orchestrator can be
//! driven by fakes in tests.

pub mod degradation;
pub mod fetcher;
pub mod image_cache;
pub mod orchestrator;
pub mod single_flight;
pub mod transformer;

pub use degradation::DegradationPolicy;
pub use fetcher::{HttpSourceFetcher, SourceFetcher};
pub use orchestrator::{ImageOrchestrator, OrchestratorStats};
pub use single_flight::{FlightRole, SingleFlight};
pub use transformer::{ImageCodecTransformer, ImageTransformer, TransformParams};
