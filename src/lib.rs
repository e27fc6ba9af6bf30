// src/lib.rs
// Public library surface for integration tests (and potential reuse).

pub mod api;
pub mod bootstrap;
pub mod cache;
pub mod config;
pub mod error;
pub mod factoid;
pub mod fallback;
pub mod gather;
pub mod invalidate;
pub mod metrics;
pub mod notify;
pub mod pipeline;
pub mod prompt;
pub mod sitewide;
pub mod snapshot;
pub mod throttle;
pub mod warmup;

// AI adapter + parser
pub mod ai;

// ---- Re-exports for stable public API ----
pub use crate::api::{create_router, AppState};
pub use crate::error::FactoidError;
pub use crate::factoid::{CacheStatus, Factoid, FactoidResponseEnvelope, InsightType};
pub use crate::pipeline::FactoidPipeline;
pub use crate::snapshot::CouncilDataSnapshot;
