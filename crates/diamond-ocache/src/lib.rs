//! Object evaluation cache (`ocache`): content-addressed,
//! crash-recoverable cache of filter verdicts keyed by
//! `(filter-sig, object-id, input-attr-sig)`.

pub mod cache;
pub mod error;
pub mod metrics;
pub mod pending;
pub mod persist;
pub mod record;

pub use cache::{InsertHandle, LookupOutcome, OCache};
pub use error::{OcacheError, OcacheResult};
pub use metrics::{CacheMetrics, CacheMetricsSnapshot};
pub use record::{FilterCache, ObjectRecord, FILTER_ERR};
