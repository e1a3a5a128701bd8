pub mod error;
pub mod lifecycle;
pub mod metrics;
pub mod pipeline;

pub use error::{ContextError, ContextResult};
pub use lifecycle::{PipelineItem, SearchContext, Status};
pub use metrics::{ContextMetrics, ContextMetricsSnapshot};
pub use pipeline::PendGate;
