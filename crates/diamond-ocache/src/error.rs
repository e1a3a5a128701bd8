//! Errors surfaced by the object evaluation cache.

use thiserror::Error;

pub type OcacheResult<T> = std::result::Result<T, OcacheError>;

#[derive(Debug, Error)]
pub enum OcacheError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("cache log corrupted at {path}: {reason}")]
    LogCorrupt { path: String, reason: String },

    #[error("add_end called for (fsig, oid) with no matching add_start")]
    NoPendingInsert,

    #[error(transparent)]
    Core(#[from] diamond_core::CoreError),
}

impl OcacheError {
    #[must_use]
    pub const fn error_type(&self) -> &'static str {
        match self {
            Self::Io(_) => "IO_ERROR",
            Self::LogCorrupt { .. } => "CACHE_CORRUPTION",
            Self::NoPendingInsert => "NO_PENDING_INSERT",
            Self::Core(_) => "CORE_ERROR",
        }
    }

    /// Cache corruption on reload is handled locally (truncate + warn)
    /// and never propagated as a hard failure; everything else here is
    /// unexpected.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}
