//! Errors crossing the core/external-collaborator boundary.

use thiserror::Error;

pub type ContractResult<T> = std::result::Result<T, ContractError>;

#[derive(Debug, Error)]
pub enum ContractError {
    #[error("object disk I/O error: {0}")]
    Disk(String),

    #[error("control-tree path not found: {0}")]
    PathNotFound(String),

    #[error("malformed dctl wire message: {0}")]
    MalformedMessage(String),

    #[error("stale generation number: command carried {got}, context is at {current}")]
    StaleGeneration { got: u64, current: u64 },
}

impl ContractError {
    #[must_use]
    pub const fn error_type(&self) -> &'static str {
        match self {
            Self::Disk(_) => "DISK_ERROR",
            Self::PathNotFound(_) => "PATH_NOT_FOUND",
            Self::MalformedMessage(_) => "MALFORMED_MESSAGE",
            Self::StaleGeneration { .. } => "STALE_GENERATION",
        }
    }

    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Disk(_))
    }
}
