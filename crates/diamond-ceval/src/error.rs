//! Errors from compiling or executing a filter chain.

use thiserror::Error;

pub type CevalResult<T> = std::result::Result<T, CevalError>;

#[derive(Debug, Error)]
pub enum CevalError {
    #[error("filter chain has a dependency cycle through {0:?}")]
    DependencyCycle(Vec<String>),

    #[error("filter {0:?} declares a dependency on unknown filter {1:?}")]
    UnknownDependency(String, String),

    #[error(transparent)]
    Contract(#[from] diamond_contracts::ContractError),

    #[error(transparent)]
    Cache(#[from] diamond_ocache::OcacheError),
}

impl CevalError {
    #[must_use]
    pub const fn error_type(&self) -> &'static str {
        match self {
            Self::DependencyCycle(_) => "DEPENDENCY_CYCLE",
            Self::UnknownDependency(..) => "UNKNOWN_DEPENDENCY",
            Self::Contract(_) => "CONTRACT_ERROR",
            Self::Cache(_) => "CACHE_ERROR",
        }
    }
}
