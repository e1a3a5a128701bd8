use diamond_contracts::error::ContractError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("invalid state transition: {from:?} -> {to:?}")]
    InvalidTransition { from: String, to: String },

    #[error("stale generation: command carried {got}, context is at {current}")]
    StaleGeneration { got: u64, current: u64 },

    #[error("no searchlet installed for this context")]
    SearchletNotSet,

    #[error("failed to spawn pipeline thread: {0}")]
    ThreadSpawn(String),

    #[error(transparent)]
    Contract(#[from] ContractError),
}

pub type ContextResult<T> = Result<T, ContextError>;

impl ContextError {
    #[must_use]
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::StaleGeneration { .. } => "stale_generation",
            Self::SearchletNotSet => "searchlet_not_set",
            Self::ThreadSpawn(_) => "thread_spawn",
            Self::Contract(_) => "contract",
        }
    }

    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ThreadSpawn(_))
    }
}
