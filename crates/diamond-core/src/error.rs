//! Shared error type for the core's ambient failure modes.
//!
//! Per-crate errors (`diamond-ocache::OcacheError`, `diamond-ceval::CevalError`,
//! `diamond-context::ContextError`) wrap or convert from this where the
//! failure originates below the crate boundary (I/O, signature/config
//! parsing).

use thiserror::Error;

pub type CoreResult<T> = std::result::Result<T, CoreError>;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("malformed signature hex: {0}")]
    BadSignatureHex(String),
}

impl CoreError {
    /// Stable string for control-tree / transport error surfacing.
    #[must_use]
    pub const fn error_type(&self) -> &'static str {
        match self {
            Self::Io(_) => "IO_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::BadSignatureHex(_) => "BAD_SIGNATURE_HEX",
        }
    }

    /// Whether the failure is transient and may be retried.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_type_mapping() {
        assert_eq!(CoreError::Config("x".into()).error_type(), "CONFIG_ERROR");
        assert_eq!(
            CoreError::BadSignatureHex("x".into()).error_type(),
            "BAD_SIGNATURE_HEX"
        );
    }

    #[test]
    fn io_is_transient_config_is_not() {
        let io = CoreError::Io(std::io::Error::other("disk full"));
        assert!(io.is_transient());
        assert!(!CoreError::Config("bad".into()).is_transient());
    }
}
