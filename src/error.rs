//! Error types for adapter construction, checkpoint reconciliation and loss weighting
//!
//! Every variant maps onto one [`ErrorCategory`] so callers can tell
//! configuration mistakes (fail fast) apart from partial data (degrade),
//! resource exhaustion (skip the item) and broken invariants (bug).

use thiserror::Error;

/// Result type alias for afinar operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Programmer or configuration error, reported at the point of misuse
    Configuration,
    /// Missing or malformed data that callers may skip over
    PartialData,
    /// A single item could not be placed (device memory, etc.)
    ResourceExhaustion,
    /// Structural misuse that correct integrations never hit
    Invariant,
    /// Filesystem failure
    Io,
}

/// Errors raised by afinar.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Unsupported PEFT type: {0} (must be one of: LORA, LOHA)")]
    UnsupportedPeftType(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid glob pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("Adapter '{prefix}' is not initialized; call initialize() or load a checkpoint first")]
    NotInitialized { prefix: String },

    #[error("Shape mismatch for '{key}': expected {expected:?}, got {actual:?}")]
    ShapeMismatch { key: String, expected: Vec<usize>, actual: Vec<usize> },

    #[error("Unsupported layer '{name}': {reason}")]
    UnsupportedLayer { name: String, reason: String },

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Missing data: {0}")]
    MissingData(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("SafeTensors error: {0}")]
    SafeTensors(String),
}

impl Error {
    /// Category of this error in the failure taxonomy.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ConfigError(_)
            | Self::UnsupportedPeftType(_)
            | Self::InvalidArgument(_)
            | Self::InvalidPattern { .. } => ErrorCategory::Configuration,
            Self::ShapeMismatch { .. }
            | Self::UnsupportedLayer { .. }
            | Self::MissingData(_)
            | Self::Serialization(_)
            | Self::SafeTensors(_) => ErrorCategory::PartialData,
            Self::ResourceExhausted(_) => ErrorCategory::ResourceExhaustion,
            Self::NotInitialized { .. } | Self::Unsupported(_) | Self::InvalidState(_) => {
                ErrorCategory::Invariant
            }
            Self::Io(_) => ErrorCategory::Io,
        }
    }

    /// Whether the caller can skip the failing item and keep going.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::PartialData | ErrorCategory::ResourceExhaustion
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<safetensors::SafeTensorError> for Error {
    fn from(e: safetensors::SafeTensorError) -> Self {
        Self::SafeTensors(e.to_string())
    }
}

impl From<crate::config::ValidationError> for Error {
    fn from(e: crate::config::ValidationError) -> Self {
        Self::ConfigError(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_errors_are_not_recoverable() {
        assert_eq!(Error::ConfigError("x".into()).category(), ErrorCategory::Configuration);
        assert!(!Error::UnsupportedPeftType("LOKR".into()).is_recoverable());
        assert!(!Error::InvalidArgument("p".into()).is_recoverable());
    }

    #[test]
    fn test_resource_exhaustion_is_recoverable() {
        let err = Error::ResourceExhausted("tensor of 4096 bytes".into());
        assert_eq!(err.category(), ErrorCategory::ResourceExhaustion);
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_not_initialized_is_invariant() {
        let err = Error::NotInitialized { prefix: "lora_unet_a_0.".into() };
        assert_eq!(err.category(), ErrorCategory::Invariant);
        assert!(err.to_string().contains("lora_unet_a_0."));
    }

    #[test]
    fn test_shape_mismatch_message() {
        let err = Error::ShapeMismatch {
            key: "lora_down.weight".into(),
            expected: vec![4, 8],
            actual: vec![4, 9],
        };
        let msg = err.to_string();
        assert!(msg.contains("lora_down.weight"));
        assert!(msg.contains("[4, 8]"));
        assert!(msg.contains("[4, 9]"));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_unsupported_peft_type_lists_alternatives() {
        let msg = Error::UnsupportedPeftType("LOKR".into()).to_string();
        assert!(msg.contains("LOKR"));
        assert!(msg.contains("LORA"));
        assert!(msg.contains("LOHA"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: Error = io.into();
        assert_eq!(err.category(), ErrorCategory::Io);
    }
}
