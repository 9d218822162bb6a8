//! Error types for the kvfront backend

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the kvfront backend
///
/// Ineligible or duplicate votes and records that vanish between an index
/// read and the record fetch are not errors; only store failures, bad input
/// and configuration problems surface here.
#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    /// Store call failed or the store is unavailable
    #[error("Store error: {0}")]
    Store(String),

    /// Operation against a key holding the wrong kind of value
    #[error("Operation against key '{key}' holding the wrong kind of value")]
    WrongType { key: String },

    /// Increment of a value that is not an integer
    #[error("Value at '{key}' is not an integer or out of range")]
    NotAnInteger { key: String },

    /// Caller supplied an unusable argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// JSON encoding or decoding failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the error came from the store rather than from the caller.
    pub fn is_store_failure(&self) -> bool {
        matches!(
            self,
            Error::Store(_) | Error::WrongType { .. } | Error::NotAnInteger { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::WrongType {
            key: "login:".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Operation against key 'login:' holding the wrong kind of value"
        );
        assert!(err.is_store_failure());
    }

    #[test]
    fn test_invalid_argument_is_not_store_failure() {
        let err = Error::InvalidArgument("empty title".to_string());
        assert!(!err.is_store_failure());
    }

    #[test]
    fn test_serde_conversion() {
        let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{");
        let err: Error = parse.unwrap_err().into();
        assert!(matches!(err, Error::Serialization(_)));
    }
}
