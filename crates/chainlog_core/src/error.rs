//! Core error types for chainlog.

use crate::hash::HashError;

/// Core result type
pub type CoreResult<T> = Result<T, CoreError>;

/// Core error type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    /// Invalid encoding
    #[error("Invalid encoding: {reason}")]
    InvalidEncoding {
        /// What failed to encode or decode
        reason: String,
    },

    /// Invalid hash format
    #[error("Invalid hash: {0}")]
    InvalidHash(#[from] HashError),

    /// Invalid timestamp
    #[error("Invalid timestamp: {reason}")]
    InvalidTimestamp {
        /// Why the timestamp was rejected
        reason: String,
    },

    /// Validation error
    #[error("Validation failed for {field}: {reason}")]
    Validation {
        /// Offending field
        field: String,
        /// Why it was rejected
        reason: String,
    },
}

impl CoreError {
    /// Build a validation error
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidEncoding {
            reason: err.to_string(),
        }
    }
}

impl From<postcard::Error> for CoreError {
    fn from(err: postcard::Error) -> Self {
        Self::InvalidEncoding {
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::validation("level", "must not be empty");
        assert_eq!(format!("{}", err), "Validation failed for level: must not be empty");
    }

    #[test]
    fn test_hash_error_conversion() {
        let err: CoreError = HashError::InvalidLength(3).into();
        assert!(err.to_string().contains("Invalid hash length: 3"));
    }

    #[test]
    fn test_postcard_error_conversion() {
        let err: CoreError = postcard::from_bytes::<String>(&[0xFF]).unwrap_err().into();
        assert!(matches!(err, CoreError::InvalidEncoding { .. }));
    }
}
