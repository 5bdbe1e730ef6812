//! Error types for ledger storage.

use tally_core::LedgerError;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// Serialization/deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            // Database failures are worth a bounded retry; a value that no
            // longer round-trips is corruption, not a transient condition.
            StoreError::Database(msg) => Self::TransientStore(msg),
            StoreError::Serialization(msg) => Self::InvariantViolation(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_errors_map_to_transient() {
        let err: LedgerError = StoreError::Database("io".into()).into();
        assert!(err.is_transient());
    }

    #[test]
    fn serialization_errors_map_to_invariant_violation() {
        let err: LedgerError = StoreError::Serialization("bad cbor".into()).into();
        assert!(matches!(err, LedgerError::InvariantViolation(_)));
    }
}
