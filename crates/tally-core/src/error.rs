//! Error types for ledger operations.

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Errors that can occur in ledger operations.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Malformed input: non-positive amount, out-of-bounds TTL, oversized
    /// metadata. Rejected before any side effect.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Account not found.
    #[error("account not found: {account_id}")]
    AccountNotFound {
        /// The account ID that was not found.
        account_id: String,
    },

    /// Reservation not found.
    #[error("reservation not found: {reservation_id}")]
    ReservationNotFound {
        /// The reservation ID that was not found.
        reservation_id: String,
    },

    /// The requested amount exceeds available credit.
    #[error("insufficient credits: available={available_cents}, required={required_cents}")]
    InsufficientFunds {
        /// Available credit (balance minus reserved) in cents.
        available_cents: i64,
        /// Required amount in cents.
        required_cents: i64,
    },

    /// Account already exists.
    #[error("account already exists: {account_id}")]
    AccountExists {
        /// The account ID that already exists.
        account_id: String,
    },

    /// The account already holds the maximum number of concurrent reservations.
    #[error("too many concurrent reservations (limit {limit})")]
    TooManyReservations {
        /// The configured limit.
        limit: usize,
    },

    /// An operation with the same idempotency key is already in flight.
    #[error("operation already in progress for key: {key}")]
    KeyInFlight {
        /// The contested idempotency key.
        key: String,
    },

    /// Store or cache temporarily unreachable; safe to retry.
    #[error("transient store failure: {0}")]
    TransientStore(String),

    /// A state that should be impossible (e.g. computed `reserved > balance`).
    /// A defect, not a user error; the operation is aborted without partial
    /// writes.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

impl LedgerError {
    /// Whether the error is transient and the operation may be retried.
    ///
    /// Validation, not-found, insufficient-funds, and conflict errors are
    /// deterministic and never retried.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::TransientStore(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_store_is_retryable() {
        assert!(LedgerError::TransientStore("timeout".into()).is_transient());
        assert!(!LedgerError::Validation("bad".into()).is_transient());
        assert!(!LedgerError::InsufficientFunds {
            available_cents: 10,
            required_cents: 20
        }
        .is_transient());
        assert!(!LedgerError::InvariantViolation("broken".into()).is_transient());
    }

    #[test]
    fn display_includes_amounts() {
        let err = LedgerError::InsufficientFunds {
            available_cents: 70,
            required_cents: 100,
        };
        assert_eq!(
            err.to_string(),
            "insufficient credits: available=70, required=100"
        );
    }
}
