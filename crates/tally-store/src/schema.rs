//! Database schema definitions and column families.
//!
//! This module defines the column families used in `RocksDB` storage.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Balance rows, keyed by `account_id`.
    pub const ACCOUNTS: &str = "accounts";

    /// Journal rows, keyed by `transaction_id` (ULID).
    pub const TRANSACTIONS: &str = "transactions";

    /// Index: journal rows by account, keyed by `account_id || transaction_id`.
    /// Value is empty (index only).
    pub const TRANSACTIONS_BY_ACCOUNT: &str = "transactions_by_account";

    /// Reservation rows, keyed by `reservation_id`.
    pub const RESERVATIONS: &str = "reservations";

    /// Index: pending holds by account, keyed by `account_id || reservation_id`.
    /// Entries exist only while the hold is pending. Value is empty.
    pub const RESERVATIONS_BY_ACCOUNT: &str = "reservations_by_account";

    /// Index: pending holds ordered by expiry, keyed by
    /// `expires_at_millis (8 bytes BE) || reservation_id`. Entries exist only
    /// while the hold is pending. Value is empty.
    pub const RESERVATIONS_BY_EXPIRY: &str = "reservations_by_expiry";

    /// Audit entries, keyed by `account_id || ULID`.
    pub const AUDIT_LOG: &str = "audit_log";

    /// Idempotency records, keyed by the external operation key.
    pub const IDEMPOTENCY: &str = "idempotency";

    /// Expiry-failure counters, keyed by `reservation_id`.
    pub const CLEANUP_FLAGS: &str = "cleanup_flags";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::ACCOUNTS,
        cf::TRANSACTIONS,
        cf::TRANSACTIONS_BY_ACCOUNT,
        cf::RESERVATIONS,
        cf::RESERVATIONS_BY_ACCOUNT,
        cf::RESERVATIONS_BY_EXPIRY,
        cf::AUDIT_LOG,
        cf::IDEMPOTENCY,
        cf::CLEANUP_FLAGS,
    ]
}
