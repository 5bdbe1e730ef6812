//! `RocksDB` storage layer for the tally credit ledger.
//!
//! This crate provides persistent storage for account balances, the
//! transaction journal, the audit log, reservations, and idempotency
//! records, using `RocksDB` with column families for efficient indexing.
//!
//! # Architecture
//!
//! The storage uses the following column families:
//!
//! - `accounts`: Balance rows, keyed by `account_id`
//! - `transactions`: Journal rows, keyed by `transaction_id` (ULID)
//! - `transactions_by_account`: Index for listing a journal by account
//! - `reservations`: Reservation rows, keyed by `reservation_id`
//! - `reservations_by_account`: Index over *pending* holds per account
//! - `reservations_by_expiry`: Expiry-ordered index over pending holds
//! - `audit_log`: Audit entries, keyed by `account_id || ULID`
//! - `idempotency`: External-operation records, keyed by the caller's key
//! - `cleanup_flags`: Failure counters for holds the sweeper cannot expire
//!
//! All balance-affecting writes go through [`Store::commit_delta`], which
//! lands the balance row, the journal row, the reservation row, and the
//! audit entry in one atomic `WriteBatch`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod keys;
pub mod rocks;
pub mod schema;

pub use error::{Result, StoreError};
pub use rocks::RocksStore;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use tally_core::{
    AccountBalance, AccountId, AuditEntry, Reservation, ReservationId, Transaction, TransactionId,
};

/// One atomic balance mutation and the records written alongside it.
///
/// The `account` row is the already-updated balance. The optional journal
/// row, reservation row, and audit entry ride in the same `WriteBatch`, so
/// either the whole mutation lands or none of it does.
#[derive(Debug)]
pub struct DeltaBatch<'a> {
    /// The updated balance row.
    pub account: &'a AccountBalance,

    /// Journal row to append, if the mutation is journaled.
    pub transaction: Option<&'a Transaction>,

    /// Reservation row to upsert. Pending rows are added to the account and
    /// expiry indexes; terminal rows are removed from them.
    pub reservation: Option<&'a Reservation>,

    /// Audit entry to append.
    pub audit: Option<&'a AuditEntry>,
}

/// Durable record of an externally keyed operation.
///
/// Written `InFlight` before the operation runs and replaced by a
/// `Completed` record carrying the cached result. Records expire after
/// their TTL and are then treated as absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    /// The external operation key (e.g. a payment id).
    pub key: String,

    /// Whether the operation is running or has completed.
    pub status: IdempotencyStatus,

    /// Cached result of the completed operation.
    pub result: Option<serde_json::Value>,

    /// When the record was written.
    pub created_at: DateTime<Utc>,

    /// When the record lapses.
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    /// Create an in-flight record with the given time-to-live.
    #[must_use]
    pub fn in_flight(key: impl Into<String>, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            key: key.into(),
            status: IdempotencyStatus::InFlight,
            result: None,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    /// Create a completed record carrying the operation result.
    #[must_use]
    pub fn completed(key: impl Into<String>, result: serde_json::Value, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            key: key.into(),
            status: IdempotencyStatus::Completed,
            result: Some(result),
            created_at: now,
            expires_at: now + ttl,
        }
    }

    /// Check if the record has lapsed.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Status of an idempotency record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdempotencyStatus {
    /// The operation is currently running.
    InFlight,

    /// The operation completed; `result` holds its cached output.
    Completed,
}

/// The storage trait defining all database operations.
///
/// This trait abstracts the storage layer, allowing for different
/// implementations (e.g. `RocksDB`, in-memory for testing). Implementations
/// must be safe to share across threads; per-account write serialization is
/// enforced above this layer.
pub trait Store: Send + Sync {
    // =========================================================================
    // Account Operations
    // =========================================================================

    /// Insert or overwrite a balance row.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_account(&self, account: &AccountBalance) -> Result<()>;

    /// Get a balance row by account ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_account(&self, account_id: &AccountId) -> Result<Option<AccountBalance>>;

    /// Atomically commit one balance mutation and its side records.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails. On error nothing
    /// from the batch is persisted.
    fn commit_delta(&self, batch: &DeltaBatch<'_>) -> Result<()>;

    // =========================================================================
    // Journal Operations
    // =========================================================================

    /// Get a journal row by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_transaction(&self, transaction_id: &TransactionId) -> Result<Option<Transaction>>;

    /// List journal rows for an account, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_transactions_by_account(
        &self,
        account_id: &AccountId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Transaction>>;

    // =========================================================================
    // Reservation Operations
    // =========================================================================

    /// Get a reservation by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_reservation(&self, reservation_id: &ReservationId) -> Result<Option<Reservation>>;

    /// Count the pending holds against an account.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn count_pending_reservations(&self, account_id: &AccountId) -> Result<usize>;

    /// List pending reservations whose `expires_at` is at or before `now`,
    /// oldest expiry first, up to `limit`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_due_reservations(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Reservation>>;

    // =========================================================================
    // Audit Operations
    // =========================================================================

    /// List audit entries for an account, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_audit_by_account(
        &self,
        account_id: &AccountId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<AuditEntry>>;

    // =========================================================================
    // Idempotency Operations
    // =========================================================================

    /// Get the record for an external operation key.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_idempotency(&self, key: &str) -> Result<Option<IdempotencyRecord>>;

    /// Insert or overwrite the record for an external operation key.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_idempotency(&self, record: &IdempotencyRecord) -> Result<()>;

    /// Delete the record for an external operation key. Deleting an absent
    /// key is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn delete_idempotency(&self, key: &str) -> Result<()>;

    // =========================================================================
    // Cleanup Bookkeeping
    // =========================================================================

    /// Number of failed expiry attempts recorded for a reservation.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn cleanup_failure_count(&self, reservation_id: &ReservationId) -> Result<u32>;

    /// Record one more failed expiry attempt; returns the new count.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn bump_cleanup_failures(&self, reservation_id: &ReservationId) -> Result<u32>;

    /// Clear the failure counter after a successful expiry.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn clear_cleanup_failures(&self, reservation_id: &ReservationId) -> Result<()>;
}
