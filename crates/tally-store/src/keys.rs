//! Key encoding utilities for `RocksDB`.
//!
//! This module provides functions for encoding and decoding keys used in
//! column families. UUIDs and ULIDs are stored as their 16 raw bytes;
//! expiry timestamps are big-endian so lexicographic iteration order is
//! due-time order.

use chrono::{DateTime, Utc};

use tally_core::{AccountId, ReservationId, TransactionId};

/// Create an account key from an account ID.
#[must_use]
pub fn account_key(account_id: &AccountId) -> Vec<u8> {
    account_id.as_bytes().to_vec()
}

/// Create a transaction key from a transaction ID.
#[must_use]
pub fn transaction_key(transaction_id: &TransactionId) -> Vec<u8> {
    transaction_id.to_bytes().to_vec()
}

/// Create an account-transaction index key.
///
/// Format: `account_id (16 bytes) || transaction_id (16 bytes)`
///
/// Since ULIDs are time-ordered, journal rows for an account sort by time.
#[must_use]
pub fn account_transaction_key(account_id: &AccountId, transaction_id: &TransactionId) -> Vec<u8> {
    let mut key = Vec::with_capacity(32);
    key.extend_from_slice(account_id.as_bytes());
    key.extend_from_slice(&transaction_id.to_bytes());
    key
}

/// Create a prefix for iterating all journal rows of an account.
#[must_use]
pub fn account_transactions_prefix(account_id: &AccountId) -> Vec<u8> {
    account_id.as_bytes().to_vec()
}

/// Extract the transaction ID from an account-transaction index key.
///
/// # Panics
///
/// Panics if the key is not at least 32 bytes.
#[must_use]
pub fn extract_transaction_id(key: &[u8]) -> TransactionId {
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&key[16..32]);
    TransactionId::from_bytes(bytes).expect("valid ULID bytes")
}

/// Create a reservation key from a reservation ID.
#[must_use]
pub fn reservation_key(reservation_id: &ReservationId) -> Vec<u8> {
    reservation_id.as_bytes().to_vec()
}

/// Create a pending-reservation index key.
///
/// Format: `account_id (16 bytes) || reservation_id (16 bytes)`
#[must_use]
pub fn pending_reservation_key(account_id: &AccountId, reservation_id: &ReservationId) -> Vec<u8> {
    let mut key = Vec::with_capacity(32);
    key.extend_from_slice(account_id.as_bytes());
    key.extend_from_slice(reservation_id.as_bytes());
    key
}

/// Create a prefix for iterating an account's pending holds.
#[must_use]
pub fn pending_reservations_prefix(account_id: &AccountId) -> Vec<u8> {
    account_id.as_bytes().to_vec()
}

/// Create an expiry index key.
///
/// Format: `expires_at millis (8 bytes, big-endian) || reservation_id (16 bytes)`
#[must_use]
pub fn expiry_key(expires_at: DateTime<Utc>, reservation_id: &ReservationId) -> Vec<u8> {
    let mut key = Vec::with_capacity(24);
    key.extend_from_slice(&expiry_millis(expires_at).to_be_bytes());
    key.extend_from_slice(reservation_id.as_bytes());
    key
}

/// Millisecond timestamp used in expiry index keys, clamped at the epoch.
#[must_use]
pub fn expiry_millis(expires_at: DateTime<Utc>) -> u64 {
    let millis = expires_at.timestamp_millis();
    if millis < 0 {
        0
    } else {
        millis.unsigned_abs()
    }
}

/// Extract the reservation ID from an expiry index key.
///
/// # Panics
///
/// Panics if the key is not at least 24 bytes.
#[must_use]
pub fn extract_reservation_id_from_expiry_key(key: &[u8]) -> ReservationId {
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&key[8..24]);
    ReservationId::from_uuid(uuid::Uuid::from_bytes(bytes))
}

/// Extract the expiry millis from an expiry index key.
///
/// # Panics
///
/// Panics if the key is not at least 8 bytes.
#[must_use]
pub fn extract_expiry_millis(key: &[u8]) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&key[..8]);
    u64::from_be_bytes(bytes)
}

/// Create an audit key from an account ID and a sequencing ULID.
///
/// Format: `account_id (16 bytes) || ulid (16 bytes)`
#[must_use]
pub fn audit_key(account_id: &AccountId, seq: &ulid::Ulid) -> Vec<u8> {
    let mut key = Vec::with_capacity(32);
    key.extend_from_slice(account_id.as_bytes());
    key.extend_from_slice(&seq.to_bytes());
    key
}

/// Create a prefix for iterating an account's audit entries.
#[must_use]
pub fn audit_prefix(account_id: &AccountId) -> Vec<u8> {
    account_id.as_bytes().to_vec()
}

/// Create an idempotency key from the external operation key.
#[must_use]
pub fn idempotency_key(key: &str) -> Vec<u8> {
    key.as_bytes().to_vec()
}

/// Create a cleanup-flag key from a reservation ID.
#[must_use]
pub fn cleanup_flag_key(reservation_id: &ReservationId) -> Vec<u8> {
    reservation_id.as_bytes().to_vec()
}
