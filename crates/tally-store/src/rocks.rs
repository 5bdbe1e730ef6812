//! `RocksDB` storage implementation.
//!
//! This module provides the `RocksStore` implementation of the `Store` trait.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, Direction, IteratorMode, Options,
    WriteBatch,
};
use ulid::Ulid;

use tally_core::{
    AccountBalance, AccountId, AuditEntry, Reservation, ReservationId, ReservationStatus,
    Transaction, TransactionId,
};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::{all_column_families, cf};
use crate::{DeltaBatch, IdempotencyRecord, Store};

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<rocksdb::MultiThreaded>>,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// Read a raw value from a column family.
    fn get_raw(&self, cf_name: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let cf = self.cf(cf_name)?;
        self.db
            .get_cf(&cf, key)
            .map_err(|e| StoreError::Database(e.to_string()))
    }
}

impl Store for RocksStore {
    // =========================================================================
    // Account Operations
    // =========================================================================

    fn put_account(&self, account: &AccountBalance) -> Result<()> {
        let cf = self.cf(cf::ACCOUNTS)?;
        let key = keys::account_key(&account.account_id);
        let value = Self::serialize(account)?;

        self.db
            .put_cf(&cf, key, value)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(())
    }

    fn get_account(&self, account_id: &AccountId) -> Result<Option<AccountBalance>> {
        self.get_raw(cf::ACCOUNTS, &keys::account_key(account_id))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn commit_delta(&self, batch: &DeltaBatch<'_>) -> Result<()> {
        let cf_accounts = self.cf(cf::ACCOUNTS)?;
        let account_key = keys::account_key(&batch.account.account_id);
        let account_value = Self::serialize(batch.account)?;

        let mut wb = WriteBatch::default();
        wb.put_cf(&cf_accounts, &account_key, &account_value);

        if let Some(tx) = batch.transaction {
            let cf_tx = self.cf(cf::TRANSACTIONS)?;
            let cf_by_account = self.cf(cf::TRANSACTIONS_BY_ACCOUNT)?;
            wb.put_cf(&cf_tx, keys::transaction_key(&tx.id), Self::serialize(tx)?);
            wb.put_cf(
                &cf_by_account,
                keys::account_transaction_key(&tx.account_id, &tx.id),
                [],
            );
        }

        if let Some(res) = batch.reservation {
            let cf_res = self.cf(cf::RESERVATIONS)?;
            let cf_by_account = self.cf(cf::RESERVATIONS_BY_ACCOUNT)?;
            let cf_by_expiry = self.cf(cf::RESERVATIONS_BY_EXPIRY)?;

            wb.put_cf(
                &cf_res,
                keys::reservation_key(&res.id),
                Self::serialize(res)?,
            );

            // Indexes track pending holds only.
            let account_idx = keys::pending_reservation_key(&res.account_id, &res.id);
            let expiry_idx = keys::expiry_key(res.expires_at, &res.id);
            if res.status == ReservationStatus::Pending {
                wb.put_cf(&cf_by_account, &account_idx, []);
                wb.put_cf(&cf_by_expiry, &expiry_idx, []);
            } else {
                wb.delete_cf(&cf_by_account, &account_idx);
                wb.delete_cf(&cf_by_expiry, &expiry_idx);
            }
        }

        if let Some(entry) = batch.audit {
            // Audit is best-effort: an entry that cannot be serialized is
            // dropped, never a reason to fail the balance mutation.
            match Self::serialize(entry) {
                Ok(value) => {
                    let cf_audit = self.cf(cf::AUDIT_LOG)?;
                    wb.put_cf(
                        &cf_audit,
                        keys::audit_key(&entry.account_id, &Ulid::new()),
                        value,
                    );
                }
                Err(e) => {
                    tracing::error!(
                        account_id = %entry.account_id,
                        action = entry.action.as_str(),
                        error = %e,
                        "Dropping unserializable audit entry"
                    );
                }
            }
        }

        self.db
            .write(wb)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    // =========================================================================
    // Journal Operations
    // =========================================================================

    fn get_transaction(&self, transaction_id: &TransactionId) -> Result<Option<Transaction>> {
        self.get_raw(cf::TRANSACTIONS, &keys::transaction_key(transaction_id))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn list_transactions_by_account(
        &self,
        account_id: &AccountId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Transaction>> {
        let cf_by_account = self.cf(cf::TRANSACTIONS_BY_ACCOUNT)?;
        let prefix = keys::account_transactions_prefix(account_id);

        let iter = self
            .db
            .iterator_cf(&cf_by_account, IteratorMode::From(&prefix, Direction::Forward));

        // Collect matching keys; ULID suffixes make them time-ordered.
        let mut all_keys: Vec<Vec<u8>> = Vec::new();
        for item in iter {
            let (key, _) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if !key.starts_with(&prefix) {
                break;
            }
            all_keys.push(key.to_vec());
        }

        // Reverse to get newest first.
        all_keys.reverse();

        let mut transactions = Vec::new();
        for key in all_keys.into_iter().skip(offset) {
            if transactions.len() >= limit {
                break;
            }
            let tx_id = keys::extract_transaction_id(&key);
            if let Some(tx) = self.get_transaction(&tx_id)? {
                transactions.push(tx);
            }
        }

        Ok(transactions)
    }

    // =========================================================================
    // Reservation Operations
    // =========================================================================

    fn get_reservation(&self, reservation_id: &ReservationId) -> Result<Option<Reservation>> {
        self.get_raw(cf::RESERVATIONS, &keys::reservation_key(reservation_id))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn count_pending_reservations(&self, account_id: &AccountId) -> Result<usize> {
        let cf_by_account = self.cf(cf::RESERVATIONS_BY_ACCOUNT)?;
        let prefix = keys::pending_reservations_prefix(account_id);

        let iter = self
            .db
            .iterator_cf(&cf_by_account, IteratorMode::From(&prefix, Direction::Forward));

        let mut count = 0;
        for item in iter {
            let (key, _) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if !key.starts_with(&prefix) {
                break;
            }
            count += 1;
        }

        Ok(count)
    }

    fn list_due_reservations(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Reservation>> {
        let cf_by_expiry = self.cf(cf::RESERVATIONS_BY_EXPIRY)?;
        let now_millis = keys::expiry_millis(now);

        let mut due = Vec::new();
        for item in self.db.iterator_cf(&cf_by_expiry, IteratorMode::Start) {
            let (key, _) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if keys::extract_expiry_millis(&key) > now_millis || due.len() >= limit {
                break;
            }

            let reservation_id = keys::extract_reservation_id_from_expiry_key(&key);
            // Skip stale index entries; the row is authoritative.
            if let Some(res) = self.get_reservation(&reservation_id)? {
                if res.status == ReservationStatus::Pending {
                    due.push(res);
                }
            }
        }

        Ok(due)
    }

    // =========================================================================
    // Audit Operations
    // =========================================================================

    fn list_audit_by_account(
        &self,
        account_id: &AccountId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<AuditEntry>> {
        let cf_audit = self.cf(cf::AUDIT_LOG)?;
        let prefix = keys::audit_prefix(account_id);

        let iter = self
            .db
            .iterator_cf(&cf_audit, IteratorMode::From(&prefix, Direction::Forward));

        let mut all_values: Vec<Vec<u8>> = Vec::new();
        for item in iter {
            let (key, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if !key.starts_with(&prefix) {
                break;
            }
            all_values.push(value.to_vec());
        }

        all_values.reverse();

        all_values
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|data| Self::deserialize(&data))
            .collect()
    }

    // =========================================================================
    // Idempotency Operations
    // =========================================================================

    fn get_idempotency(&self, key: &str) -> Result<Option<IdempotencyRecord>> {
        self.get_raw(cf::IDEMPOTENCY, &keys::idempotency_key(key))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn put_idempotency(&self, record: &IdempotencyRecord) -> Result<()> {
        let cf = self.cf(cf::IDEMPOTENCY)?;
        let key = keys::idempotency_key(&record.key);
        let value = Self::serialize(record)?;

        self.db
            .put_cf(&cf, key, value)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn delete_idempotency(&self, key: &str) -> Result<()> {
        let cf = self.cf(cf::IDEMPOTENCY)?;
        self.db
            .delete_cf(&cf, keys::idempotency_key(key))
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    // =========================================================================
    // Cleanup Bookkeeping
    // =========================================================================

    fn cleanup_failure_count(&self, reservation_id: &ReservationId) -> Result<u32> {
        let count = self
            .get_raw(cf::CLEANUP_FLAGS, &keys::cleanup_flag_key(reservation_id))?
            .and_then(|data| data.try_into().ok().map(u32::from_be_bytes))
            .unwrap_or(0);
        Ok(count)
    }

    fn bump_cleanup_failures(&self, reservation_id: &ReservationId) -> Result<u32> {
        let cf = self.cf(cf::CLEANUP_FLAGS)?;
        let count = self.cleanup_failure_count(reservation_id)?.saturating_add(1);

        self.db
            .put_cf(
                &cf,
                keys::cleanup_flag_key(reservation_id),
                count.to_be_bytes(),
            )
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(count)
    }

    fn clear_cleanup_failures(&self, reservation_id: &ReservationId) -> Result<()> {
        let cf = self.cf(cf::CLEANUP_FLAGS)?;
        self.db
            .delete_cf(&cf, keys::cleanup_flag_key(reservation_id))
            .map_err(|e| StoreError::Database(e.to_string()))
    }
}
