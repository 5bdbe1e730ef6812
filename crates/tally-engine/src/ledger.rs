//! The balance ledger.
//!
//! `BalanceLedger` owns the authoritative balance rows. Every mutation runs
//! under the account's lock, checks the ledger invariant before persisting,
//! and lands the balance row, journal row, reservation row, and audit entry
//! in one atomic store write. For a single account the sequence of
//! balance/reserved values is a total order; accounts never contend with
//! each other.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::OwnedMutexGuard;

use tally_core::{
    AccountBalance, AccountId, AuditAction, AuditEntry, LedgerError, Metadata, Reservation, Result,
    Transaction, TransactionKind,
};
use tally_store::{DeltaBatch, Store};

use crate::cache::BalanceCache;
use crate::config::EngineConfig;
use crate::locks::AccountLocks;
use crate::retry::RetryPolicy;

/// A journal row to be written with a mutation.
///
/// The `balance_after` field of the resulting [`Transaction`] is computed
/// from the post-mutation balance, so drafts can be built before the
/// account is read.
#[derive(Debug, Clone)]
pub struct TransactionDraft {
    /// Journal row kind.
    pub kind: TransactionKind,

    /// Amount the row records, in cents. Always positive; usage rows are
    /// negated when built.
    pub amount_cents: i64,

    /// Human-readable description.
    pub description: String,

    /// Caller context.
    pub metadata: Metadata,
}

impl TransactionDraft {
    fn build(&self, account: &AccountBalance) -> Transaction {
        match self.kind {
            TransactionKind::Purchase => Transaction::purchase(
                account.account_id,
                self.amount_cents,
                account.balance_cents,
                self.description.clone(),
                self.metadata.clone(),
            ),
            TransactionKind::Usage => Transaction::usage(
                account.account_id,
                self.amount_cents,
                account.balance_cents,
                self.description.clone(),
                self.metadata.clone(),
            ),
            TransactionKind::Refund => Transaction::refund(
                account.account_id,
                self.amount_cents,
                account.balance_cents,
                self.description.clone(),
                self.metadata.clone(),
            ),
        }
    }
}

/// One balance mutation: deltas plus the records written alongside.
#[derive(Debug, Clone)]
pub struct BalanceDelta {
    /// Change to `balance_cents` (signed).
    pub balance_delta_cents: i64,

    /// Change to `reserved_cents` (signed).
    pub reserved_delta_cents: i64,

    /// Journal row to append, if the mutation is journaled.
    pub transaction: Option<TransactionDraft>,

    /// Audit action describing the mutation.
    pub action: AuditAction,

    /// Audit context (caller, reason).
    pub context: String,
}

/// Kind of credit addition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreditKind {
    /// A completed purchase.
    Purchase,

    /// A refund returning previously charged credits.
    Refund,
}

impl CreditKind {
    const fn transaction_kind(self) -> TransactionKind {
        match self {
            Self::Purchase => TransactionKind::Purchase,
            Self::Refund => TransactionKind::Refund,
        }
    }

    const fn as_str(self) -> &'static str {
        match self {
            Self::Purchase => "purchase",
            Self::Refund => "refund",
        }
    }
}

/// The authoritative balance store plus its cache mirror.
pub struct BalanceLedger {
    pub(crate) store: Arc<dyn Store>,
    pub(crate) cache: BalanceCache,
    pub(crate) locks: AccountLocks,
    pub(crate) retry: RetryPolicy,
    pub(crate) config: EngineConfig,
}

impl BalanceLedger {
    /// Create a ledger over the given store and cache backend.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, cache: BalanceCache, config: EngineConfig) -> Self {
        Self {
            store,
            cache,
            locks: AccountLocks::new(),
            retry: RetryPolicy::new(config.retry.clone()),
            config,
        }
    }

    /// Provision a new account with zero balance.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::AccountExists` if the account is already
    /// provisioned.
    pub async fn open_account(&self, account_id: AccountId) -> Result<AccountBalance> {
        let _guard = self.lock_account(account_id).await?;

        if self.store.get_account(&account_id)?.is_some() {
            return Err(LedgerError::AccountExists {
                account_id: account_id.to_string(),
            });
        }

        let account = AccountBalance::new(account_id);
        self.store.put_account(&account)?;
        tracing::info!(account_id = %account_id, "Account opened");
        Ok(account)
    }

    /// Read an account's balance, preferring the cache mirror.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::AccountNotFound` if the account is unknown.
    pub async fn balance(&self, account_id: AccountId) -> Result<AccountBalance> {
        if let Some(cached) = self.cache.get(&account_id).await {
            return Ok(cached);
        }

        let account =
            self.store
                .get_account(&account_id)?
                .ok_or_else(|| LedgerError::AccountNotFound {
                    account_id: account_id.to_string(),
                })?;

        self.cache.set(&account).await;
        Ok(account)
    }

    /// Add credits to an account, journaling a purchase or refund.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::Validation` for a non-positive or
    /// out-of-bounds amount or oversized metadata, and
    /// `LedgerError::AccountNotFound` for an unknown account.
    pub async fn credit(
        &self,
        account_id: AccountId,
        amount_cents: i64,
        kind: CreditKind,
        description: String,
        metadata: Metadata,
    ) -> Result<(AccountBalance, Transaction)> {
        if amount_cents <= 0 {
            return Err(LedgerError::Validation(
                "credit amount must be positive".into(),
            ));
        }
        if amount_cents > self.config.max_credit_cents {
            return Err(LedgerError::Validation(format!(
                "credit amount {amount_cents} exceeds maximum {}",
                self.config.max_credit_cents
            )));
        }
        metadata.validate()?;

        let (account, transaction) = self
            .apply_delta(
                account_id,
                BalanceDelta {
                    balance_delta_cents: amount_cents,
                    reserved_delta_cents: 0,
                    transaction: Some(TransactionDraft {
                        kind: kind.transaction_kind(),
                        amount_cents,
                        description,
                        metadata,
                    }),
                    action: AuditAction::Credit,
                    context: kind.as_str().into(),
                },
            )
            .await?;

        let transaction = transaction.ok_or_else(|| {
            LedgerError::InvariantViolation("journaled mutation produced no transaction".into())
        })?;

        Ok((account, transaction))
    }

    /// Apply one mutation under the account lock.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::AccountNotFound` for an unknown account,
    /// `LedgerError::InsufficientFunds` if the balance would go negative,
    /// and `LedgerError::InvariantViolation` if the reserved total would
    /// leave `0 <= reserved <= balance`.
    pub async fn apply_delta(
        &self,
        account_id: AccountId,
        delta: BalanceDelta,
    ) -> Result<(AccountBalance, Option<Transaction>)> {
        let guard = self.lock_account(account_id).await?;
        let result = self.apply_locked(account_id, &delta, None).await;
        drop(guard);
        result
    }

    /// Acquire the account lock with the configured timeout.
    pub(crate) async fn lock_account(&self, account_id: AccountId) -> Result<OwnedMutexGuard<()>> {
        self.locks
            .acquire(account_id, self.config.lock_timeout)
            .await
    }

    /// Apply one mutation while the caller holds the account lock.
    ///
    /// `reservation` is the reservation row to persist in the same write,
    /// already carrying its post-mutation status.
    pub(crate) async fn apply_locked(
        &self,
        account_id: AccountId,
        delta: &BalanceDelta,
        reservation: Option<&Reservation>,
    ) -> Result<(AccountBalance, Option<Transaction>)> {
        self.retry
            .run("apply_delta", || self.apply_once(account_id, delta, reservation))
            .await
    }

    /// One attempt at a mutation: read, check, write.
    async fn apply_once(
        &self,
        account_id: AccountId,
        delta: &BalanceDelta,
        reservation: Option<&Reservation>,
    ) -> Result<(AccountBalance, Option<Transaction>)> {
        let mut account =
            self.store
                .get_account(&account_id)?
                .ok_or_else(|| LedgerError::AccountNotFound {
                    account_id: account_id.to_string(),
                })?;

        let balance_before = account.balance_cents;
        let reserved_before = account.reserved_cents;

        let new_balance = balance_before + delta.balance_delta_cents;
        let new_reserved = reserved_before + delta.reserved_delta_cents;

        if new_balance < 0 {
            return Err(LedgerError::InsufficientFunds {
                available_cents: account.available_cents(),
                required_cents: delta.balance_delta_cents.abs(),
            });
        }
        if new_reserved < 0 || new_reserved > new_balance {
            tracing::error!(
                account_id = %account_id,
                action = delta.action.as_str(),
                balance = new_balance,
                reserved = new_reserved,
                "Aborting mutation that would break the ledger invariant"
            );
            return Err(LedgerError::InvariantViolation(format!(
                "reserved {new_reserved} outside [0, {new_balance}] for account {account_id}"
            )));
        }

        account.balance_cents = new_balance;
        account.reserved_cents = new_reserved;
        account.version += 1;
        account.updated_at = Utc::now();

        let transaction = delta.transaction.as_ref().map(|draft| draft.build(&account));

        let audit = AuditEntry {
            account_id,
            action: delta.action,
            amount_cents: if delta.balance_delta_cents != 0 {
                delta.balance_delta_cents
            } else {
                delta.reserved_delta_cents
            },
            balance_before_cents: balance_before,
            balance_after_cents: account.balance_cents,
            reserved_before_cents: reserved_before,
            reserved_after_cents: account.reserved_cents,
            reservation_id: reservation.map(|r| r.id),
            transaction_id: transaction.as_ref().map(|t| t.id),
            context: delta.context.clone(),
            timestamp: account.updated_at,
        };

        self.store.commit_delta(&DeltaBatch {
            account: &account,
            transaction: transaction.as_ref(),
            reservation,
            audit: Some(&audit),
        })?;

        self.cache.invalidate(&account_id).await;

        tracing::debug!(
            account_id = %account_id,
            action = delta.action.as_str(),
            balance = account.balance_cents,
            reserved = account.reserved_cents,
            version = account.version,
            "Applied balance delta"
        );

        Ok((account, transaction))
    }

    /// List journal rows for an account, newest first.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::TransientStore` if the store is unreachable.
    pub fn transactions(
        &self,
        account_id: AccountId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Transaction>> {
        Ok(self
            .store
            .list_transactions_by_account(&account_id, limit, offset)?)
    }

    /// List audit entries for an account, newest first.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::TransientStore` if the store is unreachable.
    pub fn audit_log(
        &self,
        account_id: AccountId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<AuditEntry>> {
        Ok(self.store.list_audit_by_account(&account_id, limit, offset)?)
    }
}
