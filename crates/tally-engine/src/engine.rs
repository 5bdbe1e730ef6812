//! Engine assembly.
//!
//! `CreditEngine` wires the store, cache backend, and configuration into
//! the ledger, reservation manager, and idempotency guard, and hands out
//! cleanup workers. Construct one at startup and share it; the store
//! closes when the last reference drops.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use tally_core::{
    AccountBalance, AccountId, AuditEntry, Metadata, Reservation, ReservationId, Result,
    Transaction, TransactionId,
};
use tally_store::Store;

use crate::cache::{BalanceCache, CacheBackend};
use crate::cleanup::CleanupWorker;
use crate::config::EngineConfig;
use crate::idempotency::IdempotencyGuard;
use crate::ledger::{BalanceLedger, CreditKind};
use crate::reservation::ReservationManager;

/// Cached outcome of an idempotent credit addition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditReceipt {
    /// The credited account.
    pub account_id: AccountId,

    /// The journal row recording the credit.
    pub transaction_id: TransactionId,

    /// Amount added, in cents.
    pub amount_cents: i64,

    /// Balance after the credit landed.
    pub balance_after_cents: i64,
}

/// The assembled credit ledger and reservation engine.
pub struct CreditEngine {
    ledger: Arc<BalanceLedger>,
    reservations: Arc<ReservationManager>,
    guard: IdempotencyGuard,
    store: Arc<dyn Store>,
    backend: Arc<dyn CacheBackend>,
    config: EngineConfig,
}

impl CreditEngine {
    /// Assemble an engine over the given store and cache backend.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        backend: Arc<dyn CacheBackend>,
        config: EngineConfig,
    ) -> Self {
        let cache = BalanceCache::new(
            Arc::clone(&backend),
            config.cache_ttl,
            config.cache_cooldown,
        );
        let ledger = Arc::new(BalanceLedger::new(
            Arc::clone(&store),
            cache,
            config.clone(),
        ));
        let reservations = Arc::new(ReservationManager::new(Arc::clone(&ledger)));
        let guard = IdempotencyGuard::new(Arc::clone(&store), &config);

        Self {
            ledger,
            reservations,
            guard,
            store,
            backend,
            config,
        }
    }

    /// The balance ledger.
    #[must_use]
    pub fn ledger(&self) -> &BalanceLedger {
        &self.ledger
    }

    /// The reservation manager.
    #[must_use]
    pub fn reservations(&self) -> &ReservationManager {
        &self.reservations
    }

    /// The idempotency guard.
    #[must_use]
    pub fn idempotency(&self) -> &IdempotencyGuard {
        &self.guard
    }

    /// Build a cleanup worker sharing this engine's store and token
    /// backend. Call [`CleanupWorker::spawn`] to run it periodically.
    #[must_use]
    pub fn cleanup_worker(&self) -> CleanupWorker {
        CleanupWorker::new(
            Arc::clone(&self.reservations),
            Arc::clone(&self.store),
            Arc::clone(&self.backend),
            self.config.clone(),
        )
    }

    // =========================================================================
    // Convenience passthroughs
    // =========================================================================

    /// Provision a new account with zero balance.
    ///
    /// # Errors
    ///
    /// See [`BalanceLedger::open_account`].
    pub async fn open_account(&self, account_id: AccountId) -> Result<AccountBalance> {
        self.ledger.open_account(account_id).await
    }

    /// Read an account's balance.
    ///
    /// # Errors
    ///
    /// See [`BalanceLedger::balance`].
    pub async fn balance(&self, account_id: AccountId) -> Result<AccountBalance> {
        self.ledger.balance(account_id).await
    }

    /// Place a hold on available credit.
    ///
    /// # Errors
    ///
    /// See [`ReservationManager::reserve`].
    pub async fn reserve(
        &self,
        account_id: AccountId,
        amount_cents: i64,
        ttl: Duration,
        metadata: Metadata,
    ) -> Result<Reservation> {
        self.reservations
            .reserve(account_id, amount_cents, ttl, metadata)
            .await
    }

    /// Settle a hold.
    ///
    /// # Errors
    ///
    /// See [`ReservationManager::confirm`].
    pub async fn confirm(
        &self,
        reservation_id: ReservationId,
        actual_amount_cents: Option<i64>,
    ) -> Result<()> {
        self.reservations
            .confirm(reservation_id, actual_amount_cents)
            .await
    }

    /// Release a hold.
    ///
    /// # Errors
    ///
    /// See [`ReservationManager::release`].
    pub async fn release(&self, reservation_id: ReservationId) -> Result<()> {
        self.reservations.release(reservation_id).await
    }

    /// Add credits, journaling a purchase or refund.
    ///
    /// # Errors
    ///
    /// See [`BalanceLedger::credit`].
    pub async fn credit(
        &self,
        account_id: AccountId,
        amount_cents: i64,
        kind: CreditKind,
        description: String,
        metadata: Metadata,
    ) -> Result<(AccountBalance, Transaction)> {
        self.ledger
            .credit(account_id, amount_cents, kind, description, metadata)
            .await
    }

    /// Add credits at most once for an external operation key.
    ///
    /// This is the payment-completion path: a payment webhook retried any
    /// number of times with the same `external_key` adds credits exactly
    /// once. Subsequent calls return the receipt of the first.
    ///
    /// # Errors
    ///
    /// - `LedgerError::KeyInFlight` if the first call is still running.
    /// - Otherwise see [`BalanceLedger::credit`].
    pub async fn credit_once(
        &self,
        external_key: &str,
        account_id: AccountId,
        amount_cents: i64,
        kind: CreditKind,
        description: String,
        metadata: Metadata,
    ) -> Result<CreditReceipt> {
        self.guard
            .run_once(external_key, || async {
                let (account, transaction) = self
                    .ledger
                    .credit(account_id, amount_cents, kind, description, metadata)
                    .await?;
                Ok(CreditReceipt {
                    account_id,
                    transaction_id: transaction.id,
                    amount_cents: transaction.amount_cents,
                    balance_after_cents: account.balance_cents,
                })
            })
            .await
    }

    /// List journal rows for an account, newest first.
    ///
    /// # Errors
    ///
    /// See [`BalanceLedger::transactions`].
    pub fn transactions(
        &self,
        account_id: AccountId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Transaction>> {
        self.ledger.transactions(account_id, limit, offset)
    }

    /// List audit entries for an account, newest first.
    ///
    /// # Errors
    ///
    /// See [`BalanceLedger::audit_log`].
    pub fn audit_log(
        &self,
        account_id: AccountId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<AuditEntry>> {
        self.ledger.audit_log(account_id, limit, offset)
    }
}
