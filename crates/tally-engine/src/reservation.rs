//! Reservation lifecycle management.
//!
//! Holds are placed against available credit before an operation's cost is
//! known, then settled (`confirm`), returned (`release`), or reclaimed by
//! the cleanup worker (`expire`). All transitions run under the account
//! lock and re-check the reservation's state there, so a lost race resolves
//! to a no-op rather than a double-free of reserved credit.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use tally_core::{
    AccountId, AuditAction, LedgerError, Metadata, Reservation, ReservationId, ReservationStatus,
    Result, TransactionKind,
};

use crate::ledger::{BalanceDelta, BalanceLedger, TransactionDraft};

/// Orchestrates the hold lifecycle on top of the balance ledger.
pub struct ReservationManager {
    ledger: Arc<BalanceLedger>,
}

impl ReservationManager {
    /// Create a manager over the given ledger.
    #[must_use]
    pub fn new(ledger: Arc<BalanceLedger>) -> Self {
        Self { ledger }
    }

    /// Place a hold on available credit.
    ///
    /// # Errors
    ///
    /// - `LedgerError::Validation` for a non-positive or over-limit amount,
    ///   an out-of-bounds TTL, or oversized metadata.
    /// - `LedgerError::TooManyReservations` if the account is at its
    ///   concurrent-hold limit.
    /// - `LedgerError::InsufficientFunds` if `available < amount`; the
    ///   account is left unchanged.
    pub async fn reserve(
        &self,
        account_id: AccountId,
        amount_cents: i64,
        ttl: Duration,
        metadata: Metadata,
    ) -> Result<Reservation> {
        let config = &self.ledger.config;

        if amount_cents <= 0 {
            return Err(LedgerError::Validation(
                "reservation amount must be positive".into(),
            ));
        }
        if amount_cents > config.max_reservation_cents {
            return Err(LedgerError::Validation(format!(
                "reservation amount {amount_cents} exceeds maximum {}",
                config.max_reservation_cents
            )));
        }
        if ttl < config.min_reservation_ttl || ttl > config.max_reservation_ttl {
            return Err(LedgerError::Validation(format!(
                "reservation ttl {ttl:?} outside [{:?}, {:?}]",
                config.min_reservation_ttl, config.max_reservation_ttl
            )));
        }
        metadata.validate()?;

        let _guard = self.ledger.lock_account(account_id).await?;

        let pending = self.ledger.store.count_pending_reservations(&account_id)?;
        if pending >= config.max_concurrent_reservations {
            return Err(LedgerError::TooManyReservations {
                limit: config.max_concurrent_reservations,
            });
        }

        let account = self.ledger.store.get_account(&account_id)?.ok_or_else(|| {
            LedgerError::AccountNotFound {
                account_id: account_id.to_string(),
            }
        })?;
        if account.available_cents() < amount_cents {
            return Err(LedgerError::InsufficientFunds {
                available_cents: account.available_cents(),
                required_cents: amount_cents,
            });
        }

        let expires_at = Utc::now()
            + chrono::Duration::from_std(ttl).map_err(|_| {
                LedgerError::Validation(format!("reservation ttl {ttl:?} out of range"))
            })?;
        let reservation = Reservation::new(account_id, amount_cents, expires_at, metadata);

        self.ledger
            .apply_locked(
                account_id,
                &BalanceDelta {
                    balance_delta_cents: 0,
                    reserved_delta_cents: amount_cents,
                    transaction: None,
                    action: AuditAction::Reserve,
                    context: "reserve".into(),
                },
                Some(&reservation),
            )
            .await?;

        tracing::info!(
            account_id = %account_id,
            reservation_id = %reservation.id,
            amount_cents,
            expires_at = %reservation.expires_at,
            "Reserved credit"
        );

        Ok(reservation)
    }

    /// Settle a hold, charging `actual_amount_cents` of it.
    ///
    /// `actual_amount_cents` defaults to the full held amount; the unspent
    /// remainder silently returns to available credit. Confirming an
    /// already-terminal reservation is a successful no-op.
    ///
    /// # Errors
    ///
    /// - `LedgerError::ReservationNotFound` for an unknown id.
    /// - `LedgerError::Validation` if `actual_amount_cents` is negative or
    ///   exceeds the held amount.
    pub async fn confirm(
        &self,
        reservation_id: ReservationId,
        actual_amount_cents: Option<i64>,
    ) -> Result<()> {
        let reservation = self.load(reservation_id)?;
        let _guard = self.ledger.lock_account(reservation.account_id).await?;

        // Re-load under the lock; a racing confirm/release/expire may have
        // settled the hold already.
        let reservation = self.load(reservation_id)?;
        if reservation.is_terminal() {
            tracing::debug!(
                reservation_id = %reservation_id,
                status = ?reservation.status,
                "Confirm on terminal reservation is a no-op"
            );
            return Ok(());
        }

        let actual = actual_amount_cents.unwrap_or(reservation.amount_cents);
        if actual < 0 {
            return Err(LedgerError::Validation(
                "actual amount must not be negative".into(),
            ));
        }
        if actual > reservation.amount_cents {
            return Err(LedgerError::Validation(format!(
                "actual amount {actual} exceeds reserved amount {}",
                reservation.amount_cents
            )));
        }

        let mut settled = reservation.clone();
        settled.status = ReservationStatus::Confirmed;

        // Nothing was charged when the actual cost is zero, so no journal
        // row is written.
        let transaction = (actual > 0).then(|| TransactionDraft {
            kind: TransactionKind::Usage,
            amount_cents: actual,
            description: format!("Settled reservation {reservation_id}"),
            metadata: reservation.metadata.clone(),
        });

        self.ledger
            .apply_locked(
                reservation.account_id,
                &BalanceDelta {
                    balance_delta_cents: -actual,
                    reserved_delta_cents: -reservation.amount_cents,
                    transaction,
                    action: AuditAction::Confirm,
                    context: "confirm".into(),
                },
                Some(&settled),
            )
            .await?;

        tracing::info!(
            account_id = %reservation.account_id,
            reservation_id = %reservation_id,
            reserved_cents = reservation.amount_cents,
            actual_cents = actual,
            "Confirmed reservation"
        );

        Ok(())
    }

    /// Return a hold to available credit without charging anything.
    ///
    /// Releasing an already-terminal reservation is a successful no-op.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::ReservationNotFound` for an unknown id.
    pub async fn release(&self, reservation_id: ReservationId) -> Result<()> {
        self.finish(reservation_id, ReservationStatus::Released, AuditAction::Release)
            .await
    }

    /// Reclaim a lapsed hold. Driven by the cleanup worker.
    pub(crate) async fn expire(&self, reservation_id: ReservationId) -> Result<()> {
        self.finish(reservation_id, ReservationStatus::Expired, AuditAction::Expire)
            .await
    }

    /// Move a pending hold to a charge-free terminal state.
    async fn finish(
        &self,
        reservation_id: ReservationId,
        status: ReservationStatus,
        action: AuditAction,
    ) -> Result<()> {
        let reservation = self.load(reservation_id)?;
        let _guard = self.ledger.lock_account(reservation.account_id).await?;

        let reservation = self.load(reservation_id)?;
        if reservation.is_terminal() {
            tracing::debug!(
                reservation_id = %reservation_id,
                status = ?reservation.status,
                attempted = action.as_str(),
                "Transition on terminal reservation is a no-op"
            );
            return Ok(());
        }

        let mut finished = reservation.clone();
        finished.status = status;

        self.ledger
            .apply_locked(
                reservation.account_id,
                &BalanceDelta {
                    balance_delta_cents: 0,
                    reserved_delta_cents: -reservation.amount_cents,
                    transaction: None,
                    action,
                    context: action.as_str().into(),
                },
                Some(&finished),
            )
            .await?;

        tracing::info!(
            account_id = %reservation.account_id,
            reservation_id = %reservation_id,
            amount_cents = reservation.amount_cents,
            outcome = action.as_str(),
            "Returned reserved credit"
        );

        Ok(())
    }

    /// Fetch a reservation by id.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::ReservationNotFound` for an unknown id.
    pub fn get(&self, reservation_id: ReservationId) -> Result<Reservation> {
        self.load(reservation_id)
    }

    fn load(&self, reservation_id: ReservationId) -> Result<Reservation> {
        self.ledger
            .store
            .get_reservation(&reservation_id)?
            .ok_or_else(|| LedgerError::ReservationNotFound {
                reservation_id: reservation_id.to_string(),
            })
    }
}
