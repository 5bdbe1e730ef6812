//! Reservation (hold) types.
//!
//! A reservation is a time-bounded claim on credit placed before an
//! operation's final cost is known. It is created `Pending` and moves
//! exactly once to one of the terminal states; terminal states absorb
//! repeated transitions as no-ops.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AccountId, Metadata, ReservationId};

/// A temporary hold on account credit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reservation {
    /// Unique reservation ID.
    pub id: ReservationId,

    /// The account the hold is placed against.
    pub account_id: AccountId,

    /// Held amount in cents. Always positive.
    pub amount_cents: i64,

    /// Current lifecycle state.
    pub status: ReservationStatus,

    /// When the hold was created.
    pub created_at: DateTime<Utc>,

    /// When the hold expires if neither confirmed nor released.
    pub expires_at: DateTime<Utc>,

    /// Additional context.
    pub metadata: Metadata,
}

impl Reservation {
    /// Create a new pending reservation.
    #[must_use]
    pub fn new(
        account_id: AccountId,
        amount_cents: i64,
        expires_at: DateTime<Utc>,
        metadata: Metadata,
    ) -> Self {
        Self {
            id: ReservationId::generate(),
            account_id,
            amount_cents,
            status: ReservationStatus::Pending,
            created_at: Utc::now(),
            expires_at,
            metadata,
        }
    }

    /// Check if the reservation has reached a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Check if a still-pending reservation is past its expiry.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == ReservationStatus::Pending && now >= self.expires_at
    }
}

/// Lifecycle state of a reservation.
///
/// `Pending` is the only non-terminal state. The permitted transitions are
/// `Pending -> Confirmed`, `Pending -> Released`, and `Pending -> Expired`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    /// Hold is active; credit is reserved.
    Pending,

    /// Hold was settled; some or all of the held amount was charged.
    Confirmed,

    /// Hold was released; the held credit returned to available.
    Released,

    /// Hold lapsed past its expiry and was reclaimed by the cleanup worker.
    Expired,
}

impl ReservationStatus {
    /// Check if this state is terminal.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn pending(expires_in_secs: i64) -> Reservation {
        Reservation::new(
            AccountId::generate(),
            500,
            Utc::now() + Duration::seconds(expires_in_secs),
            Metadata::default(),
        )
    }

    #[test]
    fn new_reservation_is_pending() {
        let res = pending(60);
        assert_eq!(res.status, ReservationStatus::Pending);
        assert!(!res.is_terminal());
    }

    #[test]
    fn terminal_states() {
        assert!(!ReservationStatus::Pending.is_terminal());
        assert!(ReservationStatus::Confirmed.is_terminal());
        assert!(ReservationStatus::Released.is_terminal());
        assert!(ReservationStatus::Expired.is_terminal());
    }

    #[test]
    fn pending_past_expiry_is_expired() {
        let res = pending(-1);
        assert!(res.is_expired(Utc::now()));
    }

    #[test]
    fn pending_before_expiry_is_not_expired() {
        let res = pending(60);
        assert!(!res.is_expired(Utc::now()));
    }

    #[test]
    fn terminal_reservation_never_reports_expired() {
        let mut res = pending(-1);
        res.status = ReservationStatus::Confirmed;
        assert!(!res.is_expired(Utc::now()));
    }
}
