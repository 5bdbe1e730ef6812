//! Account balance types.
//!
//! This module defines the authoritative balance record for an account:
//! total credits owned, credits held by active reservations, and the
//! monotonic version used to order snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::AccountId;

/// The authoritative credit balance for one account.
///
/// The invariant `0 <= reserved_cents <= balance_cents` holds at all times;
/// every mutation is checked before it is persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountBalance {
    /// The account this balance belongs to.
    pub account_id: AccountId,

    /// Total credits owned, in cents. Never negative.
    pub balance_cents: i64,

    /// Sum of all active (pending) holds, in cents. Never negative,
    /// never greater than `balance_cents`.
    pub reserved_cents: i64,

    /// Monotonically increasing version, bumped on every mutation.
    pub version: u64,

    /// When the account was created.
    pub created_at: DateTime<Utc>,

    /// When the balance was last updated.
    pub updated_at: DateTime<Utc>,
}

impl AccountBalance {
    /// Create a new account with zero balance.
    #[must_use]
    pub fn new(account_id: AccountId) -> Self {
        let now = Utc::now();
        Self {
            account_id,
            balance_cents: 0,
            reserved_cents: 0,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Credits available for new reservations: `balance - reserved`.
    #[must_use]
    pub const fn available_cents(&self) -> i64 {
        self.balance_cents - self.reserved_cents
    }

    /// Check whether the balance satisfies the ledger invariant.
    #[must_use]
    pub const fn invariants_hold(&self) -> bool {
        self.balance_cents >= 0
            && self.reserved_cents >= 0
            && self.reserved_cents <= self.balance_cents
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_account_is_empty() {
        let balance = AccountBalance::new(AccountId::generate());
        assert_eq!(balance.balance_cents, 0);
        assert_eq!(balance.reserved_cents, 0);
        assert_eq!(balance.available_cents(), 0);
        assert_eq!(balance.version, 0);
        assert!(balance.invariants_hold());
    }

    #[test]
    fn available_is_balance_minus_reserved() {
        let mut balance = AccountBalance::new(AccountId::generate());
        balance.balance_cents = 1000;
        balance.reserved_cents = 300;
        assert_eq!(balance.available_cents(), 700);
        assert!(balance.invariants_hold());
    }

    #[test]
    fn invariant_rejects_negative_balance() {
        let mut balance = AccountBalance::new(AccountId::generate());
        balance.balance_cents = -1;
        assert!(!balance.invariants_hold());
    }

    #[test]
    fn invariant_rejects_reserved_above_balance() {
        let mut balance = AccountBalance::new(AccountId::generate());
        balance.balance_cents = 100;
        balance.reserved_cents = 101;
        assert!(!balance.invariants_hold());
    }
}
