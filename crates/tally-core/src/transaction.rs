//! Journal transaction types.
//!
//! Every balance change appends exactly one transaction to the journal.
//! Journal rows are immutable once written.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AccountId, Metadata, TransactionId};

/// An immutable journal row recording one balance change.
///
/// Transactions use ULIDs for time-ordered IDs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique transaction ID (ULID for time-ordering).
    pub id: TransactionId,

    /// The account whose balance was affected.
    pub account_id: AccountId,

    /// Type of transaction.
    pub kind: TransactionKind,

    /// Amount in cents. Positive = credit, negative = debit.
    pub amount_cents: i64,

    /// Balance after this transaction (in cents).
    pub balance_after_cents: i64,

    /// Human-readable description.
    pub description: String,

    /// Additional context (source, request id, etc.).
    pub metadata: Metadata,

    /// When the transaction was created.
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// Create a new purchase transaction (credits added by a payment).
    #[must_use]
    pub fn purchase(
        account_id: AccountId,
        amount_cents: i64,
        balance_after_cents: i64,
        description: String,
        metadata: Metadata,
    ) -> Self {
        Self {
            id: TransactionId::generate(),
            account_id,
            kind: TransactionKind::Purchase,
            amount_cents,
            balance_after_cents,
            description,
            metadata,
            created_at: Utc::now(),
        }
    }

    /// Create a new usage transaction (credits charged by a settlement).
    ///
    /// The stored amount is always negative.
    #[must_use]
    pub fn usage(
        account_id: AccountId,
        amount_cents: i64,
        balance_after_cents: i64,
        description: String,
        metadata: Metadata,
    ) -> Self {
        Self {
            id: TransactionId::generate(),
            account_id,
            kind: TransactionKind::Usage,
            amount_cents: -amount_cents.abs(),
            balance_after_cents,
            description,
            metadata,
            created_at: Utc::now(),
        }
    }

    /// Create a new refund transaction (credits returned).
    #[must_use]
    pub fn refund(
        account_id: AccountId,
        amount_cents: i64,
        balance_after_cents: i64,
        reason: String,
        metadata: Metadata,
    ) -> Self {
        Self {
            id: TransactionId::generate(),
            account_id,
            kind: TransactionKind::Refund,
            amount_cents,
            balance_after_cents,
            description: reason,
            metadata,
            created_at: Utc::now(),
        }
    }
}

/// Type of journal transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// Credits purchased (payment completed).
    Purchase,

    /// Credits charged for usage (reservation settled).
    Usage,

    /// Refund issued.
    Refund,
}

impl TransactionKind {
    /// Check if this transaction kind adds credits.
    #[must_use]
    pub const fn is_credit(&self) -> bool {
        matches!(self, Self::Purchase | Self::Refund)
    }

    /// Check if this transaction kind removes credits.
    #[must_use]
    pub const fn is_debit(&self) -> bool {
        matches!(self, Self::Usage)
    }
}
