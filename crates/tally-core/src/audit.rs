//! Audit log types.
//!
//! One audit entry is appended per balance mutation, recording the
//! before/after state. Entries are best-effort: losing one never blocks or
//! rolls back the mutation it describes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AccountId, ReservationId, TransactionId};

/// An append-only before/after snapshot of one balance mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// The account that was mutated.
    pub account_id: AccountId,

    /// What happened.
    pub action: AuditAction,

    /// The amount the action operated on, in cents.
    pub amount_cents: i64,

    /// Balance before the mutation.
    pub balance_before_cents: i64,

    /// Balance after the mutation.
    pub balance_after_cents: i64,

    /// Reserved total before the mutation.
    pub reserved_before_cents: i64,

    /// Reserved total after the mutation.
    pub reserved_after_cents: i64,

    /// The reservation involved, if any.
    pub reservation_id: Option<ReservationId>,

    /// The journal transaction written alongside, if any.
    pub transaction_id: Option<TransactionId>,

    /// Free-form context (caller, reason).
    pub context: String,

    /// When the mutation happened.
    pub timestamp: DateTime<Utc>,
}

/// The kind of mutation an audit entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// Credits added (purchase or refund).
    Credit,

    /// A hold was placed.
    Reserve,

    /// A hold was settled.
    Confirm,

    /// A hold was released by the caller.
    Release,

    /// A hold lapsed and was reclaimed by cleanup.
    Expire,
}

impl AuditAction {
    /// Stable string name, used in logs and cache keys.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Credit => "credit",
            Self::Reserve => "reserve",
            Self::Confirm => "confirm",
            Self::Release => "release",
            Self::Expire => "expire",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_names() {
        assert_eq!(AuditAction::Credit.as_str(), "credit");
        assert_eq!(AuditAction::Reserve.as_str(), "reserve");
        assert_eq!(AuditAction::Expire.as_str(), "expire");
    }

    #[test]
    fn entry_serde_roundtrip() {
        let entry = AuditEntry {
            account_id: AccountId::generate(),
            action: AuditAction::Reserve,
            amount_cents: 300,
            balance_before_cents: 1000,
            balance_after_cents: 1000,
            reserved_before_cents: 0,
            reserved_after_cents: 300,
            reservation_id: Some(ReservationId::generate()),
            transaction_id: None,
            context: "reserve".into(),
            timestamp: Utc::now(),
        };

        let json = serde_json::to_string(&entry).unwrap();
        let parsed: AuditEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.action, AuditAction::Reserve);
        assert_eq!(parsed.reserved_after_cents, 300);
    }
}
