//! Core types for the tally credit ledger.
//!
//! This crate provides the foundational types used throughout the ledger:
//!
//! - **Identifiers**: `AccountId`, `ReservationId`, `TransactionId`
//! - **Balances**: `AccountBalance`
//! - **Journal**: `Transaction`, `TransactionKind`
//! - **Holds**: `Reservation`, `ReservationStatus`
//! - **Audit**: `AuditEntry`, `AuditAction`
//! - **Metadata**: `Metadata` (validated, size-bounded)
//!
//! # Credit Unit
//!
//! **1 credit = $0.01 (1 cent)**
//!
//! All amounts are stored as `i64` integer cents to avoid floating point
//! precision issues. Two decimal places of currency are representable
//! exactly.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod audit;
pub mod balance;
pub mod error;
pub mod ids;
pub mod metadata;
pub mod reservation;
pub mod transaction;

pub use audit::{AuditAction, AuditEntry};
pub use balance::AccountBalance;
pub use error::{LedgerError, Result};
pub use ids::{AccountId, IdError, ReservationId, TransactionId};
pub use metadata::{Metadata, MAX_METADATA_FIELD_BYTES};
pub use reservation::{Reservation, ReservationStatus};
pub use transaction::{Transaction, TransactionKind};
