//! Credit ledger and reservation engine.
//!
//! This crate implements metering and billing for a paid service:
//! per-account credit balances, temporary holds ("reservations") placed
//! before an operation's cost is known, and settlement of those holds once
//! the actual cost is determined. It guarantees that a balance never goes
//! negative, that concurrent holds never over-commit available credit, and
//! that duplicate external events never double-credit an account.
//!
//! # Components
//!
//! - [`BalanceLedger`]: locked read-modify-write over the authoritative
//!   balance rows, journaling and auditing every mutation.
//! - [`BalanceCache`]: fail-open read-through mirror with a circuit
//!   breaker.
//! - [`ReservationManager`]: the hold lifecycle
//!   (`reserve`/`confirm`/`release`).
//! - [`CleanupWorker`]: periodic sweep returning lapsed holds to the
//!   available pool.
//! - [`IdempotencyGuard`]: at-most-once execution of externally keyed
//!   credit additions.
//! - [`CreditEngine`]: the assembled engine.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use tally_core::{AccountId, Metadata};
//! use tally_engine::{CreditEngine, CreditKind, EngineConfig, MemoryCache};
//! use tally_store::RocksStore;
//!
//! # async fn demo() -> tally_core::Result<()> {
//! let store = Arc::new(RocksStore::open("/data/tally")?);
//! let engine = CreditEngine::new(store, Arc::new(MemoryCache::new()), EngineConfig::from_env());
//!
//! let account_id = AccountId::generate();
//! engine.open_account(account_id).await?;
//! engine
//!     .credit_once("pay_123", account_id, 5000, CreditKind::Purchase,
//!         "Purchased $50".into(), Metadata::default())
//!     .await?;
//!
//! // Hold credit before running the operation, settle with the actual cost.
//! let hold = engine
//!     .reserve(account_id, 300, Duration::from_secs(60), Metadata::default())
//!     .await?;
//! engine.confirm(hold.id, Some(220)).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod cache;
pub mod cleanup;
pub mod config;
pub mod engine;
pub mod idempotency;
pub mod ledger;
pub mod reservation;
pub mod retry;

mod locks;

pub use cache::{BalanceCache, CacheBackend, CacheError, CacheResult, MemoryCache};
pub use cleanup::{CleanupHandle, CleanupWorker, SweepReport};
pub use config::EngineConfig;
pub use engine::{CreditEngine, CreditReceipt};
pub use idempotency::IdempotencyGuard;
pub use ledger::{BalanceDelta, BalanceLedger, CreditKind, TransactionDraft};
pub use reservation::ReservationManager;
pub use retry::{RetryConfig, RetryPolicy};

#[cfg(feature = "redis-backend")]
pub use cache::RedisCache;
