//! Per-account lock registry.
//!
//! Balance mutations for one account serialize on an async mutex; mutations
//! for different accounts proceed independently. Lock acquisition is
//! bounded: a caller that cannot get the lock in time receives a transient
//! error and may retry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard};

use tally_core::{AccountId, LedgerError, Result};

/// Registry of per-account mutexes.
///
/// Entries are created on first use and kept for the life of the engine;
/// each is a handful of bytes.
#[derive(Default)]
pub(crate) struct AccountLocks {
    inner: Mutex<HashMap<AccountId, Arc<Mutex<()>>>>,
}

impl AccountLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for one account, waiting at most `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::TransientStore` if the lock cannot be acquired
    /// within `timeout`.
    pub async fn acquire(
        &self,
        account_id: AccountId,
        timeout: Duration,
    ) -> Result<OwnedMutexGuard<()>> {
        let entry = {
            let mut map = self.inner.lock().await;
            Arc::clone(map.entry(account_id).or_default())
        };

        tokio::time::timeout(timeout, entry.lock_owned())
            .await
            .map_err(|_| {
                LedgerError::TransientStore(format!(
                    "timed out waiting for account lock: {account_id}"
                ))
            })
    }
}
