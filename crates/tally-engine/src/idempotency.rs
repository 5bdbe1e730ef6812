//! Idempotency guard for externally keyed operations.
//!
//! Wraps credit additions triggered by external events (payment
//! completions, webhook retries) so the same external key can only ever run
//! the operation once. Completed results are cached against the key with a
//! bounded TTL; a key whose operation is still running is rejected rather
//! than raced.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;

use tally_core::{LedgerError, Result};
use tally_store::{IdempotencyRecord, IdempotencyStatus, Store};

use crate::config::EngineConfig;

/// Deduplicates externally triggered operations by key.
pub struct IdempotencyGuard {
    store: Arc<dyn Store>,
    in_flight: Mutex<HashSet<String>>,
    completed_ttl: chrono::Duration,
    inflight_ttl: chrono::Duration,
}

impl IdempotencyGuard {
    /// Create a guard over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, config: &EngineConfig) -> Self {
        Self {
            store,
            in_flight: Mutex::new(HashSet::new()),
            completed_ttl: chrono::Duration::from_std(config.idempotency_ttl)
                .unwrap_or_else(|_| chrono::Duration::hours(24)),
            inflight_ttl: chrono::Duration::from_std(config.idempotency_inflight_ttl)
                .unwrap_or_else(|_| chrono::Duration::seconds(60)),
        }
    }

    /// Run `operation` at most once for `key`.
    ///
    /// If the key already completed, the cached result is returned and
    /// `operation` is not run. If the key is currently in flight — in this
    /// process or, per the durable record, in another — the call fails with
    /// `KeyInFlight` rather than racing a second execution. A failed
    /// operation clears the key so the caller may retry.
    ///
    /// # Errors
    ///
    /// - `LedgerError::KeyInFlight` if the key's operation is running.
    /// - `LedgerError::InvariantViolation` if a cached result no longer
    ///   decodes as `T`.
    /// - Whatever `operation` itself returns.
    pub async fn run_once<F, Fut, T>(&self, key: &str, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
        T: Serialize + DeserializeOwned,
    {
        let now = Utc::now();

        // Claim the key, or short-circuit on a prior outcome. The durable
        // record is consulted under the same lock as the local set so two
        // tasks cannot both claim a key.
        {
            let mut in_flight = self.in_flight.lock().await;
            if in_flight.contains(key) {
                return Err(LedgerError::KeyInFlight { key: key.into() });
            }

            match self.store.get_idempotency(key)? {
                Some(record) if !record.is_expired(now) => match record.status {
                    IdempotencyStatus::Completed => {
                        tracing::debug!(key, "Returning cached idempotent result");
                        let value = record.result.ok_or_else(|| {
                            LedgerError::InvariantViolation(format!(
                                "completed idempotency record without result: {key}"
                            ))
                        })?;
                        return serde_json::from_value(value).map_err(|e| {
                            LedgerError::InvariantViolation(format!(
                                "cached idempotency result for {key} no longer decodes: {e}"
                            ))
                        });
                    }
                    IdempotencyStatus::InFlight => {
                        return Err(LedgerError::KeyInFlight { key: key.into() })
                    }
                },
                // Absent or lapsed; lapsed records are overwritten below.
                _ => {}
            }

            in_flight.insert(key.to_string());
        }

        let outcome = self.execute(key, operation).await;

        self.in_flight.lock().await.remove(key);
        outcome
    }

    /// Run the operation with the durable record lifecycle around it.
    async fn execute<F, Fut, T>(&self, key: &str, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
        T: Serialize + DeserializeOwned,
    {
        self.store
            .put_idempotency(&IdempotencyRecord::in_flight(key, self.inflight_ttl))?;

        match operation().await {
            Ok(value) => {
                let json = serde_json::to_value(&value).map_err(|e| {
                    LedgerError::InvariantViolation(format!(
                        "idempotent result for {key} is not serializable: {e}"
                    ))
                })?;
                self.store.put_idempotency(&IdempotencyRecord::completed(
                    key,
                    json,
                    self.completed_ttl,
                ))?;
                Ok(value)
            }
            Err(e) => {
                // Clear the claim so a later retry can run the operation.
                if let Err(delete_err) = self.store.delete_idempotency(key) {
                    tracing::warn!(key, error = %delete_err, "Could not clear in-flight idempotency record");
                }
                Err(e)
            }
        }
    }
}
