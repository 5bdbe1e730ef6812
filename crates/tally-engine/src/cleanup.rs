//! Expired-reservation cleanup.
//!
//! A periodic sweep returns lapsed holds to the available pool. The sweep
//! itself is a pure function of the injected `now`, so expiry logic is
//! testable without real time delays; [`CleanupWorker::spawn`] drives it on
//! a fixed interval.
//!
//! Multiple worker instances may run against the same store: a short-lived
//! `set_nx_ex` token per reservation keeps them from double-processing. If
//! the token backend is unavailable the sweep proceeds anyway — expiry is
//! idempotent under the account lock, so the token only avoids wasted work.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use tally_core::{ReservationId, Result};
use tally_store::Store;

use crate::cache::{keys, CacheBackend};
use crate::config::EngineConfig;
use crate::reservation::ReservationManager;
use crate::retry::RetryPolicy;

/// Outcome of one cleanup sweep.
#[derive(Debug, Default)]
pub struct SweepReport {
    /// Holds returned to the available pool this sweep.
    pub expired: Vec<ReservationId>,

    /// Holds flagged for manual intervention: their expiry kept failing
    /// beyond the retry budget. Reported every sweep until resolved.
    pub flagged: Vec<ReservationId>,

    /// Holds skipped because another worker instance held their token.
    pub skipped: usize,
}

impl SweepReport {
    /// Whether the sweep did or found anything worth reporting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.expired.is_empty() && self.flagged.is_empty() && self.skipped == 0
    }
}

/// Periodic sweeper for lapsed holds.
pub struct CleanupWorker {
    reservations: Arc<ReservationManager>,
    store: Arc<dyn Store>,
    backend: Arc<dyn CacheBackend>,
    retry: RetryPolicy,
    config: EngineConfig,
}

impl CleanupWorker {
    /// Create a worker over the given reservation manager and store.
    #[must_use]
    pub fn new(
        reservations: Arc<ReservationManager>,
        store: Arc<dyn Store>,
        backend: Arc<dyn CacheBackend>,
        config: EngineConfig,
    ) -> Self {
        Self {
            reservations,
            store,
            backend,
            retry: RetryPolicy::new(config.retry.clone()),
            config,
        }
    }

    /// Expire every pending hold due at `now`.
    ///
    /// Processes due holds in batches of `cleanup_batch_size` with a short
    /// pause between batches, so the sweep does not contend with live
    /// traffic on the same account rows.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::TransientStore` if the due-hold listing
    /// itself fails. Per-hold failures are counted and reported via the
    /// [`SweepReport`], never surfaced as errors.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        let mut seen: HashSet<ReservationId> = HashSet::new();

        loop {
            // Flagged holds stay pending (and therefore due), so widen the
            // listing by what we have already seen this sweep.
            let limit = self.config.cleanup_batch_size + seen.len();
            let due = self.store.list_due_reservations(now, limit)?;

            let fresh: Vec<_> = due
                .into_iter()
                .filter(|res| seen.insert(res.id))
                .collect();
            if fresh.is_empty() {
                break;
            }
            let drained = fresh.len() < self.config.cleanup_batch_size;

            for reservation in fresh {
                self.process_one(reservation.id, &mut report).await;
            }

            if drained {
                break;
            }
            tokio::time::sleep(self.config.cleanup_batch_delay).await;
        }

        Ok(report)
    }

    /// Expire one due hold, honoring the cross-instance token and the
    /// failure budget.
    async fn process_one(&self, reservation_id: ReservationId, report: &mut SweepReport) {
        // A hold past its failure budget is reported, not retried forever.
        match self.store.cleanup_failure_count(&reservation_id) {
            Ok(count) if count >= self.config.cleanup_flag_threshold => {
                report.flagged.push(reservation_id);
                return;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(reservation_id = %reservation_id, error = %e, "Could not read cleanup failure count");
            }
        }

        let token = keys::cleanup_token(&reservation_id);
        let token_held = match self
            .backend
            .set_nx_ex(&token, "held", self.config.cleanup_token_ttl)
            .await
        {
            Ok(true) => true,
            Ok(false) => {
                report.skipped += 1;
                return;
            }
            Err(e) => {
                tracing::warn!(reservation_id = %reservation_id, error = %e, "Token backend unavailable, sweeping without exclusion");
                false
            }
        };

        let outcome = self
            .retry
            .run("expire_reservation", || {
                self.reservations.expire(reservation_id)
            })
            .await;

        match outcome {
            Ok(()) => {
                if let Err(e) = self.store.clear_cleanup_failures(&reservation_id) {
                    tracing::warn!(reservation_id = %reservation_id, error = %e, "Could not clear cleanup failure count");
                }
                report.expired.push(reservation_id);
            }
            Err(e) => {
                let count = self
                    .store
                    .bump_cleanup_failures(&reservation_id)
                    .unwrap_or_else(|bump_err| {
                        tracing::warn!(reservation_id = %reservation_id, error = %bump_err, "Could not record cleanup failure");
                        0
                    });

                if count >= self.config.cleanup_flag_threshold {
                    tracing::error!(
                        reservation_id = %reservation_id,
                        failures = count,
                        error = %e,
                        "Reservation expiry keeps failing; flagged for manual intervention"
                    );
                    report.flagged.push(reservation_id);
                } else {
                    tracing::warn!(
                        reservation_id = %reservation_id,
                        failures = count,
                        error = %e,
                        "Reservation expiry failed, will retry next sweep"
                    );
                }
            }
        }

        if token_held {
            if let Err(e) = self.backend.del(&token).await {
                tracing::warn!(reservation_id = %reservation_id, error = %e, "Could not release cleanup token");
            }
        }
    }

    /// Run the sweep on a fixed interval until the returned handle is
    /// stopped.
    #[must_use]
    pub fn spawn(self, interval: Duration) -> CleanupHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => match self.sweep(Utc::now()).await {
                        Ok(report) if report.is_empty() => {}
                        Ok(report) => tracing::info!(
                            expired = report.expired.len(),
                            flagged = report.flagged.len(),
                            skipped = report.skipped,
                            "Cleanup sweep finished"
                        ),
                        Err(e) => tracing::error!(error = %e, "Cleanup sweep failed"),
                    },
                    _ = shutdown_rx.changed() => break,
                }
            }
        });

        CleanupHandle {
            join,
            shutdown: shutdown_tx,
        }
    }
}

/// Handle to a spawned cleanup worker.
pub struct CleanupHandle {
    join: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

impl CleanupHandle {
    /// Signal shutdown and wait for the worker to finish its current sweep.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.join.await;
    }
}
