//! Bounded retry with exponential backoff and jitter.
//!
//! Transient store failures are retried a fixed number of times before being
//! surfaced to the caller. Deterministic errors (validation, not-found,
//! insufficient funds, conflicts) are never retried.

use std::time::Duration;

use tally_core::{LedgerError, Result};

/// Retry configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the initial attempt.
    pub max_retries: u32,

    /// Delay before the first retry.
    pub initial_delay_ms: u64,

    /// Upper bound on any single delay.
    pub max_delay_ms: u64,

    /// Multiplier applied per attempt.
    pub backoff_multiplier: f64,

    /// Jitter as a fraction of the computed delay.
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 50,
            max_delay_ms: 2000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

/// Bounded retry combinator for ledger operations.
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Create a policy from the given configuration.
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Calculate the delay for the nth retry with exponential backoff and
    /// jitter.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_possible_wrap,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss
    )]
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_delay = self.config.initial_delay_ms as f64
            * self.config.backoff_multiplier.powi(attempt as i32);

        let capped_delay = base_delay.min(self.config.max_delay_ms as f64);

        // Jitter spreads out retries from callers that failed together.
        let jitter_range = capped_delay * self.config.jitter_factor;
        let jitter = (rand::random::<f64>() - 0.5) * jitter_range * 2.0;
        let final_delay = (capped_delay + jitter).max(0.0);

        Duration::from_millis(final_delay as u64)
    }

    /// Execute `operation`, retrying transient failures up to the
    /// configured budget.
    ///
    /// # Errors
    ///
    /// Returns the first non-transient error immediately, or the last
    /// transient error once the budget is exhausted.
    pub async fn run<F, Fut, T>(&self, operation_name: &str, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = self.calculate_delay(attempt - 1);
                tracing::warn!(
                    attempt,
                    max_retries = self.config.max_retries,
                    operation = operation_name,
                    delay = ?delay,
                    "Retrying after transient failure"
                );
                tokio::time::sleep(delay).await;
            }

            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_transient() => {
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| {
            LedgerError::TransientStore("retry budget exhausted without error".into())
        }))
    }
}
