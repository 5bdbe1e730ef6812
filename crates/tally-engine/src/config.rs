//! Engine configuration.

use std::time::Duration;

use crate::retry::RetryConfig;

/// Engine configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Largest single hold, in cents (default: 10000 = $100).
    pub max_reservation_cents: i64,

    /// Largest single credit addition, in cents (default: 1 000 000 = $10k).
    pub max_credit_cents: i64,

    /// Maximum concurrent pending holds per account (default: 10).
    pub max_concurrent_reservations: usize,

    /// Shortest accepted reservation TTL (default: 1s).
    pub min_reservation_ttl: Duration,

    /// Longest accepted reservation TTL (default: 1h).
    pub max_reservation_ttl: Duration,

    /// Balance cache entry TTL (default: 30s).
    pub cache_ttl: Duration,

    /// How long the cache stays degraded after a backend error (default: 15s).
    pub cache_cooldown: Duration,

    /// How long a mutation waits for the account lock before surfacing a
    /// transient error (default: 5s).
    pub lock_timeout: Duration,

    /// Reservations processed per cleanup batch (default: 100).
    pub cleanup_batch_size: usize,

    /// Pause between cleanup batches (default: 50ms).
    pub cleanup_batch_delay: Duration,

    /// Failed expiry attempts (across sweeps) before a hold is flagged for
    /// manual intervention (default: 3).
    pub cleanup_flag_threshold: u32,

    /// TTL of the cross-instance exclusion token (default: 30s).
    pub cleanup_token_ttl: Duration,

    /// How long a completed idempotency record is honored (default: 24h).
    pub idempotency_ttl: Duration,

    /// How long an in-flight idempotency record blocks the key
    /// (default: 60s).
    pub idempotency_inflight_ttl: Duration,

    /// Retry policy for transient store failures.
    pub retry: RetryConfig,
}

impl EngineConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset or unparsable.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_reservation_cents: env_parse("TALLY_MAX_RESERVATION_CENTS")
                .unwrap_or(defaults.max_reservation_cents),
            max_credit_cents: env_parse("TALLY_MAX_CREDIT_CENTS")
                .unwrap_or(defaults.max_credit_cents),
            max_concurrent_reservations: env_parse("TALLY_MAX_CONCURRENT_RESERVATIONS")
                .unwrap_or(defaults.max_concurrent_reservations),
            min_reservation_ttl: env_secs("TALLY_MIN_RESERVATION_TTL_SECONDS")
                .unwrap_or(defaults.min_reservation_ttl),
            max_reservation_ttl: env_secs("TALLY_MAX_RESERVATION_TTL_SECONDS")
                .unwrap_or(defaults.max_reservation_ttl),
            cache_ttl: env_secs("TALLY_CACHE_TTL_SECONDS").unwrap_or(defaults.cache_ttl),
            cache_cooldown: env_secs("TALLY_CACHE_COOLDOWN_SECONDS")
                .unwrap_or(defaults.cache_cooldown),
            lock_timeout: env_secs("TALLY_LOCK_TIMEOUT_SECONDS").unwrap_or(defaults.lock_timeout),
            cleanup_batch_size: env_parse("TALLY_CLEANUP_BATCH_SIZE")
                .unwrap_or(defaults.cleanup_batch_size),
            cleanup_batch_delay: env_parse("TALLY_CLEANUP_BATCH_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.cleanup_batch_delay),
            cleanup_flag_threshold: env_parse("TALLY_CLEANUP_FLAG_THRESHOLD")
                .unwrap_or(defaults.cleanup_flag_threshold),
            cleanup_token_ttl: env_secs("TALLY_CLEANUP_TOKEN_TTL_SECONDS")
                .unwrap_or(defaults.cleanup_token_ttl),
            idempotency_ttl: env_secs("TALLY_IDEMPOTENCY_TTL_SECONDS")
                .unwrap_or(defaults.idempotency_ttl),
            idempotency_inflight_ttl: env_secs("TALLY_IDEMPOTENCY_INFLIGHT_TTL_SECONDS")
                .unwrap_or(defaults.idempotency_inflight_ttl),
            retry: RetryConfig::default(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_reservation_cents: 10_000,
            max_credit_cents: 1_000_000,
            max_concurrent_reservations: 10,
            min_reservation_ttl: Duration::from_secs(1),
            max_reservation_ttl: Duration::from_secs(3600),
            cache_ttl: Duration::from_secs(30),
            cache_cooldown: Duration::from_secs(15),
            lock_timeout: Duration::from_secs(5),
            cleanup_batch_size: 100,
            cleanup_batch_delay: Duration::from_millis(50),
            cleanup_flag_threshold: 3,
            cleanup_token_ttl: Duration::from_secs(30),
            idempotency_ttl: Duration::from_secs(24 * 3600),
            idempotency_inflight_ttl: Duration::from_secs(60),
            retry: RetryConfig::default(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

fn env_secs(name: &str) -> Option<Duration> {
    env_parse(name).map(Duration::from_secs)
}
