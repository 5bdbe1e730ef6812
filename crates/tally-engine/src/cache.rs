//! Balance cache with fail-open degradation.
//!
//! A read-through/write-through mirror of balance rows in front of the
//! store. The cache is never authoritative: mutations always read the store
//! under the account lock, and cached mirrors carry a TTL. Any backend
//! error trips a circuit breaker so a flapping cache does not add latency
//! to every request; while degraded, reads skip the backend entirely.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

use tally_core::{AccountBalance, AccountId, ReservationId};

/// Cache key prefixes.
pub mod keys {
    use super::{AccountId, ReservationId};

    /// Key for a cached balance mirror.
    #[must_use]
    pub fn balance(account_id: &AccountId) -> String {
        format!("tally:balance:{account_id}")
    }

    /// Key for a cleanup exclusion token.
    #[must_use]
    pub fn cleanup_token(reservation_id: &ReservationId) -> String {
        format!("tally:cleanup:{reservation_id}")
    }
}

/// Error from a cache backend.
#[derive(Debug, thiserror::Error)]
#[error("cache backend error: {0}")]
pub struct CacheError(String);

impl CacheError {
    /// Wrap a backend error message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Result type for cache backend operations.
pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// A Redis-like key/value backend with TTLs.
///
/// Implementations must be cheap to call concurrently; the engine shares
/// one backend between the balance cache and the cleanup worker's
/// exclusion tokens.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Get a value.
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    /// Set a value with a TTL.
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()>;

    /// Delete a value. Deleting an absent key is a no-op.
    async fn del(&self, key: &str) -> CacheResult<()>;

    /// Atomically set a value with a TTL only if the key is absent.
    /// Returns `true` if the key was set.
    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<bool>;
}

// =============================================================================
// In-memory backend
// =============================================================================

/// In-process cache backend.
///
/// The default backend for single-instance deployments and tests. TTLs are
/// honored lazily on read.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryCache {
    /// Create an empty in-memory cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some((_, deadline)) if *deadline <= Instant::now() => {
                entries.remove(key);
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value.clone())),
            None => Ok(None),
        }
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        let mut entries = self.entries.lock().await;
        entries.insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }

    async fn del(&self, key: &str) -> CacheResult<()> {
        self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<bool> {
        let mut entries = self.entries.lock().await;
        let live = entries
            .get(key)
            .is_some_and(|(_, deadline)| *deadline > Instant::now());
        if live {
            return Ok(false);
        }
        entries.insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(true)
    }
}

// =============================================================================
// Redis backend
// =============================================================================

/// Redis cache backend.
#[cfg(feature = "redis-backend")]
pub struct RedisCache {
    conn: redis::aio::ConnectionManager,
}

#[cfg(feature = "redis-backend")]
impl RedisCache {
    /// Connect to Redis and build a managed connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the client cannot be created or the connection
    /// cannot be established.
    pub async fn connect(url: &str) -> CacheResult<Self> {
        let client = redis::Client::open(url).map_err(|e| CacheError::new(e.to_string()))?;
        let conn = redis::aio::ConnectionManager::new(client)
            .await
            .map_err(|e| CacheError::new(e.to_string()))?;
        Ok(Self { conn })
    }
}

#[cfg(feature = "redis-backend")]
#[async_trait]
impl CacheBackend for RedisCache {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        use redis::AsyncCommands;
        let mut conn = self.conn.clone();
        conn.get(key)
            .await
            .map_err(|e| CacheError::new(e.to_string()))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        use redis::AsyncCommands;
        let mut conn = self.conn.clone();
        let seconds = usize::try_from(ttl.as_secs()).unwrap_or(usize::MAX);
        conn.set_ex(key, value, seconds)
            .await
            .map_err(|e| CacheError::new(e.to_string()))
    }

    async fn del(&self, key: &str) -> CacheResult<()> {
        use redis::AsyncCommands;
        let mut conn = self.conn.clone();
        conn.del(key)
            .await
            .map_err(|e| CacheError::new(e.to_string()))
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<bool> {
        let mut conn = self.conn.clone();
        let response: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs())
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::new(e.to_string()))?;
        Ok(response.is_some())
    }
}

// =============================================================================
// Degraded gate
// =============================================================================

/// Lock-free circuit breaker for the cache backend.
///
/// Trips on any backend error; while tripped, reads skip the backend until
/// the cooldown elapses.
struct DegradedGate {
    anchor: Instant,
    degraded_until_millis: AtomicU64,
    cooldown: Duration,
}

impl DegradedGate {
    fn new(cooldown: Duration) -> Self {
        Self {
            anchor: Instant::now(),
            degraded_until_millis: AtomicU64::new(0),
            cooldown,
        }
    }

    fn now_millis(&self) -> u64 {
        u64::try_from(self.anchor.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn is_degraded(&self) -> bool {
        self.now_millis() < self.degraded_until_millis.load(Ordering::Relaxed)
    }

    fn trip(&self) {
        let until = self
            .now_millis()
            .saturating_add(u64::try_from(self.cooldown.as_millis()).unwrap_or(u64::MAX));
        self.degraded_until_millis.store(until, Ordering::Relaxed);
    }
}

// =============================================================================
// Balance cache
// =============================================================================

/// Fail-open balance mirror in front of the store.
pub struct BalanceCache {
    backend: Arc<dyn CacheBackend>,
    ttl: Duration,
    gate: DegradedGate,
}

impl BalanceCache {
    /// Create a cache over the given backend.
    #[must_use]
    pub fn new(backend: Arc<dyn CacheBackend>, ttl: Duration, cooldown: Duration) -> Self {
        Self {
            backend,
            ttl,
            gate: DegradedGate::new(cooldown),
        }
    }

    /// Whether the cache is currently degraded.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.gate.is_degraded()
    }

    /// Look up a cached balance mirror. Returns `None` on miss, on any
    /// backend error, and while degraded.
    pub async fn get(&self, account_id: &AccountId) -> Option<AccountBalance> {
        if self.gate.is_degraded() {
            return None;
        }

        match self.backend.get(&keys::balance(account_id)).await {
            Ok(Some(json)) => match serde_json::from_str(&json) {
                Ok(balance) => Some(balance),
                Err(e) => {
                    tracing::warn!(account_id = %account_id, error = %e, "Discarding undecodable cached balance");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(account_id = %account_id, error = %e, "Cache read failed, marking degraded");
                self.gate.trip();
                None
            }
        }
    }

    /// Store a balance mirror. Errors are logged and swallowed.
    pub async fn set(&self, balance: &AccountBalance) {
        if self.gate.is_degraded() {
            return;
        }

        let json = match serde_json::to_string(balance) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(account_id = %balance.account_id, error = %e, "Failed to encode balance for cache");
                return;
            }
        };

        if let Err(e) = self
            .backend
            .set_ex(&keys::balance(&balance.account_id), &json, self.ttl)
            .await
        {
            tracing::warn!(account_id = %balance.account_id, error = %e, "Cache write failed, marking degraded");
            self.gate.trip();
        }
    }

    /// Drop the mirror for an account after a mutation.
    ///
    /// Attempted even while degraded: a recovering cache must not serve a
    /// mirror that predates the mutation. Errors are logged and swallowed.
    pub async fn invalidate(&self, account_id: &AccountId) {
        if let Err(e) = self.backend.del(&keys::balance(account_id)).await {
            tracing::warn!(account_id = %account_id, error = %e, "Cache invalidation failed, marking degraded");
            self.gate.trip();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Backend that fails every call.
    struct BrokenBackend;

    #[async_trait]
    impl CacheBackend for BrokenBackend {
        async fn get(&self, _key: &str) -> CacheResult<Option<String>> {
            Err(CacheError::new("connection refused"))
        }

        async fn set_ex(&self, _key: &str, _value: &str, _ttl: Duration) -> CacheResult<()> {
            Err(CacheError::new("connection refused"))
        }

        async fn del(&self, _key: &str) -> CacheResult<()> {
            Err(CacheError::new("connection refused"))
        }

        async fn set_nx_ex(&self, _key: &str, _value: &str, _ttl: Duration) -> CacheResult<bool> {
            Err(CacheError::new("connection refused"))
        }
    }

    fn sample_balance() -> AccountBalance {
        let mut balance = AccountBalance::new(AccountId::generate());
        balance.balance_cents = 1000;
        balance.reserved_cents = 200;
        balance
    }

    #[tokio::test]
    async fn memory_backend_roundtrip() {
        let cache = MemoryCache::new();
        cache
            .set_ex("k", "v", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some("v".into()));

        cache.del("k").await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn memory_backend_honors_ttl() {
        let cache = MemoryCache::new();
        cache.set_ex("k", "v", Duration::ZERO).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_nx_respects_existing_keys() {
        let cache = MemoryCache::new();
        assert!(cache
            .set_nx_ex("token", "a", Duration::from_secs(60))
            .await
            .unwrap());
        assert!(!cache
            .set_nx_ex("token", "b", Duration::from_secs(60))
            .await
            .unwrap());

        // Expired entries can be claimed again.
        cache.set_ex("stale", "x", Duration::ZERO).await.unwrap();
        assert!(cache
            .set_nx_ex("stale", "y", Duration::from_secs(60))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn balance_cache_roundtrip() {
        let cache = BalanceCache::new(
            Arc::new(MemoryCache::new()),
            Duration::from_secs(30),
            Duration::from_secs(15),
        );
        let balance = sample_balance();

        assert!(cache.get(&balance.account_id).await.is_none());

        cache.set(&balance).await;
        let cached = cache.get(&balance.account_id).await.unwrap();
        assert_eq!(cached.balance_cents, 1000);
        assert_eq!(cached.reserved_cents, 200);

        cache.invalidate(&balance.account_id).await;
        assert!(cache.get(&balance.account_id).await.is_none());
    }

    #[tokio::test]
    async fn backend_failure_trips_the_gate() {
        let cache = BalanceCache::new(
            Arc::new(BrokenBackend),
            Duration::from_secs(30),
            Duration::from_secs(15),
        );
        let balance = sample_balance();

        assert!(!cache.is_degraded());
        assert!(cache.get(&balance.account_id).await.is_none());
        assert!(cache.is_degraded());

        // Degraded reads fall through without touching the backend, and
        // writes are silently dropped.
        assert!(cache.get(&balance.account_id).await.is_none());
        cache.set(&balance).await;
    }

    #[tokio::test]
    async fn gate_reopens_after_cooldown() {
        let gate = DegradedGate::new(Duration::ZERO);
        gate.trip();
        assert!(!gate.is_degraded());

        let gate = DegradedGate::new(Duration::from_secs(60));
        gate.trip();
        assert!(gate.is_degraded());
    }
}
