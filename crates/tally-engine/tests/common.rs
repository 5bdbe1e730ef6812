//! Common test utilities for tally-engine integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::sync::Arc;

use tempfile::TempDir;

use tally_core::{AccountId, Metadata};
use tally_engine::{CreditEngine, CreditKind, EngineConfig, MemoryCache};
use tally_store::{RocksStore, Store};

/// Test harness containing everything needed for integration tests.
pub struct TestHarness {
    /// The assembled engine under test.
    pub engine: CreditEngine,
    /// The store backing the engine.
    pub store: Arc<RocksStore>,
    /// The cache backend backing the engine (and cleanup tokens).
    pub backend: Arc<MemoryCache>,
    /// Temporary directory for the database (kept alive for test duration).
    pub _temp_dir: TempDir,
}

impl TestHarness {
    /// Create a new test harness with a fresh database and default config.
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// Create a new test harness with the given engine config.
    pub fn with_config(config: EngineConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = Arc::new(RocksStore::open(temp_dir.path()).expect("Failed to open store"));
        let backend = Arc::new(MemoryCache::new());

        let engine = CreditEngine::new(
            Arc::clone(&store) as Arc<dyn Store>,
            Arc::clone(&backend),
            config,
        );

        Self {
            engine,
            store,
            backend,
            _temp_dir: temp_dir,
        }
    }

    /// Open an account and fund it with the given balance.
    pub async fn funded_account(&self, balance_cents: i64) -> AccountId {
        let account_id = AccountId::generate();
        self.engine
            .open_account(account_id)
            .await
            .expect("Failed to open account");

        if balance_cents > 0 {
            self.engine
                .credit(
                    account_id,
                    balance_cents,
                    CreditKind::Purchase,
                    "Test funding".into(),
                    Metadata::default(),
                )
                .await
                .expect("Failed to fund account");
        }

        account_id
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
