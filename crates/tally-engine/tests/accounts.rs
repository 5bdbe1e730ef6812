//! Account provisioning, credit, and cache behavior integration tests.

mod common;

use common::TestHarness;
use tally_core::{AccountId, LedgerError, Metadata, TransactionKind};
use tally_engine::{cache::keys, CacheBackend, CreditKind, EngineConfig};

#[tokio::test]
async fn open_account_starts_empty_and_rejects_duplicates() {
    let harness = TestHarness::new();
    let account_id = AccountId::generate();

    let account = harness.engine.open_account(account_id).await.unwrap();
    assert_eq!(account.balance_cents, 0);
    assert_eq!(account.reserved_cents, 0);

    let err = harness.engine.open_account(account_id).await.unwrap_err();
    assert!(matches!(err, LedgerError::AccountExists { .. }));
}

#[tokio::test]
async fn unknown_account_balance_is_not_found() {
    let harness = TestHarness::new();

    let err = harness
        .engine
        .balance(AccountId::generate())
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::AccountNotFound { .. }));
}

#[tokio::test]
async fn credit_validates_amount_and_metadata() {
    let harness = TestHarness::new();
    let account_id = harness.funded_account(0).await;

    for amount in [0, -100] {
        let err = harness
            .engine
            .credit(
                account_id,
                amount,
                CreditKind::Purchase,
                "Bad".into(),
                Metadata::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }

    let over_limit = EngineConfig::default().max_credit_cents + 1;
    let err = harness
        .engine
        .credit(
            account_id,
            over_limit,
            CreditKind::Purchase,
            "Too big".into(),
            Metadata::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::Validation(_)));

    let oversized = Metadata::default().with_note("x".repeat(10_000));
    let err = harness
        .engine
        .credit(
            account_id,
            100,
            CreditKind::Purchase,
            "Oversized metadata".into(),
            oversized,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::Validation(_)));

    // Nothing landed.
    let balance = harness.engine.balance(account_id).await.unwrap();
    assert_eq!(balance.balance_cents, 0);
    assert!(harness
        .engine
        .transactions(account_id, 10, 0)
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn journal_records_every_credit_newest_first() {
    let harness = TestHarness::new();
    let account_id = harness.funded_account(0).await;

    harness
        .engine
        .credit(
            account_id,
            5000,
            CreditKind::Purchase,
            "Purchased $50".into(),
            Metadata::default().with_source("checkout"),
        )
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    harness
        .engine
        .credit(
            account_id,
            25,
            CreditKind::Refund,
            "Refund for outage".into(),
            Metadata::default(),
        )
        .await
        .unwrap();

    let transactions = harness.engine.transactions(account_id, 10, 0).unwrap();
    assert_eq!(transactions.len(), 2);
    assert_eq!(transactions[0].kind, TransactionKind::Refund);
    assert_eq!(transactions[0].balance_after_cents, 5025);
    assert_eq!(transactions[1].kind, TransactionKind::Purchase);
    assert_eq!(transactions[1].metadata.source.as_deref(), Some("checkout"));

    let balance = harness.engine.balance(account_id).await.unwrap();
    assert_eq!(balance.balance_cents, 5025);
}

#[tokio::test]
async fn balance_reads_populate_the_cache_and_mutations_invalidate_it() {
    let harness = TestHarness::new();
    let account_id = harness.funded_account(100).await;
    let mirror_key = keys::balance(&account_id);

    // The funding credit invalidated whatever was cached; the first read
    // repopulates the mirror.
    assert!(harness.backend.get(&mirror_key).await.unwrap().is_none());
    harness.engine.balance(account_id).await.unwrap();
    assert!(harness.backend.get(&mirror_key).await.unwrap().is_some());

    // Any mutation drops the mirror again.
    harness
        .engine
        .credit(
            account_id,
            50,
            CreditKind::Purchase,
            "Top-up".into(),
            Metadata::default(),
        )
        .await
        .unwrap();
    assert!(harness.backend.get(&mirror_key).await.unwrap().is_none());

    // And the next read sees the post-mutation balance.
    let balance = harness.engine.balance(account_id).await.unwrap();
    assert_eq!(balance.balance_cents, 150);
}
