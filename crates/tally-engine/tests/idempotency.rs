//! Idempotent external credit integration tests.

mod common;

use std::sync::Arc;

use common::TestHarness;
use tally_core::{LedgerError, Metadata, TransactionKind};
use tally_engine::CreditKind;
use tally_store::{IdempotencyRecord, Store};

#[tokio::test]
async fn duplicate_key_returns_cached_receipt() {
    let harness = TestHarness::new();
    let account_id = harness.funded_account(0).await;

    let first = harness
        .engine
        .credit_once(
            "pay_123",
            account_id,
            5000,
            CreditKind::Purchase,
            "Purchased $50".into(),
            Metadata::default(),
        )
        .await
        .unwrap();
    assert_eq!(first.balance_after_cents, 5000);

    // The retry does not re-run the credit; it replays the receipt.
    let second = harness
        .engine
        .credit_once(
            "pay_123",
            account_id,
            5000,
            CreditKind::Purchase,
            "Purchased $50".into(),
            Metadata::default(),
        )
        .await
        .unwrap();
    assert_eq!(second.transaction_id, first.transaction_id);
    assert_eq!(second.balance_after_cents, 5000);

    let balance = harness.engine.balance(account_id).await.unwrap();
    assert_eq!(balance.balance_cents, 5000);

    let purchases = harness
        .engine
        .transactions(account_id, 10, 0)
        .unwrap()
        .iter()
        .filter(|tx| tx.kind == TransactionKind::Purchase)
        .count();
    assert_eq!(purchases, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_duplicate_keys_credit_once() {
    let harness = Arc::new(TestHarness::new());
    let account_id = harness.funded_account(0).await;

    let tasks: Vec<_> = (0..2)
        .map(|_| {
            let harness = Arc::clone(&harness);
            tokio::spawn(async move {
                harness
                    .engine
                    .credit_once(
                        "pay_456",
                        account_id,
                        50,
                        CreditKind::Purchase,
                        "Webhook".into(),
                        Metadata::default(),
                    )
                    .await
            })
        })
        .collect();

    let results: Vec<_> = futures::future::join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.expect("task panicked"))
        .collect();

    // One caller runs the credit; the other either replays the receipt or
    // loses the in-flight race. Never a double add.
    assert!(results.iter().any(std::result::Result::is_ok));
    for result in &results {
        match result {
            Ok(receipt) => assert_eq!(receipt.balance_after_cents, 50),
            Err(err) => assert!(matches!(err, LedgerError::KeyInFlight { .. })),
        }
    }

    let balance = harness.engine.balance(account_id).await.unwrap();
    assert_eq!(balance.balance_cents, 50);

    let purchases = harness
        .engine
        .transactions(account_id, 10, 0)
        .unwrap()
        .iter()
        .filter(|tx| tx.kind == TransactionKind::Purchase)
        .count();
    assert_eq!(purchases, 1);
}

#[tokio::test]
async fn distinct_keys_each_credit() {
    let harness = TestHarness::new();
    let account_id = harness.funded_account(0).await;

    for key in ["pay_a", "pay_b"] {
        harness
            .engine
            .credit_once(
                key,
                account_id,
                50,
                CreditKind::Purchase,
                "Webhook".into(),
                Metadata::default(),
            )
            .await
            .unwrap();
    }

    let balance = harness.engine.balance(account_id).await.unwrap();
    assert_eq!(balance.balance_cents, 100);
}

#[tokio::test]
async fn failed_operation_clears_the_key_for_retry() {
    let harness = TestHarness::new();
    let account_id = harness.funded_account(0).await;

    // Invalid amount: the operation fails, and must not poison the key.
    let err = harness
        .engine
        .credit_once(
            "pay_789",
            account_id,
            -5,
            CreditKind::Purchase,
            "Bad webhook".into(),
            Metadata::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::Validation(_)));

    harness
        .engine
        .credit_once(
            "pay_789",
            account_id,
            50,
            CreditKind::Purchase,
            "Corrected webhook".into(),
            Metadata::default(),
        )
        .await
        .unwrap();

    let balance = harness.engine.balance(account_id).await.unwrap();
    assert_eq!(balance.balance_cents, 50);
}

#[tokio::test]
async fn durable_in_flight_record_blocks_the_key() {
    let harness = TestHarness::new();
    let account_id = harness.funded_account(0).await;

    // Another instance wrote an in-flight record and has not finished.
    harness
        .store
        .put_idempotency(&IdempotencyRecord::in_flight(
            "pay_other",
            chrono::Duration::seconds(60),
        ))
        .unwrap();

    let err = harness
        .engine
        .credit_once(
            "pay_other",
            account_id,
            50,
            CreditKind::Purchase,
            "Webhook".into(),
            Metadata::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::KeyInFlight { .. }));

    let balance = harness.engine.balance(account_id).await.unwrap();
    assert_eq!(balance.balance_cents, 0);
}

#[tokio::test]
async fn lapsed_records_are_treated_as_absent() {
    let harness = TestHarness::new();
    let account_id = harness.funded_account(0).await;

    // A crashed instance's in-flight record past its TTL does not wedge
    // the key forever.
    harness
        .store
        .put_idempotency(&IdempotencyRecord::in_flight(
            "pay_stale",
            chrono::Duration::seconds(0),
        ))
        .unwrap();

    harness
        .engine
        .credit_once(
            "pay_stale",
            account_id,
            50,
            CreditKind::Purchase,
            "Webhook".into(),
            Metadata::default(),
        )
        .await
        .unwrap();

    let balance = harness.engine.balance(account_id).await.unwrap();
    assert_eq!(balance.balance_cents, 50);
}

#[tokio::test]
async fn refunds_are_idempotent_too() {
    let harness = TestHarness::new();
    let account_id = harness.funded_account(100).await;

    for _ in 0..2 {
        harness
            .engine
            .credit_once(
                "refund_1",
                account_id,
                25,
                CreditKind::Refund,
                "Refund for outage".into(),
                Metadata::default(),
            )
            .await
            .unwrap();
    }

    let balance = harness.engine.balance(account_id).await.unwrap();
    assert_eq!(balance.balance_cents, 125);

    let refunds = harness
        .engine
        .transactions(account_id, 10, 0)
        .unwrap()
        .iter()
        .filter(|tx| tx.kind == TransactionKind::Refund)
        .count();
    assert_eq!(refunds, 1);
}
