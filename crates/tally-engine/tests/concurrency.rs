//! True-parallelism tests for the ledger's consistency guarantees.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::TestHarness;
use futures::future::join_all;
use tally_core::{LedgerError, Metadata, TransactionKind};

const TTL: Duration = Duration::from_secs(60);

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_reserves_never_overcommit() {
    let harness = Arc::new(TestHarness::new());
    let account_id = harness.funded_account(100).await;

    // Ten concurrent 30-cent holds against 100 cents of credit: exactly
    // three can fit.
    let tasks: Vec<_> = (0..10)
        .map(|_| {
            let harness = Arc::clone(&harness);
            tokio::spawn(async move {
                harness
                    .engine
                    .reserve(account_id, 30, TTL, Metadata::default())
                    .await
            })
        })
        .collect();

    let results: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.expect("task panicked"))
        .collect();

    let successes = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 3);
    for result in results.iter().filter(|r| r.is_err()) {
        assert!(matches!(
            result.as_ref().unwrap_err(),
            LedgerError::InsufficientFunds { .. }
        ));
    }

    let balance = harness.engine.balance(account_id).await.unwrap();
    assert_eq!(balance.balance_cents, 100);
    assert_eq!(balance.reserved_cents, 90);
    assert!(balance.invariants_hold());
}

#[tokio::test(flavor = "multi_thread")]
async fn racing_confirm_and_release_settle_exactly_once() {
    let harness = Arc::new(TestHarness::new());
    let account_id = harness.funded_account(100).await;

    let reservation = harness
        .engine
        .reserve(account_id, 30, TTL, Metadata::default())
        .await
        .unwrap();

    let confirm = {
        let harness = Arc::clone(&harness);
        tokio::spawn(async move { harness.engine.confirm(reservation.id, Some(30)).await })
    };
    let release = {
        let harness = Arc::clone(&harness);
        tokio::spawn(async move { harness.engine.release(reservation.id).await })
    };

    // Both calls succeed: the loser observes a terminal state and no-ops.
    confirm.await.expect("task panicked").unwrap();
    release.await.expect("task panicked").unwrap();

    let balance = harness.engine.balance(account_id).await.unwrap();
    assert_eq!(balance.reserved_cents, 0);
    assert!(balance.invariants_hold());

    let usage_count = harness
        .engine
        .transactions(account_id, 10, 0)
        .unwrap()
        .iter()
        .filter(|tx| tx.kind == TransactionKind::Usage)
        .count();

    // The winner determines the outcome; the reserved credit was freed
    // exactly once either way.
    let reservation = harness.engine.reservations().get(reservation.id).unwrap();
    match reservation.status {
        tally_core::ReservationStatus::Confirmed => {
            assert_eq!(balance.balance_cents, 70);
            assert_eq!(usage_count, 1);
        }
        tally_core::ReservationStatus::Released => {
            assert_eq!(balance.balance_cents, 100);
            assert_eq!(usage_count, 0);
        }
        other => panic!("unexpected terminal status: {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn racing_double_confirm_charges_once() {
    let harness = Arc::new(TestHarness::new());
    let account_id = harness.funded_account(100).await;

    let reservation = harness
        .engine
        .reserve(account_id, 30, TTL, Metadata::default())
        .await
        .unwrap();

    let tasks: Vec<_> = (0..2)
        .map(|_| {
            let harness = Arc::clone(&harness);
            tokio::spawn(async move { harness.engine.confirm(reservation.id, Some(20)).await })
        })
        .collect();
    for task in tasks {
        task.await.expect("task panicked").unwrap();
    }

    let balance = harness.engine.balance(account_id).await.unwrap();
    assert_eq!(balance.balance_cents, 80);
    assert_eq!(balance.reserved_cents, 0);

    let usage_count = harness
        .engine
        .transactions(account_id, 10, 0)
        .unwrap()
        .iter()
        .filter(|tx| tx.kind == TransactionKind::Usage)
        .count();
    assert_eq!(usage_count, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn accounts_do_not_contend_with_each_other() {
    let harness = Arc::new(TestHarness::new());

    let mut accounts = Vec::new();
    for _ in 0..8 {
        accounts.push(harness.funded_account(1000).await);
    }

    // Interleaved reserve/confirm across all accounts in parallel.
    let tasks: Vec<_> = accounts
        .iter()
        .copied()
        .map(|account_id| {
            let harness = Arc::clone(&harness);
            tokio::spawn(async move {
                for _ in 0..5 {
                    let hold = harness
                        .engine
                        .reserve(account_id, 100, TTL, Metadata::default())
                        .await?;
                    harness.engine.confirm(hold.id, Some(60)).await?;
                }
                Ok::<_, LedgerError>(())
            })
        })
        .collect();
    for task in tasks {
        task.await.expect("task panicked").unwrap();
    }

    for account_id in accounts {
        let balance = harness.engine.balance(account_id).await.unwrap();
        assert_eq!(balance.balance_cents, 1000 - 5 * 60);
        assert_eq!(balance.reserved_cents, 0);
        assert!(balance.invariants_hold());
    }
}
