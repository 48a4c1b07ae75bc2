//! Concurrent access tests for balance updates.
//!
//! Many tasks hit the same accounts at once; the final balances must equal
//! the sum of every successful write with no drift. The file-backed tests
//! put writers on separate connections so they contend on the database
//! itself rather than on the pool.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, TransactionTrait};
use tally_core::ledger::{ConflictKind, DeletionPolicy, Transaction, TransactionRepository, TransactionStatus};
use tally_db::SqlTransactionRepository;
use tally_db::entities::accounts;
use tally_shared::types::Currency;
use tokio::sync::Barrier;

use common::{FileDatabase, Harness};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_transfers_keep_exact_balances() {
    const TASKS: usize = 50;
    const AMOUNT: i64 = 1_000;

    let h = Arc::new(Harness::new().await);
    let cash = h.account("cash", "debit").await;
    let expense = h.account("expense", "debit").await;
    let barrier = Arc::new(Barrier::new(TASKS));

    let handles = (0..TASKS).map(|_| {
        let h = Arc::clone(&h);
        let barrier = Arc::clone(&barrier);
        tokio::spawn(async move {
            barrier.wait().await;
            h.service
                .create_transaction(&h.transfer(cash, expense, AMOUNT).posted())
                .await
        })
    });
    let results = join_all(handles).await;

    let succeeded = results
        .into_iter()
        .map(|joined| joined.expect("task panicked"))
        .filter(Result::is_ok)
        .count();
    assert_eq!(succeeded, TASKS);

    let total = AMOUNT * i64::try_from(TASKS).unwrap();
    let cash = h.service.get_account(h.scope, cash).await.unwrap();
    assert_eq!(cash.posted.amount, -total);
    assert_eq!(cash.pending.amount, -total);
    assert_eq!(cash.lock_version, i64::try_from(TASKS).unwrap());

    let expense = h.service.get_account(h.scope, expense).await.unwrap();
    assert_eq!(expense.posted.amount, total);
    assert_eq!(expense.available.amount, total);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_posts_apply_once() {
    const TASKS: usize = 10;

    let h = Arc::new(Harness::new().await);
    let cash = h.account("cash", "debit").await;
    let reserve = h.account("reserve", "debit").await;
    let id = h
        .service
        .create_transaction(&h.transfer(cash, reserve, 250))
        .await
        .unwrap()
        .transaction
        .id();
    let barrier = Arc::new(Barrier::new(TASKS));

    let handles = (0..TASKS).map(|_| {
        let h = Arc::clone(&h);
        let barrier = Arc::clone(&barrier);
        tokio::spawn(async move {
            barrier.wait().await;
            h.service.post_transaction(h.scope, id).await
        })
    });
    for joined in join_all(handles).await {
        let outcome = joined.expect("task panicked").unwrap();
        assert_eq!(outcome.transaction.status(), TransactionStatus::Posted);
    }

    let reserve = h.service.get_account(h.scope, reserve).await.unwrap();
    assert_eq!(reserve.posted.amount, 250);
    assert_eq!(reserve.pending.amount, 250);
    assert_eq!(reserve.lock_version, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_writer_on_another_connection_forces_a_retry() {
    let file = FileDatabase::new();
    let h = Harness::on(file.migrated(20).await, false).await;
    let cash = h.account("cash", "debit").await;
    let expense = h.account("expense", "debit").await;
    let other = file.connect(5_000).await;

    // Another connection bumps the expense account and holds its write open.
    let competing = other.begin().await.unwrap();
    accounts::Entity::update_many()
        .col_expr(accounts::Column::LockVersion, Expr::col(accounts::Column::LockVersion).add(1))
        .filter(accounts::Column::Id.eq(expense.into_inner()))
        .exec(&competing)
        .await
        .unwrap();

    let input = h.transfer(cash, expense, 500).posted();
    let repository = SqlTransactionRepository::new(h.db.clone(), DeletionPolicy::Production);
    let single = Transaction::construct(&input, &Currency::new("USD", 2).unwrap(), Utc::now()).unwrap();
    let err = repository.create_transaction(&single).await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(err.as_conflict().map(|c| c.kind), Some(ConflictKind::ConcurrentModification));

    let release = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        competing.commit().await
    });
    let outcome = h.service.create_transaction(&input).await.unwrap();
    release.await.unwrap().unwrap();

    assert_eq!(outcome.transaction.status(), TransactionStatus::Posted);
    let expense = h.service.get_account(h.scope, expense).await.unwrap();
    assert_eq!(expense.posted.amount, 500);
    assert_eq!(expense.lock_version, 2);
    let cash = h.service.get_account(h.scope, cash).await.unwrap();
    assert_eq!(cash.posted.amount, -500);
    assert_eq!(cash.lock_version, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_two_connections_keep_exact_balances() {
    const PER_WRITER: usize = 5;
    const AMOUNT: i64 = 250;

    let file = FileDatabase::new();
    let h = Harness::on(file.migrated(20).await, false).await;
    let cash = h.account("cash", "debit").await;
    let expense = h.account("expense", "debit").await;
    let other = file.connect(20).await;
    let services = [h.service.clone(), tally_db::ledger_service(&other, &common::config(false))];
    let input = h.transfer(cash, expense, AMOUNT).posted();
    let barrier = Arc::new(Barrier::new(PER_WRITER * services.len()));
    let (input, barrier) = (&input, &barrier);

    let handles = services.iter().flat_map(|service| {
        (0..PER_WRITER).map(move |_| {
            let service = service.clone();
            let input = input.clone();
            let barrier = Arc::clone(barrier);
            tokio::spawn(async move {
                barrier.wait().await;
                service.create_transaction(&input).await
            })
        })
    });
    for joined in join_all(handles).await {
        joined.expect("task panicked").unwrap();
    }

    let writes = i64::try_from(PER_WRITER * 2).unwrap();
    let expense = h.service.get_account(h.scope, expense).await.unwrap();
    assert_eq!(expense.posted.amount, AMOUNT * writes);
    assert_eq!(expense.lock_version, writes);
    let cash = h.service.get_account(h.scope, cash).await.unwrap();
    assert_eq!(cash.posted.amount, -AMOUNT * writes);
}
