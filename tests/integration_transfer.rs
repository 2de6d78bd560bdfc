//! Transfer Integration Tests
//!
//! Drive the coordinator against an in-process ledger.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::time::Duration;
use tokio::task::JoinSet;

use ledger_2pc::coordinator::{
    ClientError, CoordinatorConfig, RecoveryWorker, TransferError, WorkerConfig,
};
use ledger_2pc::coordinator::TransferStore;
use ledger_2pc::domain::{PendingStatus, SagaState, TransferSaga};
use ledger_2pc::{Amount, OperationContext};

mod common;

use common::WriteFault;

fn immediate_recovery() -> WorkerConfig {
    WorkerConfig {
        stale_threshold: Duration::ZERO,
        ..WorkerConfig::default()
    }
}

fn failed_transfer_id(err: TransferError) -> (uuid::Uuid, String) {
    match err {
        TransferError::TransactionFailed { transfer_id, reason } => (transfer_id, reason),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_transfer_moves_funds_and_records_history() {
    let stack = common::setup_stack();
    let source = stack.account(dec!(200)).await;
    let target = stack.account(dec!(50)).await;

    let record = stack
        .coordinator
        .transfer(source, target, dec!(75), &OperationContext::new())
        .await
        .unwrap();

    assert_eq!(stack.balance(source).await, dec!(125));
    assert_eq!(stack.balance(target).await, dec!(125));

    let source_history = stack.coordinator.history(source).await.unwrap();
    let target_history = stack.coordinator.history(target).await.unwrap();
    assert_eq!(source_history, vec![record.clone()]);
    assert_eq!(target_history, vec![record.clone()]);

    let saga = stack.coordinator.transfer_status(record.transfer_id).await.unwrap();
    assert_eq!(saga.state, SagaState::Committed);
}

#[tokio::test]
async fn test_insufficient_balance_leaves_no_trace() {
    let stack = common::setup_stack();
    let source = stack.account(dec!(30)).await;
    let target = stack.account(dec!(10)).await;

    let err = stack
        .coordinator
        .transfer(source, target, dec!(50), &OperationContext::new())
        .await
        .unwrap_err();

    let transfer_id = match err {
        TransferError::TransactionFailed { transfer_id, reason } => {
            assert!(reason.contains("insufficient balance"), "reason: {}", reason);
            transfer_id
        }
        other => panic!("unexpected error: {:?}", other),
    };

    assert_eq!(stack.balance(source).await, dec!(30));
    assert_eq!(stack.balance(target).await, dec!(10));
    assert!(stack.coordinator.history(source).await.unwrap().is_empty());

    let saga = stack.coordinator.transfer_status(transfer_id).await.unwrap();
    assert_eq!(saga.state, SagaState::Aborted);

    // The deposit branch that did prepare was rolled back
    let deposit = stack
        .ledger
        .pending_transaction(saga.deposit_tx_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(deposit.status, PendingStatus::Aborted);
}

#[tokio::test]
async fn test_unreachable_target_releases_reservation() {
    let stack = common::setup_stack();
    let source = stack.account(dec!(100)).await;
    let target = stack.account(Decimal::ZERO).await;

    stack
        .client
        .fail_next_prepare_deposit(ClientError::Transport("connection refused".to_string()));

    let err = stack
        .coordinator
        .transfer(source, target, dec!(100), &OperationContext::new())
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::TransactionFailed { .. }));

    // Nothing is held back once the withdraw branch is rolled back
    let balance = stack.ledger.withdraw(source, dec!(100)).await.unwrap();
    assert_eq!(balance.value(), Decimal::ZERO);
    assert_eq!(stack.balance(target).await, Decimal::ZERO);
}

#[tokio::test]
async fn test_history_follows_commit_order() {
    let stack = common::setup_stack();
    let a = stack.account(dec!(500)).await;
    let b = stack.account(dec!(500)).await;
    let c = stack.account(dec!(500)).await;
    let ctx = OperationContext::new();

    let first = stack.coordinator.transfer(a, b, dec!(10), &ctx).await.unwrap();
    let second = stack.coordinator.transfer(c, a, dec!(20), &ctx).await.unwrap();
    let third = stack.coordinator.transfer(a, c, dec!(30), &ctx).await.unwrap();

    let ids: Vec<_> = stack
        .coordinator
        .history(a)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.transfer_id)
        .collect();
    assert_eq!(ids, vec![first.transfer_id, second.transfer_id, third.transfer_id]);

    let b_history = stack.coordinator.history(b).await.unwrap();
    assert_eq!(b_history, vec![first]);
    assert_eq!(stack.balance(a).await, dec!(480));
}

#[tokio::test]
async fn test_concurrent_transfers_conserve_money() {
    let stack = common::setup_stack();
    let mut accounts = Vec::new();
    for _ in 0..5 {
        accounts.push(stack.account(dec!(100)).await);
    }

    let mut tasks = JoinSet::new();
    for i in 0..40 {
        let coordinator = stack.coordinator.clone();
        let source = accounts[i % accounts.len()];
        let target = accounts[(i + 1) % accounts.len()];
        let amount = Decimal::from(10 + (i % 4) * 15);
        tasks.spawn(async move {
            coordinator
                .transfer(source, target, amount, &OperationContext::new())
                .await
        });
    }

    let mut committed = 0;
    while let Some(joined) = tasks.join_next().await {
        if joined.unwrap().is_ok() {
            committed += 1;
        }
    }
    assert!(committed > 0);

    let mut total = Decimal::ZERO;
    for id in &accounts {
        let balance = stack.balance(*id).await;
        assert!(balance >= Decimal::ZERO);
        total += balance;
    }
    assert_eq!(total, dec!(500));
}

#[tokio::test]
async fn test_stuck_commit_is_finished_by_recovery() {
    let stack = common::setup_stack_with(CoordinatorConfig {
        commit_max_attempts: 2,
        ..common::fast_config()
    });
    let source = stack.account(dec!(100)).await;
    let target = stack.account(Decimal::ZERO).await;

    stack
        .client
        .fail_commits(ClientError::Transport("ledger restarting".to_string()), 10);

    let err = stack
        .coordinator
        .transfer(source, target, dec!(40), &OperationContext::new())
        .await
        .unwrap_err();
    let transfer_id = match err {
        TransferError::TransactionFailed { transfer_id, .. } => transfer_id,
        other => panic!("unexpected error: {:?}", other),
    };

    // The decision stands: no rollback, nothing applied yet
    let saga = stack.coordinator.transfer_status(transfer_id).await.unwrap();
    assert_eq!(saga.state, SagaState::Committing);
    assert_eq!(stack.balance(source).await, dec!(100));
    assert_eq!(stack.balance(target).await, Decimal::ZERO);

    stack.client.clear_faults();
    let worker = RecoveryWorker::new(stack.coordinator.clone(), immediate_recovery());
    assert_eq!(worker.scan_and_recover().await.unwrap(), 1);

    let saga = stack.coordinator.transfer_status(transfer_id).await.unwrap();
    assert_eq!(saga.state, SagaState::Committed);
    assert_eq!(stack.balance(source).await, dec!(60));
    assert_eq!(stack.balance(target).await, dec!(40));
    assert_eq!(stack.coordinator.history(target).await.unwrap().len(), 1);

    // Nothing left to do
    assert_eq!(worker.scan_and_recover().await.unwrap(), 0);
}

#[tokio::test]
async fn test_transient_commit_failure_applies_once() {
    let stack = common::setup_stack();
    let source = stack.account(dec!(100)).await;
    let target = stack.account(Decimal::ZERO).await;

    stack
        .client
        .fail_commits(ClientError::Transport("connection reset".to_string()), 1);

    stack
        .coordinator
        .transfer(source, target, dec!(25), &OperationContext::new())
        .await
        .unwrap();

    assert_eq!(stack.client.commits_delivered(), 2);
    assert_eq!(stack.balance(source).await, dec!(75));
    assert_eq!(stack.balance(target).await, dec!(25));
}

#[tokio::test]
async fn test_prepare_timeout_aborts() {
    let stack = common::setup_stack_with(CoordinatorConfig {
        call_timeout: Duration::from_millis(20),
        ..common::fast_config()
    });
    let source = stack.account(dec!(100)).await;
    let target = stack.account(Decimal::ZERO).await;

    stack.client.delay_prepares(Duration::from_millis(200));

    let err = stack
        .coordinator
        .transfer(source, target, dec!(40), &OperationContext::new())
        .await
        .unwrap_err();
    let (transfer_id, reason) = failed_transfer_id(err);
    assert!(reason.contains("ledger unavailable"), "reason: {}", reason);

    assert_eq!(stack.store.state_of(transfer_id).await, SagaState::Aborted);
    assert_eq!(stack.client.commits_delivered(), 0);
    assert_eq!(stack.balance(source).await, dec!(100));
    assert_eq!(stack.balance(target).await, Decimal::ZERO);
}

#[tokio::test]
async fn test_unsaved_saga_prepares_nothing() {
    let stack = common::setup_stack();
    let source = stack.account(dec!(100)).await;
    let target = stack.account(Decimal::ZERO).await;

    stack.store.fail_next_save();

    let err = stack
        .coordinator
        .transfer(source, target, dec!(40), &OperationContext::new())
        .await
        .unwrap_err();
    let (transfer_id, reason) = failed_transfer_id(err);
    assert_eq!(reason, "transfer could not be started");

    assert!(matches!(
        stack.coordinator.transfer_status(transfer_id).await,
        Err(TransferError::NotFound(_))
    ));
    assert_eq!(stack.client.commits_delivered(), 0);
    assert_eq!(stack.client.rollbacks_delivered(), 0);

    // No reservation was taken
    let balance = stack.ledger.withdraw(source, dec!(100)).await.unwrap();
    assert_eq!(balance.value(), Decimal::ZERO);
}

#[tokio::test]
async fn test_dropped_commit_decision_aborts() {
    let stack = common::setup_stack();
    let source = stack.account(dec!(100)).await;
    let target = stack.account(Decimal::ZERO).await;

    stack
        .store
        .fail_transition_to(SagaState::Committing, WriteFault::Dropped);

    let err = stack
        .coordinator
        .transfer(source, target, dec!(40), &OperationContext::new())
        .await
        .unwrap_err();
    let (transfer_id, _) = failed_transfer_id(err);

    let saga = stack.coordinator.transfer_status(transfer_id).await.unwrap();
    assert_eq!(saga.state, SagaState::Aborted);
    assert_eq!(stack.client.commits_delivered(), 0);
    for tx_id in [saga.withdraw_tx_id, saga.deposit_tx_id] {
        let branch = stack.ledger.pending_transaction(tx_id).await.unwrap().unwrap();
        assert_eq!(branch.status, PendingStatus::Aborted);
    }
    assert_eq!(stack.balance(source).await, dec!(100));
    assert_eq!(stack.balance(target).await, Decimal::ZERO);
}

#[tokio::test]
async fn test_commit_decision_with_lost_ack_still_commits() {
    let stack = common::setup_stack();
    let source = stack.account(dec!(100)).await;
    let target = stack.account(Decimal::ZERO).await;

    stack
        .store
        .fail_transition_to(SagaState::Committing, WriteFault::AckLost);

    let record = stack
        .coordinator
        .transfer(source, target, dec!(40), &OperationContext::new())
        .await
        .unwrap();

    assert_eq!(stack.store.state_of(record.transfer_id).await, SagaState::Committed);
    assert_eq!(stack.client.rollbacks_delivered(), 0);
    assert_eq!(stack.balance(source).await, dec!(60));
    assert_eq!(stack.balance(target).await, dec!(40));
}

#[tokio::test]
async fn test_unknown_commit_decision_is_left_for_recovery() {
    let stack = common::setup_stack();
    let source = stack.account(dec!(100)).await;
    let target = stack.account(Decimal::ZERO).await;

    // Decision applied, acknowledgement lost, follow-up read fails
    stack
        .store
        .fail_transition_to(SagaState::Committing, WriteFault::AckLost);
    stack.store.fail_reads(1);

    let err = stack
        .coordinator
        .transfer(source, target, dec!(40), &OperationContext::new())
        .await
        .unwrap_err();
    let (transfer_id, reason) = failed_transfer_id(err);
    assert!(reason.contains("pending"), "reason: {}", reason);

    // Nothing was rolled back under a recorded commit decision
    assert_eq!(stack.store.state_of(transfer_id).await, SagaState::Committing);
    assert_eq!(stack.client.rollbacks_delivered(), 0);
    assert_eq!(stack.balance(target).await, Decimal::ZERO);

    let worker = RecoveryWorker::new(stack.coordinator.clone(), immediate_recovery());
    assert_eq!(worker.scan_and_recover().await.unwrap(), 1);

    assert_eq!(stack.store.state_of(transfer_id).await, SagaState::Committed);
    assert_eq!(stack.balance(source).await, dec!(60));
    assert_eq!(stack.balance(target).await, dec!(40));
    assert_eq!(stack.coordinator.history(target).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_dropped_abort_decision_is_finished_by_recovery() {
    let stack = common::setup_stack();
    let source = stack.account(dec!(100)).await;
    let target = stack.account(Decimal::ZERO).await;

    stack
        .client
        .fail_next_prepare_deposit(ClientError::Transport("connection refused".to_string()));
    stack
        .store
        .fail_transition_to(SagaState::Aborting, WriteFault::Dropped);

    let err = stack
        .coordinator
        .transfer(source, target, dec!(40), &OperationContext::new())
        .await
        .unwrap_err();
    let (transfer_id, _) = failed_transfer_id(err);

    // Still undecided, but the reservation is already released
    let saga = stack.coordinator.transfer_status(transfer_id).await.unwrap();
    assert_eq!(saga.state, SagaState::Preparing);
    let withdraw = stack
        .ledger
        .pending_transaction(saga.withdraw_tx_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(withdraw.status, PendingStatus::Aborted);

    let worker = RecoveryWorker::new(stack.coordinator.clone(), immediate_recovery());
    assert_eq!(worker.scan_and_recover().await.unwrap(), 1);
    assert_eq!(stack.store.state_of(transfer_id).await, SagaState::Aborted);
    assert_eq!(stack.balance(source).await, dec!(100));
    assert_eq!(stack.client.commits_delivered(), 0);
}

#[tokio::test]
async fn test_failed_record_append_is_finished_by_recovery() {
    let stack = common::setup_stack();
    let source = stack.account(dec!(100)).await;
    let target = stack.account(Decimal::ZERO).await;

    stack.store.fail_next_complete();

    let err = stack
        .coordinator
        .transfer(source, target, dec!(40), &OperationContext::new())
        .await
        .unwrap_err();
    let (transfer_id, _) = failed_transfer_id(err);

    // Both branches are committed; only the record is missing
    assert_eq!(stack.store.state_of(transfer_id).await, SagaState::Committing);
    assert_eq!(stack.balance(source).await, dec!(60));
    assert_eq!(stack.balance(target).await, dec!(40));
    assert!(stack.coordinator.history(target).await.unwrap().is_empty());
    assert_eq!(stack.client.rollbacks_delivered(), 0);

    let worker = RecoveryWorker::new(stack.coordinator.clone(), immediate_recovery());
    assert_eq!(worker.scan_and_recover().await.unwrap(), 1);

    assert_eq!(stack.store.state_of(transfer_id).await, SagaState::Committed);
    assert_eq!(stack.coordinator.history(target).await.unwrap().len(), 1);
    // Replayed commits are no-ops
    assert_eq!(stack.balance(source).await, dec!(60));
    assert_eq!(stack.balance(target).await, dec!(40));
}

#[tokio::test]
async fn test_scan_continues_when_attempt_bookkeeping_fails() {
    let stack = common::setup_stack_with(CoordinatorConfig {
        commit_max_attempts: 1,
        ..common::fast_config()
    });
    let source = stack.account(dec!(100)).await;
    let target = stack.account(Decimal::ZERO).await;

    // A transfer stuck in COMMITTING that recovery cannot finish yet
    stack
        .client
        .fail_commits(ClientError::Transport("ledger restarting".to_string()), 10);
    let err = stack
        .coordinator
        .transfer(source, target, dec!(20), &OperationContext::new())
        .await
        .unwrap_err();
    let (stuck, _) = failed_transfer_id(err);

    // A transfer abandoned mid-prepare that recovery can abort
    let abandoned = TransferSaga::begin(source, target, Amount::new(dec!(30)).unwrap());
    stack.store.save_saga(&abandoned).await.unwrap();
    stack
        .ledger
        .prepare_withdraw(abandoned.withdraw_tx_id, source, dec!(30))
        .await
        .unwrap();

    stack.store.fail_record_attempts(true);

    let worker = RecoveryWorker::new(stack.coordinator.clone(), immediate_recovery());
    assert_eq!(worker.scan_and_recover().await.unwrap(), 1);

    assert_eq!(stack.store.state_of(abandoned.transfer_id).await, SagaState::Aborted);
    assert_eq!(stack.store.state_of(stuck).await, SagaState::Committing);
}
