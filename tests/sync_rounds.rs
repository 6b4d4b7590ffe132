//! Multi-device sync scenarios against the in-memory server backend.

mod common;

use std::time::Duration;

use common::{backend, Device};
use stitchbook::models::{Customer, Measurement, Order, SyncStatus};
use stitchbook::sync::{ConnectivityMonitor, SyncError, SyncScheduler};

const OWNER: &str = "workshop-1";

#[tokio::test]
async fn test_created_record_is_synced_after_round() {
    let (backend, _) = backend(10_000);
    let device = Device::new(&backend, OWNER, 1_000).await;

    let customer = device
        .workshop
        .add_customer(Customer::new(OWNER, "Ada Obi"))
        .await
        .unwrap();
    assert_eq!(device.workshop.pending_changes().await.unwrap().total(), 1);

    let report = device.engine.run_round().await.unwrap();
    assert_eq!(report.pushed, 1);
    assert_eq!(report.confirmed, 1);

    let stored: Customer = device
        .workshop
        .get(customer.meta.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.meta.sync_status, SyncStatus::Synced);
    assert_eq!(stored.meta.updated_at, customer.meta.updated_at);
    assert_eq!(device.workshop.pending_changes().await.unwrap().total(), 0);
    assert_eq!(backend.row_count(OWNER), 1);
    assert_eq!(device.checkpoint().await, Some(report.checkpoint));
}

#[tokio::test]
async fn test_second_device_receives_records() {
    let (backend, _) = backend(10_000);
    let a = Device::new(&backend, OWNER, 1_000).await;
    let b = Device::new(&backend, OWNER, 1_000).await;

    let customer = a
        .workshop
        .add_customer(Customer::new(OWNER, "Ada Obi").with_phone_number("0800"))
        .await
        .unwrap();
    a.workshop
        .add_measurement(
            Measurement::new(OWNER, customer.meta.id, "Trouser")
                .with_value("waist", 32.0)
                .with_value("inseam", 30.5),
        )
        .await
        .unwrap();
    a.engine.run_round().await.unwrap();

    let report = b.engine.run_round().await.unwrap();
    assert_eq!(report.pushed, 0);
    assert_eq!(report.applied, 2);

    let received: Customer = b.workshop.get(customer.meta.id).await.unwrap().unwrap();
    assert_eq!(received.full_name, "Ada Obi");
    assert_eq!(received.phone_number.as_deref(), Some("0800"));
    assert_eq!(received.meta.owner_id, OWNER);
    assert_eq!(received.meta.sync_status, SyncStatus::Synced);

    let measurements = b
        .workshop
        .customer_measurements(customer.meta.id)
        .await
        .unwrap();
    assert_eq!(measurements.len(), 1);
    assert_eq!(measurements[0].values.get("inseam"), Some(&30.5));
    assert_eq!(b.workshop.pending_changes().await.unwrap().total(), 0);
}

#[tokio::test]
async fn test_concurrent_edits_converge_on_latest_write() {
    let (backend, _) = backend(10_000);
    let a = Device::new(&backend, OWNER, 1_000).await;
    let b = Device::new(&backend, OWNER, 1_000).await;

    let customer = a
        .workshop
        .add_customer(Customer::new(OWNER, "Ada"))
        .await
        .unwrap();
    a.engine.run_round().await.unwrap();
    b.engine.run_round().await.unwrap();

    // Both edit offline; B's edit is later
    a.at(2_000)
        .workshop
        .update::<Customer, _>(customer.meta.id, |c| c.full_name = "Ada (A)".into())
        .await
        .unwrap();
    b.at(3_000)
        .workshop
        .update::<Customer, _>(customer.meta.id, |c| c.full_name = "Ada (B)".into())
        .await
        .unwrap();

    // The later writer syncs first, the earlier one second
    b.engine.run_round().await.unwrap();
    a.engine.run_round().await.unwrap();
    b.engine.run_round().await.unwrap();

    for device in [&a, &b] {
        let c: Customer = device
            .workshop
            .get(customer.meta.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(c.full_name, "Ada (B)");
        assert_eq!(c.meta.updated_at, 3_000);
        assert_eq!(c.meta.sync_status, SyncStatus::Synced);
    }
}

#[tokio::test]
async fn test_pull_failure_after_push_is_retried() {
    let (backend, _) = backend(10_000);
    let a = Device::new(&backend, OWNER, 1_000).await;

    a.workshop
        .add_customer(Customer::new(OWNER, "Ada"))
        .await
        .unwrap();

    a.transport.fail_pulls(true);
    let err = a.engine.run_round().await.unwrap_err();
    assert!(matches!(err, SyncError::Transport(_)));

    // The push landed and was acknowledged; the checkpoint did not move
    assert_eq!(backend.row_count(OWNER), 1);
    assert_eq!(a.workshop.pending_changes().await.unwrap().total(), 0);
    assert_eq!(a.checkpoint().await, None);

    a.transport.fail_pulls(false);
    let report = a.engine.run_round().await.unwrap();
    assert_eq!(report.pushed, 0);
    assert_eq!(report.applied, 0);
    assert_eq!(report.skipped, 1);
    assert!(a.checkpoint().await.is_some());
}

#[tokio::test]
async fn test_failed_push_loses_no_edits() {
    let (backend, _) = backend(10_000);
    let a = Device::new(&backend, OWNER, 1_000).await;

    let customer = a
        .workshop
        .add_customer(Customer::new(OWNER, "Ada"))
        .await
        .unwrap();

    a.transport.fail_pushes(true);
    assert!(a.engine.run_round().await.is_err());
    a.at(1_500)
        .workshop
        .update::<Customer, _>(customer.meta.id, |c| c.notes = Some("Slim fit".into()))
        .await
        .unwrap();
    assert!(a.engine.run_round().await.is_err());
    assert_eq!(backend.row_count(OWNER), 0);
    assert_eq!(a.workshop.pending_changes().await.unwrap().dirty, 1);

    a.transport.fail_pushes(false);
    a.engine.run_round().await.unwrap();

    let b = Device::new(&backend, OWNER, 1_000).await;
    b.engine.run_round().await.unwrap();
    let received: Customer = b.workshop.get(customer.meta.id).await.unwrap().unwrap();
    assert_eq!(received.notes.as_deref(), Some("Slim fit"));
    assert_eq!(received.meta.updated_at, 1_500);
}

#[tokio::test]
async fn test_deletion_converges_across_devices() {
    let (backend, _) = backend(10_000);
    let a = Device::new(&backend, OWNER, 1_000).await;
    let b = Device::new(&backend, OWNER, 1_000).await;

    let customer = a
        .workshop
        .add_customer(Customer::new(OWNER, "Ada"))
        .await
        .unwrap();
    let order = a
        .workshop
        .add_order(Order::new(OWNER, customer.meta.id, "Agbada").with_amount(150.0))
        .await
        .unwrap();
    a.engine.run_round().await.unwrap();
    b.engine.run_round().await.unwrap();

    // A deletes the customer; B edits it offline afterwards
    a.at(2_000)
        .workshop
        .delete::<Customer>(customer.meta.id)
        .await
        .unwrap();
    b.at(3_000)
        .workshop
        .update::<Customer, _>(customer.meta.id, |c| c.full_name = "Ada O.".into())
        .await
        .unwrap();

    let report = a.engine.run_round().await.unwrap();
    assert_eq!(report.purged, 2);
    assert!(a.store().get::<Customer>(customer.meta.id).await.unwrap().is_none());
    assert!(a.store().get::<Order>(order.meta.id).await.unwrap().is_none());

    // Deletion is terminal: B's later edit does not resurrect the customer
    b.engine.run_round().await.unwrap();
    assert!(b.store().get::<Customer>(customer.meta.id).await.unwrap().is_none());
    assert!(b.store().get::<Order>(order.meta.id).await.unwrap().is_none());

    a.engine.run_round().await.unwrap();
    assert!(a.store().get::<Customer>(customer.meta.id).await.unwrap().is_none());
    assert!(a.workshop.list::<Customer>().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_replayed_pull_changes_nothing() {
    let (backend, _) = backend(10_000);
    let a = Device::new(&backend, OWNER, 1_000).await;
    let b = Device::new(&backend, OWNER, 1_000).await;

    for name in ["Ada", "Bola", "Chi"] {
        a.workshop
            .add_customer(Customer::new(OWNER, name))
            .await
            .unwrap();
    }
    a.engine.run_round().await.unwrap();
    b.engine.run_round().await.unwrap();

    let mut before: Vec<Customer> = b.workshop.list().await.unwrap();
    b.forget_checkpoint().await;

    let report = b.engine.run_round().await.unwrap();
    assert_eq!(report.applied, 0);
    assert_eq!(report.skipped, 3);

    let mut after: Vec<Customer> = b.workshop.list().await.unwrap();
    before.sort_by_key(|c| c.meta.id);
    after.sort_by_key(|c| c.meta.id);
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_checkpoint_never_moves_backwards() {
    let (backend, server_clock) = backend(10_000);
    let a = Device::new(&backend, OWNER, 1_000).await;

    a.workshop
        .add_customer(Customer::new(OWNER, "Ada"))
        .await
        .unwrap();
    a.engine.run_round().await.unwrap();
    let first = a.checkpoint().await.unwrap();

    // Server clock jumps backwards
    server_clock.set(5_000);
    a.workshop
        .add_customer(Customer::new(OWNER, "Bola"))
        .await
        .unwrap();
    let report = a.engine.run_round().await.unwrap();
    assert!(report.checkpoint >= first);

    server_clock.set(20_000);
    let report = a.engine.run_round().await.unwrap();
    assert_eq!(report.checkpoint, 20_000);
    assert_eq!(a.checkpoint().await, Some(20_000));
}

#[tokio::test]
async fn test_scheduler_runs_at_most_one_round() {
    let (backend, _) = backend(10_000);
    let a = Device::new(&backend, OWNER, 1_000).await;
    a.workshop
        .add_customer(Customer::new(OWNER, "Ada"))
        .await
        .unwrap();
    a.transport.delay_pushes(Duration::from_millis(100));

    let scheduler = SyncScheduler::new(
        a.new_engine(),
        ConnectivityMonitor::default(),
        Duration::from_secs(300),
    )
    .await
    .unwrap();

    let (first, second) = tokio::join!(scheduler.sync_now(), scheduler.sync_now());
    let reports = [first.unwrap(), second.unwrap()];
    assert_eq!(reports.iter().filter(|r| r.is_some()).count(), 1);
    assert_eq!(a.transport.pushes(), 1);
    assert_eq!(a.transport.pulls(), 1);
    assert!(!scheduler.is_syncing());
}

#[tokio::test]
async fn test_scheduler_fails_fast_when_offline() {
    let (backend, _) = backend(10_000);
    let a = Device::new(&backend, OWNER, 1_000).await;
    a.workshop
        .add_customer(Customer::new(OWNER, "Ada"))
        .await
        .unwrap();

    let connectivity = ConnectivityMonitor::new(false);
    let scheduler = SyncScheduler::new(
        a.new_engine(),
        connectivity.clone(),
        Duration::from_secs(300),
    )
    .await
    .unwrap();

    let err = scheduler.request_sync().await.unwrap_err();
    assert!(matches!(err, SyncError::Offline));
    assert_eq!(a.transport.pushes(), 0);
    assert!(!scheduler.state().is_online);

    connectivity.set_online(true);
    scheduler.request_sync().await.unwrap();
    assert_eq!(a.transport.pushes(), 1);
    let state = scheduler.state();
    assert!(state.last_synced_at.is_some());
    assert_eq!(state.last_error, None);
}

#[tokio::test]
async fn test_scheduler_records_and_clears_last_error() {
    let (backend, _) = backend(10_000);
    let a = Device::new(&backend, OWNER, 1_000).await;
    a.workshop
        .add_customer(Customer::new(OWNER, "Ada"))
        .await
        .unwrap();

    let scheduler = SyncScheduler::new(
        a.new_engine(),
        ConnectivityMonitor::default(),
        Duration::from_secs(300),
    )
    .await
    .unwrap();

    a.transport.fail_pushes(true);
    assert!(scheduler.sync_now().await.is_err());
    assert!(scheduler.state().last_error.is_some());

    // A fresh scheduler over the same store restores the error
    let restored = SyncScheduler::new(
        a.new_engine(),
        ConnectivityMonitor::default(),
        Duration::from_secs(300),
    )
    .await
    .unwrap();
    assert!(restored
        .state()
        .last_error
        .unwrap()
        .contains("connection reset"));

    a.transport.fail_pushes(false);
    restored.sync_now().await.unwrap();
    assert_eq!(restored.state().last_error, None);
}
