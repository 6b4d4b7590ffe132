//! End-to-end sync over HTTP against the axum router.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use stitchbook::clock::{ManualClock, SystemClock};
use stitchbook::db::{open_store, Store};
use stitchbook::models::{Customer, Invoice, InvoiceStatus, Order, SyncStatus};
use stitchbook::server::{router, ApiKeyStore, AppState, Backend};
use stitchbook::sync::{HttpTransport, SyncEngine, SyncError, Transport};
use stitchbook::Workshop;
use tempfile::TempDir;

const OWNER: &str = "workshop-1";
const API_KEY: &str = "test-key";

async fn spawn_server() -> SocketAddr {
    let state = AppState {
        api_keys: Arc::new(ApiKeyStore::from_entries([
            (API_KEY, OWNER),
            ("other-key", "workshop-2"),
        ])),
        backend: Arc::new(Backend::new(Arc::new(SystemClock))),
    };
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.unwrap();
    });
    addr
}

struct Client {
    workshop: Workshop,
    engine: SyncEngine<HttpTransport>,
    clock: Arc<ManualClock>,
    _temp_dir: TempDir,
}

impl Client {
    async fn new(addr: SocketAddr, api_key: &str, owner_id: &str) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let store: Store = open_store(temp_dir.path().join("client.db")).await.unwrap();
        let clock = Arc::new(ManualClock::new(1_000));
        let transport =
            HttpTransport::new(format!("http://{}/", addr), api_key, Duration::from_secs(5))
                .unwrap();

        Self {
            workshop: Workshop::new(store.clone(), clock.clone(), owner_id),
            engine: SyncEngine::new(store, transport, owner_id),
            clock,
            _temp_dir: temp_dir,
        }
    }
}

#[tokio::test]
async fn test_sync_between_two_clients_over_http() {
    let addr = spawn_server().await;
    let a = Client::new(addr, API_KEY, OWNER).await;
    let b = Client::new(addr, API_KEY, OWNER).await;

    assert!(a.engine.transport().ping().await);

    let customer = a
        .workshop
        .add_customer(Customer::new(OWNER, "Ada Obi").with_email("ada@example.com"))
        .await
        .unwrap();
    let order = a
        .workshop
        .add_order(Order::new(OWNER, customer.meta.id, "Agbada").with_amount(200.0))
        .await
        .unwrap();
    let invoice = a
        .workshop
        .add_invoice(
            Invoice::new(OWNER, customer.meta.id, order.meta.id, "INV-0001").with_amount(200.0),
        )
        .await
        .unwrap();

    let report = a.engine.run_round().await.unwrap();
    assert_eq!(report.pushed, 3);
    assert_eq!(report.confirmed, 3);

    let report = b.engine.run_round().await.unwrap();
    assert_eq!(report.applied, 3);
    let received: Invoice = b.workshop.get(invoice.meta.id).await.unwrap().unwrap();
    assert_eq!(received.invoice_number, "INV-0001");
    assert_eq!(received.order_id, order.meta.id);
    assert_eq!(received.meta.sync_status, SyncStatus::Synced);

    // B marks the invoice paid, A picks it up
    b.clock.set(5_000);
    b.workshop
        .update::<Invoice, _>(invoice.meta.id, |i| i.status = InvoiceStatus::Paid)
        .await
        .unwrap();
    b.engine.run_round().await.unwrap();
    a.engine.run_round().await.unwrap();

    let paid: Invoice = a.workshop.get(invoice.meta.id).await.unwrap().unwrap();
    assert_eq!(paid.status, InvoiceStatus::Paid);
    assert_eq!(paid.meta.updated_at, 5_000);

    // A deletes the order; the invoice goes with it on both sides
    a.clock.set(6_000);
    a.workshop.delete::<Order>(order.meta.id).await.unwrap();
    a.engine.run_round().await.unwrap();
    b.engine.run_round().await.unwrap();
    assert!(b.workshop.get::<Order>(order.meta.id).await.unwrap().is_none());
    assert!(b
        .workshop
        .store()
        .get::<Invoice>(invoice.meta.id)
        .await
        .unwrap()
        .is_none());
    assert!(b.workshop.get::<Customer>(customer.meta.id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_accounts_are_isolated() {
    let addr = spawn_server().await;
    let a = Client::new(addr, API_KEY, OWNER).await;
    let other = Client::new(addr, "other-key", "workshop-2").await;

    a.workshop
        .add_customer(Customer::new(OWNER, "Ada"))
        .await
        .unwrap();
    a.engine.run_round().await.unwrap();

    let report = other.engine.run_round().await.unwrap();
    assert_eq!(report.applied, 0);
    assert!(other.workshop.list::<Customer>().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_bad_api_key_is_unauthorized() {
    let addr = spawn_server().await;
    let client = Client::new(addr, "wrong-key", OWNER).await;
    client
        .workshop
        .add_customer(Customer::new(OWNER, "Ada"))
        .await
        .unwrap();

    let err = client.engine.run_round().await.unwrap_err();
    assert!(matches!(err, SyncError::Unauthorized(_)));
    assert_eq!(client.workshop.pending_changes().await.unwrap().total(), 1);
}

#[tokio::test]
async fn test_unreachable_server_is_transport_error() {
    // Bind then drop to get a port nobody listens on
    let addr = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let client = Client::new(addr, API_KEY, OWNER).await;

    assert!(!client.engine.transport().ping().await);
    let err = client.engine.run_round().await.unwrap_err();
    assert!(matches!(err, SyncError::Transport(_)));
    assert!(err.is_retryable());
}
