//! Decides when sync rounds run and guarantees at most one at a time.
//!
//! Triggers (interval ticks, foregrounding, connectivity regained, local
//! writes, explicit user requests) all funnel into [`SyncScheduler`]. A
//! trigger that arrives while a round is in flight is dropped rather than
//! queued; the next trigger picks up whatever is still pending.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::checkpoint;
use super::connectivity::ConnectivityMonitor;
use super::engine::{RoundReport, SyncEngine};
use super::error::SyncError;
use super::transport::Transport;
use crate::clock::Millis;
use crate::db::StoreError;

/// Observable sync status for UI.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncState {
    pub is_syncing: bool,
    pub is_online: bool,
    pub last_synced_at: Option<Millis>,
    pub last_error: Option<String>,
}

/// Why a round was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    Interval,
    Foreground,
    ConnectivityRegained,
    LocalWrite,
    User,
}

impl std::fmt::Display for SyncTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncTrigger::Interval => write!(f, "interval"),
            SyncTrigger::Foreground => write!(f, "foreground"),
            SyncTrigger::ConnectivityRegained => write!(f, "connectivity"),
            SyncTrigger::LocalWrite => write!(f, "local-write"),
            SyncTrigger::User => write!(f, "user"),
        }
    }
}

/// Fire-and-forget handle for requesting a round from anywhere.
#[derive(Debug, Clone)]
pub struct SyncTriggers {
    sender: mpsc::UnboundedSender<SyncTrigger>,
}

impl SyncTriggers {
    pub(crate) fn from_sender(sender: mpsc::UnboundedSender<SyncTrigger>) -> Self {
        Self { sender }
    }

    pub fn send(&self, trigger: SyncTrigger) {
        if self.sender.send(trigger).is_err() {
            debug!(%trigger, "Scheduler stopped, trigger ignored");
        }
    }

    pub fn local_write(&self) {
        self.send(SyncTrigger::LocalWrite);
    }

    pub fn foreground(&self) {
        self.send(SyncTrigger::Foreground);
    }
}

/// Resets the in-flight flag when a round ends, however it ends.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlight(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct Inner<T> {
    engine: SyncEngine<T>,
    connectivity: ConnectivityMonitor,
    interval: Duration,
    in_flight: AtomicBool,
    state: watch::Sender<SyncState>,
    triggers: mpsc::UnboundedSender<SyncTrigger>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<SyncTrigger>>>,
}

pub struct SyncScheduler<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for SyncScheduler<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transport> SyncScheduler<T> {
    /// Creates a scheduler, restoring the persisted checkpoint and last error.
    pub async fn new(
        engine: SyncEngine<T>,
        connectivity: ConnectivityMonitor,
        interval: Duration,
    ) -> Result<Self, StoreError> {
        let (last_synced_at, last_error) = {
            let mut conn = engine.store().pool().acquire().await?;
            (
                checkpoint::last_synced_at(&mut conn).await?,
                checkpoint::last_error(&mut conn).await?,
            )
        };

        let (state, _) = watch::channel(SyncState {
            is_syncing: false,
            is_online: connectivity.is_connected(),
            last_synced_at,
            last_error,
        });
        let (triggers, receiver) = mpsc::unbounded_channel();

        Ok(Self {
            inner: Arc::new(Inner {
                engine,
                connectivity,
                interval,
                in_flight: AtomicBool::new(false),
                state,
                triggers,
                receiver: Mutex::new(Some(receiver)),
            }),
        })
    }

    pub fn engine(&self) -> &SyncEngine<T> {
        &self.inner.engine
    }

    /// Online flag shared with whoever observes reachability.
    pub fn connectivity(&self) -> ConnectivityMonitor {
        self.inner.connectivity.clone()
    }

    pub fn state(&self) -> SyncState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.inner.state.subscribe()
    }

    pub fn is_syncing(&self) -> bool {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    pub fn triggers(&self) -> SyncTriggers {
        SyncTriggers::from_sender(self.inner.triggers.clone())
    }

    fn update_state(&self, f: impl FnOnce(&mut SyncState)) {
        self.inner.state.send_modify(f);
    }

    /// Runs a round now unless one is already in flight.
    ///
    /// Fails fast with `Offline` when there is no connectivity. Returning
    /// `Ok` while another round is in flight is not an error.
    pub async fn request_sync(&self) -> Result<(), SyncError> {
        self.execute(SyncTrigger::User).await.map(|_| ())
    }

    /// User-initiated round. Errors are returned for display.
    ///
    /// Returns `None` when another round was already in flight.
    pub async fn sync_now(&self) -> Result<Option<RoundReport>, SyncError> {
        self.execute(SyncTrigger::User).await
    }

    /// Background round. Errors are recorded in the state and logged, never returned.
    pub async fn trigger(&self, trigger: SyncTrigger) {
        match self.execute(trigger).await {
            Ok(_) => {}
            Err(SyncError::Offline) => debug!(%trigger, "Offline, skipping sync"),
            Err(e) => warn!(%trigger, error = %e, "Background sync failed"),
        }
    }

    async fn execute(&self, trigger: SyncTrigger) -> Result<Option<RoundReport>, SyncError> {
        if !self.inner.connectivity.is_connected() {
            self.update_state(|s| s.is_online = false);
            return Err(SyncError::Offline);
        }

        let Some(_guard) = InFlight::acquire(&self.inner.in_flight) else {
            debug!(%trigger, "Sync already in flight, trigger dropped");
            return Ok(None);
        };

        debug!(%trigger, "Starting sync round");
        self.update_state(|s| {
            s.is_syncing = true;
            s.is_online = true;
        });

        let outcome = match self.inner.engine.run_round().await {
            Ok(report) => {
                self.persist_error(None).await;
                self.update_state(|s| {
                    s.last_synced_at = Some(report.checkpoint);
                    s.last_error = None;
                });
                Ok(Some(report))
            }
            Err(e) if e.is_benign() => {
                info!("Server reports a round already running for this account");
                Ok(None)
            }
            Err(e) => {
                let message = e.to_string();
                self.persist_error(Some(&message)).await;
                self.update_state(|s| s.last_error = Some(message));
                Err(e)
            }
        };

        self.update_state(|s| s.is_syncing = false);
        outcome
    }

    async fn persist_error(&self, error: Option<&str>) {
        let result: Result<(), StoreError> = async {
            let mut conn = self.inner.engine.store().pool().acquire().await?;
            checkpoint::record_error(&mut conn, error).await
        }
        .await;

        if let Err(e) = result {
            warn!(error = %e, "Failed to persist sync status");
        }
    }

    /// Drives interval, connectivity and trigger-channel rounds until `shutdown` resolves.
    ///
    /// Rounds are spawned so that triggers arriving mid-round hit the
    /// in-flight guard and are dropped. Only one loop can run per scheduler.
    pub async fn run(self, shutdown: impl Future<Output = ()>) {
        let Some(mut receiver) = self.inner.receiver.lock().await.take() else {
            warn!("Sync scheduler loop is already running");
            return;
        };

        let mut online = self.inner.connectivity.subscribe();
        let mut was_online = *online.borrow_and_update();
        let mut ticker = tokio::time::interval(self.inner.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tokio::pin!(shutdown);
        info!(interval_secs = self.inner.interval.as_secs(), "Sync scheduler started");

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => self.spawn_round(SyncTrigger::Interval),
                Some(trigger) = receiver.recv() => self.spawn_round(trigger),
                changed = online.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let now_online = *online.borrow_and_update();
                    self.update_state(|s| s.is_online = now_online);
                    if now_online && !was_online {
                        self.spawn_round(SyncTrigger::ConnectivityRegained);
                    }
                    was_online = now_online;
                }
            }
        }

        // Hand the receiver back so the loop can be restarted
        *self.inner.receiver.lock().await = Some(receiver);
        info!("Sync scheduler stopped");
    }

    fn spawn_round(&self, trigger: SyncTrigger) {
        if self.is_syncing() {
            debug!(%trigger, "Sync already in flight, trigger dropped");
            return;
        }
        let scheduler = self.clone();
        tokio::spawn(async move { scheduler.trigger(trigger).await });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{init_db, Store};
    use crate::sync::transport::{PullResponse, PushRequest};
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;
    use tokio::sync::Notify;

    /// Transport whose pull blocks until released.
    #[derive(Default)]
    struct GatedTransport {
        pulls: AtomicUsize,
        release: Notify,
        gated: bool,
    }

    impl Transport for GatedTransport {
        async fn push(&self, _request: &PushRequest) -> Result<(), SyncError> {
            Ok(())
        }

        async fn pull(
            &self,
            _last_pulled_at: Option<Millis>,
            _schema_version: i64,
        ) -> Result<PullResponse, SyncError> {
            let n = self.pulls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.gated {
                self.release.notified().await;
            }
            Ok(PullResponse {
                changes: Default::default(),
                timestamp: 1_000 * n as Millis,
            })
        }

        async fn ping(&self) -> bool {
            true
        }
    }

    struct TestContext {
        store: Store,
        _temp_dir: TempDir,
    }

    impl TestContext {
        async fn new() -> Self {
            let temp_dir = TempDir::new().unwrap();
            let pool = init_db(temp_dir.path().join("test.db")).await.unwrap();
            Self {
                store: Store::new(pool),
                _temp_dir: temp_dir,
            }
        }

        async fn scheduler(
            &self,
            transport: Arc<GatedTransport>,
            connectivity: ConnectivityMonitor,
        ) -> SyncScheduler<Arc<GatedTransport>> {
            let engine = SyncEngine::new(self.store.clone(), transport, "me");
            SyncScheduler::new(engine, connectivity, Duration::from_secs(3600))
                .await
                .unwrap()
        }
    }

    #[tokio::test]
    async fn test_request_sync_updates_state() {
        let ctx = TestContext::new().await;
        let transport = Arc::new(GatedTransport::default());
        let scheduler = ctx
            .scheduler(transport.clone(), ConnectivityMonitor::new(true))
            .await;

        scheduler.request_sync().await.unwrap();

        let state = scheduler.state();
        assert!(!state.is_syncing);
        assert!(state.is_online);
        assert_eq!(state.last_synced_at, Some(1_000));
        assert_eq!(state.last_error, None);
    }

    #[tokio::test]
    async fn test_offline_fails_fast() {
        let ctx = TestContext::new().await;
        let transport = Arc::new(GatedTransport::default());
        let scheduler = ctx
            .scheduler(transport.clone(), ConnectivityMonitor::new(false))
            .await;

        let err = scheduler.request_sync().await.unwrap_err();
        assert!(matches!(err, SyncError::Offline));
        assert_eq!(transport.pulls.load(Ordering::SeqCst), 0);
        assert!(!scheduler.state().is_online);

        // Background triggers swallow it
        scheduler.trigger(SyncTrigger::Interval).await;
    }

    #[tokio::test]
    async fn test_concurrent_requests_run_one_round() {
        let ctx = TestContext::new().await;
        let transport = Arc::new(GatedTransport {
            gated: true,
            ..Default::default()
        });
        let scheduler = ctx
            .scheduler(transport.clone(), ConnectivityMonitor::new(true))
            .await;

        let first = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.sync_now().await })
        };

        // Wait until the first round is parked in pull
        while transport.pulls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        assert!(scheduler.is_syncing());
        assert!(scheduler.state().is_syncing);

        let second = scheduler.sync_now().await.unwrap();
        assert!(second.is_none());

        transport.release.notify_one();
        let report = first.await.unwrap().unwrap();
        assert!(report.is_some());
        assert_eq!(transport.pulls.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_syncing());
    }

    #[tokio::test]
    async fn test_persisted_state_restored() {
        let ctx = TestContext::new().await;
        {
            let mut conn = ctx.store.pool().acquire().await.unwrap();
            checkpoint::advance(&mut conn, 777).await.unwrap();
            checkpoint::record_error(&mut conn, Some("Offline")).await.unwrap();
        }

        let scheduler = ctx
            .scheduler(Arc::new(GatedTransport::default()), ConnectivityMonitor::new(true))
            .await;
        let state = scheduler.state();
        assert_eq!(state.last_synced_at, Some(777));
        assert_eq!(state.last_error.as_deref(), Some("Offline"));
    }

    #[tokio::test]
    async fn test_foreground_trigger_runs_round() {
        let ctx = TestContext::new().await;
        let transport = Arc::new(GatedTransport::default());
        let scheduler = ctx
            .scheduler(transport.clone(), ConnectivityMonitor::new(true))
            .await;
        let mut states = scheduler.subscribe();

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(scheduler.clone().run(async {
            let _ = stop_rx.await;
        }));

        // Let the initial tick's round finish first
        tokio::time::timeout(Duration::from_secs(5), async {
            while states.borrow_and_update().last_synced_at.is_none() {
                states.changed().await.unwrap();
            }
        })
        .await
        .unwrap();

        let before = transport.pulls.load(Ordering::SeqCst);
        tokio::time::timeout(Duration::from_secs(5), async {
            while transport.pulls.load(Ordering::SeqCst) == before {
                scheduler.triggers().foreground();
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        stop_tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_run_loop_syncs_on_trigger_and_reconnect() {
        let ctx = TestContext::new().await;
        let transport = Arc::new(GatedTransport::default());
        let connectivity = ConnectivityMonitor::new(false);
        let scheduler = ctx.scheduler(transport.clone(), connectivity.clone()).await;
        let mut states = scheduler.subscribe();

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(scheduler.clone().run(async {
            let _ = stop_rx.await;
        }));

        // Offline: the initial tick is swallowed
        connectivity.set_online(true);
        tokio::time::timeout(Duration::from_secs(5), async {
            while states.borrow_and_update().last_synced_at.is_none() {
                states.changed().await.unwrap();
            }
        })
        .await
        .unwrap();
        assert!(transport.pulls.load(Ordering::SeqCst) >= 1);

        // A trigger landing mid-round is dropped, so keep nudging
        let before = transport.pulls.load(Ordering::SeqCst);
        tokio::time::timeout(Duration::from_secs(5), async {
            while transport.pulls.load(Ordering::SeqCst) == before {
                scheduler.triggers().local_write();
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        stop_tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
