//! Shared fixtures for the sync integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use stitchbook::clock::{ManualClock, Millis};
use stitchbook::db::{open_store, Store};
use stitchbook::server::Backend;
use stitchbook::sync::{checkpoint, PullResponse, PushRequest, SyncEngine, SyncError, Transport};
use stitchbook::Workshop;
use tempfile::TempDir;

/// Transport that talks to an in-process [`Backend`], passing every body
/// through JSON like the HTTP transport does.
pub struct LoopbackTransport {
    backend: Arc<Backend>,
    owner_id: String,
    online: AtomicBool,
    fail_pushes: AtomicBool,
    fail_pulls: AtomicBool,
    push_delay: Mutex<Option<Duration>>,
    pushes: AtomicUsize,
    pulls: AtomicUsize,
}

impl LoopbackTransport {
    pub fn new(backend: Arc<Backend>, owner_id: &str) -> Self {
        Self {
            backend,
            owner_id: owner_id.to_string(),
            online: AtomicBool::new(true),
            fail_pushes: AtomicBool::new(false),
            fail_pulls: AtomicBool::new(false),
            push_delay: Mutex::new(None),
            pushes: AtomicUsize::new(0),
            pulls: AtomicUsize::new(0),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn fail_pushes(&self, fail: bool) {
        self.fail_pushes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_pulls(&self, fail: bool) {
        self.fail_pulls.store(fail, Ordering::SeqCst);
    }

    pub fn delay_pushes(&self, delay: Duration) {
        *self.push_delay.lock().unwrap() = Some(delay);
    }

    pub fn pushes(&self) -> usize {
        self.pushes.load(Ordering::SeqCst)
    }

    pub fn pulls(&self) -> usize {
        self.pulls.load(Ordering::SeqCst)
    }

    fn check_online(&self) -> Result<(), SyncError> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SyncError::Transport("connection refused".into()))
        }
    }
}

fn roundtrip<T: serde::Serialize + serde::de::DeserializeOwned>(value: &T) -> T {
    let body = serde_json::to_vec(value).unwrap();
    serde_json::from_slice(&body).unwrap()
}

impl Transport for LoopbackTransport {
    async fn push(&self, request: &PushRequest) -> Result<(), SyncError> {
        self.check_online()?;
        let delay = *self.push_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_pushes.load(Ordering::SeqCst) {
            return Err(SyncError::Transport("connection reset during push".into()));
        }

        self.pushes.fetch_add(1, Ordering::SeqCst);
        self.backend
            .push(&self.owner_id, roundtrip(request))
            .map(|_| ())
            .map_err(|e| SyncError::ServerRejection {
                status: 422,
                message: e.to_string(),
            })
    }

    async fn pull(
        &self,
        last_pulled_at: Option<Millis>,
        _schema_version: i64,
    ) -> Result<PullResponse, SyncError> {
        self.check_online()?;
        if self.fail_pulls.load(Ordering::SeqCst) {
            return Err(SyncError::Transport("connection reset during pull".into()));
        }

        self.pulls.fetch_add(1, Ordering::SeqCst);
        Ok(roundtrip(&self.backend.pull(&self.owner_id, last_pulled_at)))
    }

    async fn ping(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

/// One client: its own database, clock and connection to the shared backend.
pub struct Device {
    pub workshop: Workshop,
    pub engine: SyncEngine<Arc<LoopbackTransport>>,
    pub transport: Arc<LoopbackTransport>,
    pub clock: Arc<ManualClock>,
    _temp_dir: TempDir,
}

impl Device {
    pub async fn new(backend: &Arc<Backend>, owner_id: &str, start: Millis) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(temp_dir.path().join("device.db")).await.unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let transport = Arc::new(LoopbackTransport::new(Arc::clone(backend), owner_id));

        Self {
            workshop: Workshop::new(store.clone(), clock.clone(), owner_id),
            engine: SyncEngine::new(store, Arc::clone(&transport), owner_id),
            transport,
            clock,
            _temp_dir: temp_dir,
        }
    }

    pub fn store(&self) -> &Store {
        self.workshop.store()
    }

    /// Another engine over the same store and transport, for schedulers.
    pub fn new_engine(&self) -> SyncEngine<Arc<LoopbackTransport>> {
        SyncEngine::new(
            self.store().clone(),
            Arc::clone(&self.transport),
            self.workshop.owner_id(),
        )
    }

    /// Moves this device's clock to `now`.
    pub fn at(&self, now: Millis) -> &Self {
        self.clock.set(now);
        self
    }

    pub async fn checkpoint(&self) -> Option<Millis> {
        let mut conn = self.store().pool().acquire().await.unwrap();
        checkpoint::last_synced_at(&mut conn).await.unwrap()
    }

    /// Forgets the checkpoint so the next round pulls everything again.
    pub async fn forget_checkpoint(&self) {
        sqlx::query("DELETE FROM sync_state")
            .execute(self.store().pool())
            .await
            .unwrap();
    }
}

pub fn backend(start: Millis) -> (Arc<Backend>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(start));
    (Arc::new(Backend::new(clock.clone())), clock)
}
