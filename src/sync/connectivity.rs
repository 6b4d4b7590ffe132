//! Online/offline signal for the scheduler.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use super::transport::Transport;

/// Shared connectivity flag. Clones observe the same state.
#[derive(Debug, Clone)]
pub struct ConnectivityMonitor {
    online: Arc<watch::Sender<bool>>,
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ConnectivityMonitor {
    pub fn new(online: bool) -> Self {
        let (sender, _) = watch::channel(online);
        Self {
            online: Arc::new(sender),
        }
    }

    pub fn is_connected(&self) -> bool {
        *self.online.borrow()
    }

    /// Updates the flag. Subscribers only wake on an actual change.
    pub fn set_online(&self, online: bool) {
        let changed = self.online.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            tracing::info!(online, "Connectivity changed");
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.online.subscribe()
    }

    /// Pings the server every `every` and updates the flag. Runs until dropped.
    pub async fn probe<T: Transport>(self, transport: T, every: Duration) {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let reachable = transport.ping().await;
            self.set_online(reachable);
        }
    }
}
