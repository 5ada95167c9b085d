//! Connectivity monitor
//!
//! Tracks whether the server-of-record is believed reachable. The state is
//! held in a watch channel so the sync engine and status aggregator observe
//! transitions without polling.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;

/// Reachability check for environments without an ambient online signal
pub trait ConnectivityProbe: Send + Sync {
    /// Whether the server-of-record answered
    fn probe(&self) -> impl Future<Output = bool> + Send;
}

/// Shared online/offline flag with deduplicated transitions
#[derive(Debug, Clone)]
pub struct ConnectivityMonitor {
    state: Arc<watch::Sender<bool>>,
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ConnectivityMonitor {
    pub fn new(initially_online: bool) -> Self {
        let (state, _) = watch::channel(initially_online);
        Self {
            state: Arc::new(state),
        }
    }

    pub fn is_online(&self) -> bool {
        *self.state.borrow()
    }

    /// Update the state; returns true when this was a transition.
    ///
    /// Repeating the current state does not notify subscribers.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.state.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });

        if changed {
            if online {
                tracing::info!("Connectivity restored");
            } else {
                tracing::info!("Connectivity lost");
            }
        }
        changed
    }

    /// Receiver seeded with the current state
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }

    /// Run a probe and record its answer; returns the resulting state
    pub async fn poll(&self, probe: &impl ConnectivityProbe) -> bool {
        let online = probe.probe().await;
        self.set_online(online);
        online
    }
}
