//! Online/offline signal for the sync engine.
//!
//! [`Connectivity`] is a cheaply cloneable handle over a `watch` channel.
//! Whatever knows the network state sets it; the engine subscribes. Without
//! a platform signal, [`ConnectivityMonitor`] polls a [`ConnectivityProbe`]
//! and feeds the result in.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Something that can tell whether the remote service is reachable.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    /// Check reachability once.
    async fn is_reachable(&self) -> bool;
}

/// Shared online/offline state.
#[derive(Debug, Clone)]
pub struct Connectivity {
    tx: Arc<watch::Sender<bool>>,
}

impl Connectivity {
    /// Create a signal with the given initial state.
    #[must_use]
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    /// Update the state. Returns `true` if it changed.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            info!(
                "Connectivity changed: {}",
                if online { "online" } else { "offline" }
            );
        }
        changed
    }

    /// Current state.
    #[must_use]
    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Receiver that observes every change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::new(false)
    }
}

/// Polls a probe and publishes the result.
pub struct ConnectivityMonitor {
    probe: Arc<dyn ConnectivityProbe>,
    interval: Duration,
}

impl std::fmt::Debug for ConnectivityMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectivityMonitor")
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl ConnectivityMonitor {
    /// Create a monitor that checks `probe` every `interval`.
    #[must_use]
    pub fn new(probe: Arc<dyn ConnectivityProbe>, interval: Duration) -> Self {
        Self { probe, interval }
    }

    /// Probe once and update `connectivity`. Returns the observed state.
    pub async fn check(&self, connectivity: &Connectivity) -> bool {
        let online = self.probe.is_reachable().await;
        debug!(online, "Connectivity probe finished");
        connectivity.set_online(online);
        online
    }

    /// Poll until `cancel` fires.
    pub async fn run(self, connectivity: Connectivity, cancel: CancellationToken) {
        debug!("Connectivity monitor started ({:?} interval)", self.interval);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = self.check(&connectivity) => {}
            }
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(self.interval) => {}
            }
        }
        debug!("Connectivity monitor stopped");
    }
}
