//! Liveness sweep (§4.10). Mirrors
//! [`crate::classroom_code::ClassroomCodeCleanup`]'s cancellable-timer shape:
//! every interval, any peer that hasn't sent a `ping`/`pong` (or otherwise
//! been marked alive) since the last sweep is force-terminated via
//! [`crate::registry::PeerState::terminate`]; everyone else gets a server
//! `Ping` queued so a client that never pings on its own still gets probed.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::registry::{ConnectionRegistry, OutboundItem};

pub struct HealthMonitor {
    handle: JoinHandle<()>,
    notify: Arc<Notify>,
}

impl HealthMonitor {
    pub fn spawn(registry: Arc<ConnectionRegistry>, interval: Duration) -> Self {
        let notify = Arc::new(Notify::new());
        let shutdown = notify.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick fires immediately; skip it so a peer isn't judged
            // dead before it has had one full interval to prove liveness.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => sweep(&registry),
                    _ = shutdown.notified() => break,
                }
            }
        });
        Self { handle, notify }
    }

    pub fn cancel(self) {
        self.notify.notify_one();
        self.handle.abort();
    }
}

fn sweep(registry: &ConnectionRegistry) {
    for peer in registry.all_peers() {
        if peer.take_alive() {
            if peer.send_item(OutboundItem::Ping).is_err() {
                tracing::debug!(connection_id = peer.connection_id, "ping dropped, peer channel closed");
            }
        } else {
            tracing::info!(connection_id = peer.connection_id, "peer failed liveness sweep, terminating");
            peer.terminate();
        }
    }
}
