//! Identity announcer
//!
//! Until the server acknowledges the device by sending its first timestamp
//! sample, the device repeatedly announces `"<device_id>:<local_addr>"` to the
//! server's sync endpoint. Each send is fire-and-forget: a failed send is
//! logged and the next tick is itself the retry.

use crate::error::Result;
use crate::sync::endpoint::DatagramEndpoint;
use log::{debug, info, warn};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Periodic announce loop. Runs on its own thread for the sync phase only.
pub struct IdentityAnnouncer {
    device_id: String,
    local_addr: SocketAddr,
    server_addr: SocketAddr,
    interval: Duration,
}

impl IdentityAnnouncer {
    pub fn new(
        device_id: String,
        local_addr: SocketAddr,
        server_addr: SocketAddr,
        interval: Duration,
    ) -> Self {
        Self {
            device_id,
            local_addr,
            server_addr,
            interval,
        }
    }

    /// The announce payload: ASCII `"<DeviceIdentifier>:<LocalAddress>"`.
    pub fn payload(&self) -> String {
        format!("{}:{}", self.device_id, self.local_addr)
    }

    /// Spawn the announcer thread. It sends one announce per interval until
    /// `stop` (set by the listener on first timestamp sample) or `running`
    /// (daemon shutdown) says otherwise, then stops permanently.
    pub fn spawn(
        self,
        stop: Arc<AtomicBool>,
        running: Arc<AtomicBool>,
    ) -> Result<JoinHandle<()>> {
        let handle = thread::Builder::new()
            .name("identity-announcer".to_string())
            .spawn(move || self.run(stop, running))?;
        Ok(handle)
    }

    fn run(self, stop: Arc<AtomicBool>, running: Arc<AtomicBool>) {
        info!(
            "Identity announcer started ({} -> {}, every {:?})",
            self.payload(),
            self.server_addr,
            self.interval
        );

        // Unbound local port; we only send on this socket
        let endpoint = match DatagramEndpoint::bind(0) {
            Ok(ep) => ep,
            Err(e) => {
                warn!("Identity announcer could not open a socket: {}", e);
                return;
            }
        };

        let payload = self.payload();
        while running.load(Ordering::Relaxed) && !stop.load(Ordering::Relaxed) {
            match endpoint.send_to(payload.as_bytes(), self.server_addr) {
                Ok(_) => debug!("Announced {}", payload),
                // Transient send failures are not fatal; the next tick retries
                Err(e) => warn!("Announce send failed: {}", e),
            }
            thread::sleep(self.interval);
        }

        info!("Identity announcer stopped");
    }
}
