//! Time-sync listener
//!
//! Binds the session's datagram port and classifies everything the server
//! sends by length: exactly 8 bytes is a binary timestamp sample, anything
//! else is an ASCII control message. Timestamp samples feed the
//! [`OffsetEstimator`]; control messages drive the session over the
//! [`SyncEvent`] channel.

use crate::clock::wall_clock_secs;
use crate::error::Result;
use crate::sync::endpoint::{DatagramEndpoint, MAX_DATAGRAM};
use crate::sync::offset::{OffsetEstimator, TimestampSample};
use chrono::Local;
use crossbeam_channel::Sender;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Control message ending the sync phase.
pub const MSG_STOP_SYNC: &str = "Stop Sync";
/// Control message requesting session finalization.
pub const MSG_STOP_COLLECTION: &str = "Stop Collection";

/// How often the blocking receive wakes up to observe the shutdown flag.
const RECV_TIMEOUT: Duration = Duration::from_millis(200);

/// Session-lifecycle events dispatched by the listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// First timestamp sample arrived; the session log name is now fixed.
    SyncStarted { log_name: String },
    /// Server ended the sync phase; the clock offset has been published.
    SyncStopped,
    /// Server requested finalization. May be delivered more than once;
    /// downstream must deduplicate.
    CollectionStopped,
}

/// Datagram receive loop for the session duration.
pub struct SyncListener {
    endpoint: DatagramEndpoint,
    device_id: String,
    estimator: Arc<OffsetEstimator>,
    announce_stop: Arc<AtomicBool>,
    events: Sender<SyncEvent>,
    first_sample_seen: bool,
}

impl SyncListener {
    /// Bind the listener on `port` (0 = ephemeral).
    pub fn bind(
        port: u16,
        device_id: String,
        estimator: Arc<OffsetEstimator>,
        announce_stop: Arc<AtomicBool>,
        events: Sender<SyncEvent>,
    ) -> Result<Self> {
        let endpoint = DatagramEndpoint::bind(port)?;
        endpoint.set_read_timeout(RECV_TIMEOUT)?;
        Ok(Self {
            endpoint,
            device_id,
            estimator,
            announce_stop,
            events,
            first_sample_seen: false,
        })
    }

    /// Port the listener actually bound (useful with port 0).
    pub fn local_port(&self) -> Result<u16> {
        Ok(self.endpoint.local_addr()?.port())
    }

    /// Spawn the receive loop on its own thread. It serves until `running`
    /// goes false; receive errors other than the periodic timeout are logged
    /// and the loop keeps serving.
    pub fn spawn(mut self, running: Arc<AtomicBool>) -> Result<JoinHandle<()>> {
        let handle = thread::Builder::new()
            .name("sync-listener".to_string())
            .spawn(move || self.run(running))?;
        Ok(handle)
    }

    fn run(&mut self, running: Arc<AtomicBool>) {
        match self.endpoint.local_addr() {
            Ok(addr) => info!("Sync listener ready on {}", addr),
            Err(_) => info!("Sync listener ready"),
        }

        let mut buf = [0u8; MAX_DATAGRAM];
        while running.load(Ordering::Relaxed) {
            match self.endpoint.recv(&mut buf) {
                Ok((len, peer)) => {
                    debug!("Datagram ({} bytes) from {}", len, peer);
                    self.dispatch(&buf[..len]);
                }
                Err(crate::Error::Io(ref e))
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    // Periodic wakeup to observe the shutdown flag
                }
                Err(e) => {
                    warn!("Sync listener receive error: {}", e);
                }
            }
        }

        info!("Sync listener stopped");
    }

    /// Classify and handle one datagram payload.
    fn dispatch(&mut self, payload: &[u8]) {
        if payload.len() == std::mem::size_of::<f64>() {
            self.handle_timestamp(payload);
        } else {
            self.handle_text(payload);
        }
    }

    fn handle_timestamp(&mut self, payload: &[u8]) {
        if !self.first_sample_seen {
            self.first_sample_seen = true;
            // Terminate the announcer and fix the session log name, once
            self.announce_stop.store(true, Ordering::SeqCst);
            let log_name = session_log_name(&self.device_id);
            info!("First timestamp sample received; log name: {}", log_name);
            let _ = self.events.send(SyncEvent::SyncStarted { log_name });
        }

        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(payload);
        let server_time = f64::from_ne_bytes(bytes);
        let sample = TimestampSample::new(server_time, wall_clock_secs());
        self.estimator.add_sample(sample);
    }

    fn handle_text(&mut self, payload: &[u8]) {
        let message = match std::str::from_utf8(payload) {
            Ok(s) => s,
            Err(_) => {
                warn!("Dropping undecodable datagram ({} bytes)", payload.len());
                return;
            }
        };

        match message {
            MSG_STOP_SYNC => {
                info!("Received \"{}\"", MSG_STOP_SYNC);
                self.estimator.compute_once();
                let _ = self.events.send(SyncEvent::SyncStopped);
            }
            MSG_STOP_COLLECTION => {
                info!("Received \"{}\"", MSG_STOP_COLLECTION);
                let _ = self.events.send(SyncEvent::CollectionStopped);
            }
            other => {
                warn!("Unrecognized control message: {:?}", other);
            }
        }
    }
}

/// Session log filename, chosen once per session from the device identifier
/// and the current wall-clock minute.
fn session_log_name(device_id: &str) -> String {
    format!("{}_{}.csv", device_id, Local::now().format("%Y_%m_%d_%H_%M"))
}
