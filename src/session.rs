//! Session lifecycle
//!
//! One session spans sync start to upload completion (or failure) for one
//! recording. The session owns the worker threads: identity announcer, sync
//! listener, pose capture driver, and periodic log flusher, and runs the
//! finalize-and-upload sequence exactly once.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::recording::{PoseSource, Recorder};
use crate::sync::{IdentityAnnouncer, OffsetEstimator, SyncEvent, SyncListener};
use crate::upload::{UploadReport, UploadStreamer};
use crossbeam_channel::{unbounded, RecvTimeoutError};
use log::{error, info, warn};
use std::net::{IpAddr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the server's first timestamp sample
    Syncing,
    /// Log destination exists; samples are being recorded
    Recording,
    /// Termination requested; sealing and uploading
    Finalizing,
    /// Upload handshake completed
    Uploaded,
}

/// What a finished session produced.
#[derive(Debug)]
pub struct SessionReport {
    pub state: SessionState,
    /// Sealed log path; stays on local storage whether or not delivery
    /// succeeded
    pub log_path: Option<PathBuf>,
    pub upload: Option<UploadReport>,
    /// Why the session is not `Uploaded`, if it is not
    pub error: Option<String>,
}

impl SessionReport {
    pub fn delivered(&self) -> bool {
        self.state == SessionState::Uploaded
    }
}

/// One device-side recording session.
pub struct Session {
    config: Config,
    sync_addr: SocketAddr,
    upload_addr: SocketAddr,
}

impl Session {
    /// Resolve the configured server endpoints up front so address problems
    /// fail before any thread starts.
    pub fn new(config: Config) -> Result<Self> {
        let sync_addr = resolve(&config.server.sync_addr)?;
        let upload_addr = resolve(&config.server.upload_addr)?;
        Ok(Self {
            config,
            sync_addr,
            upload_addr,
        })
    }

    /// Run the session to completion.
    ///
    /// `running` is the daemon-level flag (Ctrl-C); clearing it aborts the
    /// session without an upload. Server-side termination (`Stop Collection`)
    /// is the normal path and triggers exactly one finalize-and-upload.
    pub fn run(
        &self,
        pose_source: Box<dyn PoseSource>,
        running: Arc<AtomicBool>,
    ) -> Result<SessionReport> {
        let estimator = Arc::new(OffsetEstimator::new(self.config.sync.warmup_fraction));
        let recorder = Arc::new(Recorder::new(Arc::clone(&estimator)));
        let announce_stop = Arc::new(AtomicBool::new(false));
        let (event_tx, event_rx) = unbounded();

        // Listener first: its bound port goes into the announce payload
        let listener = SyncListener::bind(
            self.config.sync.listen_port,
            self.config.device.id.clone(),
            Arc::clone(&estimator),
            Arc::clone(&announce_stop),
            event_tx,
        )?;
        let listen_port = listener.local_port()?;
        let local_addr = SocketAddr::new(local_ip_toward(self.sync_addr), listen_port);

        let listener_running = Arc::new(AtomicBool::new(true));
        let listener_handle = listener.spawn(Arc::clone(&listener_running))?;

        let announcer = IdentityAnnouncer::new(
            self.config.device.id.clone(),
            local_addr,
            self.sync_addr,
            self.config.announce_interval(),
        );
        let announcer_handle =
            announcer.spawn(Arc::clone(&announce_stop), Arc::clone(&running))?;

        // Capture driver runs from session start: samples that arrive before
        // the offset is known are buffered, not dropped
        let capture_stop = Arc::new(AtomicBool::new(false));
        let capture_handle =
            spawn_capture_driver(pose_source, Arc::clone(&recorder), Arc::clone(&capture_stop))?;
        let flusher_handle = spawn_flusher(
            Arc::clone(&recorder),
            self.config.flush_interval(),
            Arc::clone(&capture_stop),
        )?;

        // Event loop: drive the state machine until termination
        let mut state = SessionState::Syncing;
        let mut aborted = false;
        let mut fatal: Option<Error> = None;
        loop {
            if !running.load(Ordering::Relaxed) {
                warn!("Shutdown requested before finalization; aborting session");
                aborted = true;
                break;
            }
            match event_rx.recv_timeout(Duration::from_millis(200)) {
                Ok(SyncEvent::SyncStarted { log_name }) => {
                    let path = Path::new(&self.config.recording.output_dir).join(log_name);
                    // Fatal: recording must not proceed without a destination
                    if let Err(e) = recorder.attach_log(&path) {
                        fatal = Some(e);
                        break;
                    }
                    state = SessionState::Recording;
                    info!("Session state: {:?}", state);
                }
                Ok(SyncEvent::SyncStopped) => {
                    // Offset was published on the listener thread; flush the
                    // buffered samples even if no further pose arrives
                    if let Err(e) = recorder.drain_now() {
                        error!("Drain failed: {}", e);
                    }
                }
                Ok(SyncEvent::CollectionStopped) => {
                    state = SessionState::Finalizing;
                    info!("Session state: {:?}", state);
                    break;
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    warn!("Sync event channel closed unexpectedly");
                    aborted = true;
                    break;
                }
            }
        }

        // Stop accepting new work; exactly one finalize sequence runs below.
        // Late or duplicate "Stop Collection" datagrams land on a channel
        // nobody reads again.
        announce_stop.store(true, Ordering::SeqCst);
        capture_stop.store(true, Ordering::SeqCst);
        listener_running.store(false, Ordering::SeqCst);
        for (name, handle) in [
            ("listener", listener_handle),
            ("announcer", announcer_handle),
            ("capture", capture_handle),
            ("flusher", flusher_handle),
        ] {
            if handle.join().is_err() {
                error!("{} thread panicked", name);
            }
        }

        if let Some(e) = fatal {
            return Err(e);
        }

        let log_path = recorder.seal()?;

        if aborted {
            return Ok(SessionReport {
                state,
                log_path,
                upload: None,
                error: Some("session aborted before finalization".to_string()),
            });
        }

        let Some(log_path) = log_path else {
            warn!("Session ended without a recording; nothing to upload");
            return Ok(SessionReport {
                state,
                log_path: None,
                upload: None,
                error: Some(Error::NoRecording.to_string()),
            });
        };

        // Exactly one upload attempt; on failure the log stays local
        let streamer = UploadStreamer::new(self.upload_addr, self.config.close_ack_timeout());
        match streamer.upload(&log_path) {
            Ok(report) => Ok(SessionReport {
                state: SessionState::Uploaded,
                log_path: Some(log_path),
                upload: Some(report),
                error: None,
            }),
            Err(e) => {
                error!("Upload failed; log remains at {}", log_path.display());
                Ok(SessionReport {
                    state: SessionState::Finalizing,
                    log_path: Some(log_path),
                    upload: None,
                    error: Some(e.to_string()),
                })
            }
        }
    }

}

/// Capture driver: pulls poses from the platform source and feeds the
/// recorder synchronously, one sample at a time.
fn spawn_capture_driver(
    mut source: Box<dyn PoseSource>,
    recorder: Arc<Recorder>,
    stop: Arc<AtomicBool>,
) -> Result<JoinHandle<()>> {
    let handle = thread::Builder::new()
        .name("pose-capture".to_string())
        .spawn(move || {
            info!("Pose capture started");
            while !stop.load(Ordering::Relaxed) {
                match source.next_pose() {
                    Some(sample) => {
                        if let Err(e) = recorder.record(sample) {
                            error!("Record failed: {}", e);
                        }
                    }
                    None => break,
                }
            }
            info!("Pose capture stopped");
        })?;
    Ok(handle)
}

/// Periodic flush task for the buffered log writer.
fn spawn_flusher(
    recorder: Arc<Recorder>,
    interval: Duration,
    stop: Arc<AtomicBool>,
) -> Result<JoinHandle<()>> {
    let handle = thread::Builder::new()
        .name("log-flusher".to_string())
        .spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                thread::sleep(interval);
                if let Err(e) = recorder.flush() {
                    warn!("Log flush failed: {}", e);
                }
            }
        })?;
    Ok(handle)
}

/// Resolve a `host:port` string to a socket address.
fn resolve(addr: &str) -> Result<SocketAddr> {
    addr.to_socket_addrs()
        .map_err(|e| Error::InvalidAddress {
            addr: addr.to_string(),
            reason: e.to_string(),
        })?
        .next()
        .ok_or_else(|| Error::InvalidAddress {
            addr: addr.to_string(),
            reason: "no addresses resolved".to_string(),
        })
}

/// Best-effort local IP as seen on the route toward the server: connect a
/// throwaway UDP socket and read back its local address. Falls back to
/// loopback when the network is unreachable.
fn local_ip_toward(server: SocketAddr) -> IpAddr {
    let probe = || -> std::io::Result<IpAddr> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect(server)?;
        Ok(socket.local_addr()?.ip())
    };
    match probe() {
        Ok(ip) => ip,
        Err(e) => {
            warn!("Could not determine local IP ({}); using loopback", e);
            IpAddr::from([127, 0, 0, 1])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_numeric_addr() {
        let addr = resolve("127.0.0.1:6666").unwrap();
        assert_eq!(addr.port(), 6666);
    }

    #[test]
    fn test_resolve_rejects_garbage() {
        assert!(matches!(
            resolve("not-an-address"),
            Err(Error::InvalidAddress { .. })
        ));
    }

    #[test]
    fn test_local_ip_toward_loopback() {
        let ip = local_ip_toward("127.0.0.1:6666".parse().unwrap());
        assert!(ip.is_loopback());
    }

    #[test]
    fn test_session_new_validates_config() {
        let mut config = Config::defaults();
        config.server.sync_addr = "bogus".to_string();
        assert!(Session::new(config).is_err());
    }
}
