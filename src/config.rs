//! Configuration for the kala-trace session daemon
//!
//! Loads configuration from a TOML file. The loaded value is immutable and is
//! passed into each component at construction; there is no process-wide
//! mutable configuration.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Top-level session configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub device: DeviceConfig,
    pub server: ServerConfig,
    pub sync: SyncConfig,
    pub recording: RecordingConfig,
    pub upload: UploadConfig,
    pub logging: LoggingConfig,
}

/// Device identity
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeviceConfig {
    /// Device identifier used in announce datagrams and log filenames
    /// (e.g. "AppleVisionPro", "MagicLeap2")
    pub id: String,
}

/// Coordination server endpoints
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// UDP endpoint the identity announce is sent to
    pub sync_addr: String,
    /// TCP endpoint the finished log is uploaded to
    pub upload_addr: String,
}

/// Clock synchronization parameters
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SyncConfig {
    /// UDP port the device listens on for timestamp samples and control
    /// messages. Port 0 binds an ephemeral port (used by tests).
    pub listen_port: u16,
    /// Interval between identity announce datagrams, in milliseconds
    pub announce_interval_ms: u64,
    /// Fraction of the earliest timestamp diffs discarded before averaging.
    ///
    /// Early samples tend to reflect transient network/startup jitter; later
    /// samples better estimate steady-state skew. 0.5 keeps the later half.
    pub warmup_fraction: f64,
}

/// Recording output parameters
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RecordingConfig {
    /// Directory the trajectory log is written to
    pub output_dir: String,
    /// Interval between log flushes, in milliseconds
    pub flush_interval_ms: u64,
}

/// Upload handoff parameters
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UploadConfig {
    /// Bounded wait for the peer's close acknowledgment, in milliseconds
    pub close_ack_timeout_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Default configuration matching the reference deployment ports
    pub fn defaults() -> Self {
        Self {
            device: DeviceConfig {
                id: "kala-device".to_string(),
            },
            server: ServerConfig {
                sync_addr: "192.168.0.108:6666".to_string(),
                upload_addr: "192.168.0.108:8765".to_string(),
            },
            sync: SyncConfig {
                listen_port: 8888,
                announce_interval_ms: 1000,
                warmup_fraction: 0.5,
            },
            recording: RecordingConfig {
                output_dir: "trajectory_logs".to_string(),
                flush_interval_ms: 100,
            },
            upload: UploadConfig {
                close_ack_timeout_ms: 5000,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
            },
        }
    }

    /// Announce interval as a `Duration`
    pub fn announce_interval(&self) -> Duration {
        Duration::from_millis(self.sync.announce_interval_ms)
    }

    /// Log flush interval as a `Duration`
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.recording.flush_interval_ms)
    }

    /// Upload close-ack wait as a `Duration`
    pub fn close_ack_timeout(&self) -> Duration {
        Duration::from_millis(self.upload.close_ack_timeout_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::defaults()
    }
}
