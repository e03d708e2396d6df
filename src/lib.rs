//! kala-trace - Clock-synchronized trajectory recording for XR devices
//!
//! A head-mounted device and a coordination server agree on a shared time
//! base over UDP, the device records pose samples on that time base
//! (retroactively correcting anything captured before synchronization
//! finished), and the finished log is handed to the server over TCP.
//!
//! ## Session flow
//!
//! ```text
//!  announce "<id>:<addr>" ──▶ server        (1 Hz, until first sample)
//!  server time samples    ──▶ OffsetEstimator  (8-byte f64 datagrams)
//!  "Stop Sync"            ──▶ offset published, buffer drained
//!  pose samples           ──▶ Recorder ──▶ trajectory log
//!  "Stop Collection"      ──▶ seal log ──▶ UploadStreamer ──▶ server
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod recording;
pub mod session;
pub mod sync;
pub mod upload;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};
pub use session::{Session, SessionReport, SessionState};
