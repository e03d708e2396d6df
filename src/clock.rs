//! Local wall-clock access
//!
//! The sync exchange and the trajectory log both work in f64 seconds since the
//! Unix epoch, matching the 8-byte timestamp datagrams the server sends.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time as f64 seconds since the Unix epoch.
pub fn wall_clock_secs() -> f64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs_f64(),
        // Clock before epoch: report the (negative) distance rather than panic
        Err(e) => -e.duration().as_secs_f64(),
    }
}
