//! kala-trace - session daemon entry point
//!
//! Runs one recording session against the coordination server: sync, record,
//! upload. The pose source here is the synthetic one; device integrations
//! link the library and supply their platform tracker instead.

use kala_trace::recording::SyntheticPoseSource;
use kala_trace::{Config, Error, Result, Session};
use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Parse config path from command line arguments.
///
/// Supports:
/// - `kala-trace <path>` (positional)
/// - `kala-trace --config <path>` (flag-based)
/// - `kala-trace -c <path>` (short flag)
///
/// Defaults to `kala-trace.toml` if not specified.
fn parse_config_path() -> String {
    let args: Vec<String> = env::args().collect();

    for i in 1..args.len() {
        if (args[i] == "--config" || args[i] == "-c") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }

    if args.len() > 1 && !args[1].starts_with('-') {
        return args[1].clone();
    }

    "kala-trace.toml".to_string()
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config_path = parse_config_path();
    log::info!("Using config: {}", config_path);
    let config = match Config::from_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            log::warn!("Could not load {} ({}); using defaults", config_path, e);
            Config::defaults()
        }
    };
    log::info!(
        "Device {} -> sync {}, upload {}",
        config.device.id,
        config.server.sync_addr,
        config.server.upload_addr
    );

    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal");
        r.store(false, Ordering::Relaxed);
    })
    .map_err(|e| Error::Other(format!("Error setting Ctrl-C handler: {}", e)))?;

    // Synthetic 90 Hz pose source; stops when the session tears it down
    let source_stop = Arc::new(AtomicBool::new(false));
    let pose_source = Box::new(SyntheticPoseSource::new(90.0, Arc::clone(&source_stop)));

    let session = Session::new(config)?;
    let report = session.run(pose_source, running)?;
    source_stop.store(true, Ordering::Relaxed);

    match (&report.log_path, report.delivered()) {
        (Some(path), true) => log::info!("Session delivered: {}", path.display()),
        (Some(path), false) => log::warn!(
            "Session NOT delivered ({}); log kept at {}",
            report.error.as_deref().unwrap_or("unknown error"),
            path.display()
        ),
        (None, _) => log::warn!(
            "Session produced no recording ({})",
            report.error.as_deref().unwrap_or("unknown error")
        ),
    }

    log::info!("kala-trace stopped");
    Ok(())
}
