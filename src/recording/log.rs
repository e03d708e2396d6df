//! Trajectory log writer
//!
//! The persistent output of a session: a text file with a fixed header line
//! and one space-delimited record per pose sample, timestamps non-decreasing.
//! Writes are buffered; the session's flush task syncs them periodically and
//! `seal` performs the final flush before the upload handoff.

use crate::error::{Error, Result};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Fixed header row, first line of every trajectory log.
pub const LOG_HEADER: &str = "timestamp pos_x pos_y pos_z qua_1 qua_2 qua_3 qua_4";

/// Append-only trajectory log.
#[derive(Debug)]
pub struct TrajectoryLog {
    writer: BufWriter<File>,
    path: PathBuf,
    records: u64,
}

impl TrajectoryLog {
    /// Create the log destination and write the header row.
    ///
    /// Failure here is fatal to the session: recording must not start without
    /// a usable destination.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)
                    .map_err(|e| Error::LogSetup(format!("create {}: {}", dir.display(), e)))?;
            }
        }
        let file = File::create(&path)
            .map_err(|e| Error::LogSetup(format!("create {}: {}", path.display(), e)))?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "{}", LOG_HEADER)
            .map_err(|e| Error::LogSetup(format!("write header: {}", e)))?;

        Ok(Self {
            writer,
            path,
            records: 0,
        })
    }

    /// Append one fully-formed record.
    pub fn append(
        &mut self,
        adjusted_time: f64,
        position: [f32; 3],
        rotation: [f32; 4],
    ) -> Result<()> {
        writeln!(
            self.writer,
            "{} {} {} {} {} {} {} {}",
            adjusted_time,
            position[0],
            position[1],
            position[2],
            rotation[0],
            rotation[1],
            rotation[2],
            rotation[3],
        )?;
        self.records += 1;
        Ok(())
    }

    /// Push buffered writes to the OS.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Records appended so far.
    pub fn record_count(&self) -> u64 {
        self.records
    }

    /// Path of the destination file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Final flush + fsync, closing the log and returning its path for the
    /// upload handoff.
    pub fn seal(mut self) -> Result<PathBuf> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_header_and_records() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("trace.csv");

        let mut log = TrajectoryLog::create(&path).unwrap();
        log.append(100.51, [1.0, 2.0, 3.0], [0.0, 0.0, 0.0, 1.0])
            .unwrap();
        log.append(100.52, [1.5, 2.0, 3.0], [0.0, 0.1, 0.0, 1.0])
            .unwrap();
        assert_eq!(log.record_count(), 2);
        // Diagnostic formatting names the destination
        assert!(format!("{:?}", log).contains("trace.csv"));
        let sealed = log.seal().unwrap();
        assert_eq!(sealed, path);

        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], LOG_HEADER);
        assert_eq!(lines[1], "100.51 1 2 3 0 0 0 1");
        assert_eq!(lines[2], "100.52 1.5 2 3 0 0.1 0 1");
    }

    #[test]
    fn test_creates_missing_directory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/logs/trace.csv");
        let log = TrajectoryLog::create(&path).unwrap();
        log.seal().unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_setup_failure_is_log_setup_error() {
        // A directory path cannot be created as a file
        let dir = TempDir::new().unwrap();
        let err = TrajectoryLog::create(dir.path()).unwrap_err();
        assert!(matches!(err, Error::LogSetup(_)));
    }
}
